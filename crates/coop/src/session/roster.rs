use std::collections::BTreeMap;

use crate::PlayerId;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub is_host: bool,
    pub is_ready: bool,
    /// Smoothed round trip in milliseconds. Zero for the local player.
    pub latency_ms: f32,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>, is_host: bool) -> Self {
        Self {
            id,
            name: name.into(),
            is_host,
            is_ready: false,
            latency_ms: 0.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct Roster {
    players: BTreeMap<PlayerId, Player>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the id was already present; the entry is replaced.
    pub fn insert(&mut self, player: Player) -> bool {
        self.players.insert(player.id, player).is_none()
    }

    pub fn remove(&mut self, id: PlayerId) -> Option<Player> {
        self.players.remove(&id)
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn set_ready(&mut self, id: PlayerId, ready: bool) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                player.is_ready = ready;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn all_ready(&self) -> bool {
        !self.players.is_empty() && self.players.values().all(|p| p.is_ready)
    }

    pub fn clear(&mut self) -> Vec<Player> {
        std::mem::take(&mut self.players).into_values().collect()
    }
}
