use std::collections::BTreeMap;

use log::{debug, info, warn};

use super::SyncError;
use crate::net::{DeliveryMode, Message};
use crate::session::NetworkSession;
use crate::{HOST_PLAYER_ID, PlayerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapState {
    pub seed: i32,
    pub difficulty: i32,
    pub biome_id: i32,
}

pub trait MapAdapter {
    /// Regenerates the level from the shared seed.
    fn apply_map_seed(&mut self, map: &MapState);

    fn on_room_transition(&mut self, _player_id: PlayerId, _from_room: i32, _to_room: i32) {}
}

/// Keeps every peer on the same generated level and tracks which room each
/// player is standing in.
#[derive(Debug, Default)]
pub struct MapSync {
    current: Option<MapState>,
    rooms: BTreeMap<PlayerId, i32>,
}

impl MapSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate_seed() -> i32 {
        rand::random()
    }

    pub fn current(&self) -> Option<&MapState> {
        self.current.as_ref()
    }

    /// Host only, once per run.
    pub fn set_map_seed<S, A>(
        &mut self,
        map: MapState,
        session: &mut S,
        adapter: &mut A,
    ) -> Result<(), SyncError>
    where
        S: NetworkSession + ?Sized,
        A: MapAdapter + ?Sized,
    {
        if !session.is_host() {
            return Err(SyncError::NotHost);
        }
        if self.current.is_some() {
            return Err(SyncError::SeedAlreadySent);
        }

        info!(
            "map seed {} (difficulty {}, biome {})",
            map.seed, map.difficulty, map.biome_id
        );
        self.current = Some(map);
        session.set_map_seed(map.seed);
        session.send(
            &Message::MapSeed {
                seed: map.seed,
                difficulty: map.difficulty,
                biome_id: map.biome_id,
            },
            DeliveryMode::ReliableOrdered,
        );
        adapter.apply_map_seed(&map);
        Ok(())
    }

    /// Host only. Brings a player who joined after the seed went out up to
    /// date with the current level.
    pub fn welcome_player<S>(&self, player_id: PlayerId, session: &mut S)
    where
        S: NetworkSession + ?Sized,
    {
        if !session.is_host() || player_id == HOST_PLAYER_ID {
            return;
        }
        let Some(map) = self.current else {
            return;
        };
        debug!("sending map seed {} to late joiner {player_id}", map.seed);
        session.send_to(
            player_id,
            &Message::MapSeed {
                seed: map.seed,
                difficulty: map.difficulty,
                biome_id: map.biome_id,
            },
            DeliveryMode::ReliableOrdered,
        );
    }

    pub fn notify_room_transition<S>(
        &mut self,
        from_room: i32,
        to_room: i32,
        session: &mut S,
    ) -> Result<(), SyncError>
    where
        S: NetworkSession + ?Sized,
    {
        let Some(player_id) = session.local_player_id().filter(|_| session.is_connected()) else {
            return Err(SyncError::NotConnected);
        };
        self.rooms.insert(player_id, to_room);
        session.send(
            &Message::RoomTransition {
                player_id,
                from_room,
                to_room,
            },
            DeliveryMode::ReliableOrdered,
        );
        Ok(())
    }

    pub fn handle_message<S, A>(
        &mut self,
        sender: PlayerId,
        message: &Message,
        session: &mut S,
        adapter: &mut A,
    ) where
        S: NetworkSession + ?Sized,
        A: MapAdapter + ?Sized,
    {
        match message {
            Message::MapSeed {
                seed,
                difficulty,
                biome_id,
            } => {
                if session.is_host() || sender != HOST_PLAYER_ID {
                    warn!("map seed from player {sender} ignored");
                    return;
                }
                let map = MapState {
                    seed: *seed,
                    difficulty: *difficulty,
                    biome_id: *biome_id,
                };
                if self.current == Some(map) {
                    return;
                }
                self.current = Some(map);
                adapter.apply_map_seed(&map);
            }
            Message::RoomTransition {
                player_id,
                from_room,
                to_room,
            } => {
                self.rooms.insert(*player_id, *to_room);
                adapter.on_room_transition(*player_id, *from_room, *to_room);
            }
            _ => {}
        }
    }

    pub fn room_of(&self, player_id: PlayerId) -> Option<i32> {
        self.rooms.get(&player_id).copied()
    }

    /// True when every connected player has reported being in `room_id`.
    pub fn all_players_in_room<S>(&self, room_id: i32, session: &S) -> bool
    where
        S: NetworkSession + ?Sized,
    {
        session
            .player_ids()
            .iter()
            .all(|id| self.room_of(*id) == Some(room_id))
    }

    pub fn remove_player(&mut self, player_id: PlayerId) {
        self.rooms.remove(&player_id);
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.rooms.clear();
    }
}
