mod combat;
mod enemy;
mod item;
mod map;
mod player;

#[cfg(test)]
pub(crate) mod testing;

pub use combat::{CombatAdapter, CombatSync, DamageReport};
pub use enemy::{EnemyAdapter, EnemySnapshot, EnemySync, SyncedEnemy, enemy_cap};
pub use item::{ItemAdapter, ItemSync, LootDrop, SyncedChest, SyncedItem};
pub use map::{MapAdapter, MapState, MapSync};
pub use player::{
    AnimationState, InterpolationBuffer, LocalPlayerState, PlayerAdapter, PlayerHealth,
    PlayerSync, PositionSnapshot, RemotePlayer,
};

use crate::net::Message;
use crate::session::{ConnectionState, NetworkSession, SessionEvent};
use crate::{NetId, PlayerId};

/// Opaque reference to a game-side object. The game decides what the number
/// means; synchronizers only store and hand it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("only the host can do that")]
    NotHost,
    #[error("not connected")]
    NotConnected,
    #[error("enemy cap of {0} reached")]
    EnemyCapReached(usize),
    #[error("unknown {kind} {id}")]
    Unknown { kind: &'static str, id: NetId },
    #[error("map seed already sent for this run")]
    SeedAlreadySent,
}

pub trait GameAdapter: PlayerAdapter + EnemyAdapter + ItemAdapter + MapAdapter + CombatAdapter {}

impl<T> GameAdapter for T where
    T: PlayerAdapter + EnemyAdapter + ItemAdapter + MapAdapter + CombatAdapter + ?Sized
{
}

#[derive(Default)]
pub struct Synchronizers {
    pub players: PlayerSync,
    pub enemies: EnemySync,
    pub items: ItemSync,
    pub map: MapSync,
    pub combat: CombatSync,
}

impl Synchronizers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_event<S, G>(&mut self, event: &SessionEvent, session: &mut S, game: &mut G)
    where
        S: NetworkSession + ?Sized,
        G: GameAdapter + ?Sized,
    {
        match event {
            SessionEvent::PacketReceived { sender, message } => {
                self.handle_message(*sender, message, session, game)
            }
            SessionEvent::PlayerDisconnected { player_id, .. } => {
                self.players.remove_player(*player_id, game);
                self.map.remove_player(*player_id);
            }
            SessionEvent::ConnectionStateChanged {
                state: ConnectionState::Disconnected,
            } => self.reset(game),
            SessionEvent::PlayerConnected { player_id } => {
                self.map.welcome_player(*player_id, session)
            }
            SessionEvent::ConnectionStateChanged { .. } => {}
        }
    }

    pub fn handle_message<S, G>(
        &mut self,
        sender: PlayerId,
        message: &Message,
        session: &mut S,
        game: &mut G,
    ) where
        S: NetworkSession + ?Sized,
        G: GameAdapter + ?Sized,
    {
        match message {
            Message::PlayerPosition { .. }
            | Message::PlayerAnimation { .. }
            | Message::PlayerHealth { .. }
            | Message::PlayerStats { .. }
            | Message::PlayerDeath { .. } => {
                self.players.handle_message(message, session, game)
            }
            Message::EnemySpawn { .. }
            | Message::EnemyPosition { .. }
            | Message::EnemyDeath { .. } => {
                self.enemies.handle_message(sender, message, session, game)
            }
            Message::ItemSpawn { .. } | Message::ItemPickup { .. } | Message::ChestOpen { .. } => {
                self.items.handle_message(sender, message, session, game)
            }
            Message::MapSeed { .. } | Message::RoomTransition { .. } => {
                self.map.handle_message(sender, message, session, game)
            }
            Message::WeaponFire { .. }
            | Message::ProjectileSpawn { .. }
            | Message::DamageDealt { .. } => {
                self.combat.handle_message(sender, message, session, game)
            }
            _ => {}
        }
    }

    pub fn update<S, G>(
        &mut self,
        dt: f32,
        local: Option<&LocalPlayerState>,
        session: &mut S,
        game: &mut G,
    ) where
        S: NetworkSession + ?Sized,
        G: GameAdapter + ?Sized,
    {
        self.players.update(dt, local, session, game);
        self.enemies.update(dt, session, game);
        self.items.update(dt);
    }

    /// Forgets all synced state between runs or after leaving a session.
    pub fn reset<G>(&mut self, game: &mut G)
    where
        G: GameAdapter + ?Sized,
    {
        self.players.clear(game);
        self.enemies.clear(game);
        self.items.clear();
        self.map.reset();
    }
}
