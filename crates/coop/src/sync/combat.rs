use glam::Vec3;
use log::{debug, warn};

use super::SyncError;
use crate::net::{DeliveryMode, Message};
use crate::session::NetworkSession;
use crate::{NetId, PlayerId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageReport {
    pub source_player_id: PlayerId,
    pub target_id: i32,
    pub target_is_player: bool,
    pub damage: f32,
    pub critical: bool,
    pub element: u8,
    pub hit_position: Vec3,
}

pub trait CombatAdapter {
    fn on_weapon_fire(
        &mut self,
        _player_id: PlayerId,
        _weapon_id: i32,
        _direction: Vec3,
        _position: Vec3,
    ) {
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_projectile(
        &mut self,
        _projectile_id: NetId,
        _owner_id: PlayerId,
        _projectile_type: i32,
        _position: Vec3,
        _velocity: Vec3,
        _damage: f32,
        _element: u8,
    ) {
    }

    fn apply_damage(&mut self, _report: &DamageReport) {}
}

/// Forwards weapon effects between peers. The host arbitrates damage.
#[derive(Debug)]
pub struct CombatSync {
    next_projectile_id: NetId,
}

impl Default for CombatSync {
    fn default() -> Self {
        Self {
            next_projectile_id: 1,
        }
    }
}

impl CombatSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire_weapon<S>(
        &mut self,
        weapon_id: i32,
        direction: Vec3,
        position: Vec3,
        session: &mut S,
    ) where
        S: NetworkSession + ?Sized,
    {
        let Some(player_id) = session.local_player_id() else {
            return;
        };
        session.send(
            &Message::WeaponFire {
                player_id,
                weapon_id,
                direction,
                position,
            },
            DeliveryMode::Unreliable,
        );
    }

    /// Announces a projectile the local player fired. Ids are only unique per
    /// owner.
    pub fn spawn_projectile<S>(
        &mut self,
        projectile_type: i32,
        position: Vec3,
        velocity: Vec3,
        damage: f32,
        element: u8,
        session: &mut S,
    ) -> Result<NetId, SyncError>
    where
        S: NetworkSession + ?Sized,
    {
        let Some(owner_id) = session.local_player_id().filter(|_| session.is_connected()) else {
            return Err(SyncError::NotConnected);
        };
        let projectile_id = self.next_projectile_id;
        self.next_projectile_id = self.next_projectile_id.wrapping_add(1).max(1);

        session.send(
            &Message::ProjectileSpawn {
                projectile_id,
                owner_id,
                projectile_type,
                position,
                velocity,
                damage,
                element,
            },
            DeliveryMode::ReliableUnordered,
        );
        Ok(projectile_id)
    }

    /// Reports damage the local player dealt. Returns false when the host
    /// refuses it under the friendly fire setting.
    #[allow(clippy::too_many_arguments)]
    pub fn report_damage<S>(
        &mut self,
        target_id: i32,
        target_is_player: bool,
        damage: f32,
        critical: bool,
        element: u8,
        hit_position: Vec3,
        session: &mut S,
    ) -> Result<bool, SyncError>
    where
        S: NetworkSession + ?Sized,
    {
        let Some(source_player_id) = session.local_player_id().filter(|_| session.is_connected())
        else {
            return Err(SyncError::NotConnected);
        };
        if session.is_host() && target_is_player && !session.config().friendly_fire {
            return Ok(false);
        }

        session.send(
            &Message::DamageDealt {
                source_player_id,
                target_id,
                target_is_player,
                damage,
                critical,
                element,
                hit_position,
            },
            DeliveryMode::ReliableOrdered,
        );
        Ok(true)
    }

    pub fn handle_message<S, A>(
        &mut self,
        sender: PlayerId,
        message: &Message,
        session: &mut S,
        adapter: &mut A,
    ) where
        S: NetworkSession + ?Sized,
        A: CombatAdapter + ?Sized,
    {
        let local_id = session.local_player_id();

        match message {
            Message::WeaponFire {
                player_id,
                weapon_id,
                direction,
                position,
            } => {
                if Some(*player_id) != local_id {
                    adapter.on_weapon_fire(*player_id, *weapon_id, *direction, *position);
                }
            }
            Message::ProjectileSpawn {
                projectile_id,
                owner_id,
                projectile_type,
                position,
                velocity,
                damage,
                element,
            } => {
                if Some(*owner_id) != local_id {
                    adapter.spawn_projectile(
                        *projectile_id,
                        *owner_id,
                        *projectile_type,
                        *position,
                        *velocity,
                        *damage,
                        *element,
                    );
                }
            }
            Message::DamageDealt {
                source_player_id,
                target_id,
                target_is_player,
                damage,
                critical,
                element,
                hit_position,
            } => {
                let report = DamageReport {
                    source_player_id: *source_player_id,
                    target_id: *target_id,
                    target_is_player: *target_is_player,
                    damage: *damage,
                    critical: *critical,
                    element: *element,
                    hit_position: *hit_position,
                };

                if session.is_host() {
                    if report.source_player_id != sender {
                        warn!("player {sender} reported damage as player {source_player_id}");
                        return;
                    }
                    if report.target_is_player && !session.config().friendly_fire {
                        debug!("friendly fire from player {sender} dropped");
                        return;
                    }
                    session.broadcast_except(message, DeliveryMode::ReliableOrdered, sender);
                }

                if Some(report.source_player_id) != local_id {
                    adapter.apply_damage(&report);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{Call, FakeGame, FakeSession, Target};

    fn hit_player(source_player_id: PlayerId, target_id: i32) -> Message {
        Message::DamageDealt {
            source_player_id,
            target_id,
            target_is_player: true,
            damage: 12.0,
            critical: false,
            element: 0,
            hit_position: Vec3::ZERO,
        }
    }

    #[test]
    fn test_host_drops_friendly_fire_when_disabled() {
        let mut sync = CombatSync::new();
        let mut session = FakeSession::host(3);
        session.config.friendly_fire = false;
        let mut game = FakeGame::default();

        sync.handle_message(1, &hit_player(1, 2), &mut session, &mut game);
        assert!(session.sent.is_empty());
        assert!(game.calls.is_empty());
    }

    #[test]
    fn test_host_relays_friendly_fire_when_enabled() {
        let mut sync = CombatSync::new();
        let mut session = FakeSession::host(3);
        session.config.friendly_fire = true;
        let mut game = FakeGame::default();

        sync.handle_message(1, &hit_player(1, 2), &mut session, &mut game);
        let sent = session.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, Target::AllExcept(1));
        assert_eq!(game.calls, vec![Call::Damage(1, 2)]);
    }

    #[test]
    fn test_host_drops_spoofed_damage() {
        let mut sync = CombatSync::new();
        let mut session = FakeSession::host(3);
        session.config.friendly_fire = true;
        let mut game = FakeGame::default();

        sync.handle_message(2, &hit_player(1, 0), &mut session, &mut game);
        assert!(session.sent.is_empty());
    }

    #[test]
    fn test_local_friendly_fire_refused_on_host() {
        let mut sync = CombatSync::new();
        let mut session = FakeSession::host(2);
        session.config.friendly_fire = false;

        let sent = sync
            .report_damage(1, true, 5.0, false, 0, Vec3::ZERO, &mut session)
            .unwrap();
        assert!(!sent);
        let sent = sync
            .report_damage(40, false, 5.0, false, 0, Vec3::ZERO, &mut session)
            .unwrap();
        assert!(sent);
        assert_eq!(session.sent.len(), 1);
    }

    #[test]
    fn test_remote_weapon_fire_forwarded() {
        let mut sync = CombatSync::new();
        let mut session = FakeSession::client(1, 3);
        let mut game = FakeGame::default();
        let fire = |player_id| Message::WeaponFire {
            player_id,
            weapon_id: 3,
            direction: Vec3::X,
            position: Vec3::ZERO,
        };

        sync.handle_message(0, &fire(2), &mut session, &mut game);
        sync.handle_message(0, &fire(1), &mut session, &mut game);
        assert_eq!(game.calls, vec![Call::WeaponFire(2, 3)]);
    }

    #[test]
    fn test_projectile_ids_increase() {
        let mut sync = CombatSync::new();
        let mut session = FakeSession::client(1, 2);
        let a = sync
            .spawn_projectile(0, Vec3::ZERO, Vec3::X, 1.0, 0, &mut session)
            .unwrap();
        let b = sync
            .spawn_projectile(0, Vec3::ZERO, Vec3::X, 1.0, 0, &mut session)
            .unwrap();
        assert_eq!((a, b), (1, 2));
        assert!(session.sent.iter().all(|s| s.mode == DeliveryMode::ReliableUnordered));
    }
}
