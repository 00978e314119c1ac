use std::collections::{BTreeMap, VecDeque};

use glam::{EulerRot, Quat, Vec3};
use log::{debug, trace};

use super::EntityHandle;
use crate::PlayerId;
use crate::net::{DeliveryMode, Message};
use crate::session::NetworkSession;

pub const HEALTH_SEND_INTERVAL: f32 = 0.1;
pub const POSITION_THRESHOLD: f32 = 0.01;
pub const HEALTH_THRESHOLD: f32 = 0.1;
pub const MAX_BUFFERED_SNAPSHOTS: usize = 20;

/// Used as the segment length when two snapshots carry the same timestamp.
const FALLBACK_SEGMENT_SECS: f32 = 0.016;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerHealth {
    pub current: f32,
    pub max: f32,
    pub shield: f32,
    pub overheal: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationState {
    pub animation_id: i32,
    pub animation_time: f32,
    pub grounded: bool,
    pub move_speed: f32,
}

/// What the game reports about the local player each frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalPlayerState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw_degrees: f32,
    pub health: PlayerHealth,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSnapshot {
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw_degrees: f32,
    pub timestamp_ms: u32,
}

pub trait PlayerAdapter {
    fn spawn_remote_player(&mut self, player_id: PlayerId, position: Vec3) -> EntityHandle;
    fn despawn_remote_player(&mut self, handle: EntityHandle);
    fn apply_transform(&mut self, handle: EntityHandle, position: Vec3, yaw_degrees: f32);

    fn apply_health(&mut self, _handle: EntityHandle, _health: PlayerHealth) {}
    fn apply_animation(&mut self, _handle: EntityHandle, _animation: &AnimationState) {}
    fn apply_stats(&mut self, _player_id: PlayerId, _stats: &[(i32, f32)]) {}
    fn on_player_death(
        &mut self,
        _player_id: PlayerId,
        _killer_id: Option<PlayerId>,
        _position: Vec3,
    ) {
    }
}

/// Time-ordered snapshots for one remote player, rendered by walking the
/// segment between the two oldest entries.
#[derive(Debug)]
pub struct InterpolationBuffer {
    snapshots: VecDeque<PositionSnapshot>,
    capacity: usize,
    elapsed: f32,
}

impl Default for InterpolationBuffer {
    fn default() -> Self {
        Self::new(MAX_BUFFERED_SNAPSHOTS)
    }
}

impl InterpolationBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
            elapsed: 0.0,
        }
    }

    /// Returns false when the snapshot is older than the newest one held.
    pub fn push(&mut self, snapshot: PositionSnapshot) -> bool {
        if self
            .snapshots
            .back()
            .is_some_and(|newest| snapshot.timestamp_ms < newest.timestamp_ms)
        {
            return false;
        }

        if self.snapshots.len() >= self.capacity {
            self.snapshots.pop_front();
            self.elapsed = 0.0;
        }
        self.snapshots.push_back(snapshot);
        true
    }

    /// Advances the render clock and returns the interpolated position and
    /// yaw, or None with fewer than two snapshots.
    pub fn advance(&mut self, dt: f32) -> Option<(Vec3, f32)> {
        if self.snapshots.len() < 2 {
            return None;
        }
        if dt.is_finite() && dt > 0.0 {
            self.elapsed += dt;
        }

        let from = self.snapshots[0];
        let to = self.snapshots[1];

        let mut duration = to.timestamp_ms.wrapping_sub(from.timestamp_ms) as f32 / 1000.0;
        if duration <= 0.0 {
            duration = FALLBACK_SEGMENT_SECS;
        }
        let t = (self.elapsed / duration).clamp(0.0, 1.0);

        let position = from.position.lerp(to.position, t);
        let yaw = slerp_yaw(from.yaw_degrees, to.yaw_degrees, t);

        if t >= 1.0 && self.snapshots.len() > 2 {
            self.snapshots.pop_front();
            self.elapsed = 0.0;
        }

        Some((position, yaw))
    }

    pub fn latest(&self) -> Option<&PositionSnapshot> {
        self.snapshots.back()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.elapsed = 0.0;
    }
}

/// Shortest-arc rotation between two headings, in degrees within [0, 360).
fn slerp_yaw(from_degrees: f32, to_degrees: f32, t: f32) -> f32 {
    let from = Quat::from_rotation_y(from_degrees.to_radians());
    let to = Quat::from_rotation_y(to_degrees.to_radians());
    let (yaw, _, _) = from.slerp(to, t).to_euler(EulerRot::YXZ);
    yaw.to_degrees().rem_euclid(360.0)
}

#[derive(Debug)]
pub struct RemotePlayer {
    pub player_id: PlayerId,
    pub handle: EntityHandle,
    pub position: Vec3,
    pub yaw_degrees: f32,
    pub health: Option<PlayerHealth>,
    buffer: InterpolationBuffer,
}

impl RemotePlayer {
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Sends the local player's transform and health, and renders everyone else's.
#[derive(Debug, Default)]
pub struct PlayerSync {
    remotes: BTreeMap<PlayerId, RemotePlayer>,
    position_timer: f32,
    health_timer: f32,
    last_sent_position: Option<Vec3>,
    last_sent_health: Option<f32>,
    clock: f64,
}

impl PlayerSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remote(&self, player_id: PlayerId) -> Option<&RemotePlayer> {
        self.remotes.get(&player_id)
    }

    pub fn remotes(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.remotes.values()
    }

    pub fn update<S, A>(
        &mut self,
        dt: f32,
        local: Option<&LocalPlayerState>,
        session: &mut S,
        adapter: &mut A,
    ) where
        S: NetworkSession + ?Sized,
        A: PlayerAdapter + ?Sized,
    {
        if !session.is_connected() {
            return;
        }
        if dt.is_finite() && dt > 0.0 {
            self.clock += dt as f64;
        }

        if let (Some(local), Some(local_id)) = (local, session.local_player_id()) {
            self.send_position(dt, local_id, local, session);
            self.send_health(dt, local_id, &local.health, session);
        }

        for remote in self.remotes.values_mut() {
            if let Some((position, yaw)) = remote.buffer.advance(dt) {
                remote.position = position;
                remote.yaw_degrees = yaw;
                adapter.apply_transform(remote.handle, position, yaw);
            }
        }
    }

    fn timestamp_ms(&self) -> u32 {
        (self.clock * 1000.0) as u64 as u32
    }

    fn send_position<S>(
        &mut self,
        dt: f32,
        local_id: PlayerId,
        local: &LocalPlayerState,
        session: &mut S,
    ) where
        S: NetworkSession + ?Sized,
    {
        // One position per simulation tick.
        let interval = 1.0 / session.config().tick_rate.max(1) as f32;
        self.position_timer += dt;
        if self.position_timer < interval {
            return;
        }
        self.position_timer = 0.0;

        if self
            .last_sent_position
            .is_some_and(|last| last.distance(local.position) < POSITION_THRESHOLD)
        {
            return;
        }
        self.last_sent_position = Some(local.position);

        session.send(
            &Message::PlayerPosition {
                player_id: local_id,
                position: local.position,
                velocity: local.velocity,
                rotation_y: local.yaw_degrees,
                timestamp_ms: self.timestamp_ms(),
            },
            DeliveryMode::Unreliable,
        );
    }

    fn send_health<S>(
        &mut self,
        dt: f32,
        local_id: PlayerId,
        health: &PlayerHealth,
        session: &mut S,
    ) where
        S: NetworkSession + ?Sized,
    {
        self.health_timer += dt;
        if self.health_timer < HEALTH_SEND_INTERVAL {
            return;
        }
        self.health_timer = 0.0;

        if self
            .last_sent_health
            .is_some_and(|last| (last - health.current).abs() < HEALTH_THRESHOLD)
        {
            return;
        }
        self.last_sent_health = Some(health.current);

        session.send(
            &Message::PlayerHealth {
                player_id: local_id,
                current: health.current,
                max: health.max,
                shield: health.shield,
                overheal: health.overheal,
            },
            DeliveryMode::ReliableOrdered,
        );
    }

    pub fn send_animation<S>(&mut self, animation: &AnimationState, session: &mut S)
    where
        S: NetworkSession + ?Sized,
    {
        let Some(player_id) = session.local_player_id() else {
            return;
        };
        session.send(
            &Message::PlayerAnimation {
                player_id,
                animation_id: animation.animation_id,
                animation_time: animation.animation_time,
                grounded: animation.grounded,
                move_speed: animation.move_speed,
            },
            DeliveryMode::Sequenced,
        );
    }

    pub fn send_stats<S>(&mut self, stats: &[(i32, f32)], session: &mut S)
    where
        S: NetworkSession + ?Sized,
    {
        let Some(player_id) = session.local_player_id() else {
            return;
        };
        session.send(
            &Message::PlayerStats {
                player_id,
                stats: stats.to_vec(),
            },
            DeliveryMode::ReliableOrdered,
        );
    }

    pub fn notify_death<S>(&mut self, killer_id: Option<PlayerId>, position: Vec3, session: &mut S)
    where
        S: NetworkSession + ?Sized,
    {
        let Some(player_id) = session.local_player_id() else {
            return;
        };
        session.send(
            &Message::PlayerDeath {
                player_id,
                killer_id: killer_id.unwrap_or(-1),
                position,
            },
            DeliveryMode::ReliableOrdered,
        );
    }

    pub fn handle_message<S, A>(&mut self, message: &Message, session: &mut S, adapter: &mut A)
    where
        S: NetworkSession + ?Sized,
        A: PlayerAdapter + ?Sized,
    {
        let local_id = session.local_player_id();

        match message {
            Message::PlayerPosition {
                player_id,
                position,
                velocity,
                rotation_y,
                timestamp_ms,
            } => {
                if Some(*player_id) == local_id {
                    return;
                }
                // A position can outrun the leave notice; never resurrect a
                // player the session no longer knows.
                if !self.remotes.contains_key(player_id)
                    && !session.player_ids().contains(player_id)
                {
                    trace!("position for absent player {player_id} dropped");
                    return;
                }
                let remote = self.remotes.entry(*player_id).or_insert_with(|| {
                    debug!("spawning remote player {player_id}");
                    RemotePlayer {
                        player_id: *player_id,
                        handle: adapter.spawn_remote_player(*player_id, *position),
                        position: *position,
                        yaw_degrees: *rotation_y,
                        health: None,
                        buffer: InterpolationBuffer::default(),
                    }
                });
                let accepted = remote.buffer.push(PositionSnapshot {
                    position: *position,
                    velocity: *velocity,
                    yaw_degrees: *rotation_y,
                    timestamp_ms: *timestamp_ms,
                });
                if !accepted {
                    trace!("stale position from player {player_id} dropped");
                }
            }
            Message::PlayerHealth {
                player_id,
                current,
                max,
                shield,
                overheal,
            } => {
                if let Some(remote) = self.remotes.get_mut(player_id) {
                    let health = PlayerHealth {
                        current: *current,
                        max: *max,
                        shield: *shield,
                        overheal: *overheal,
                    };
                    remote.health = Some(health);
                    adapter.apply_health(remote.handle, health);
                }
            }
            Message::PlayerAnimation {
                player_id,
                animation_id,
                animation_time,
                grounded,
                move_speed,
            } => {
                if let Some(remote) = self.remotes.get(player_id) {
                    adapter.apply_animation(
                        remote.handle,
                        &AnimationState {
                            animation_id: *animation_id,
                            animation_time: *animation_time,
                            grounded: *grounded,
                            move_speed: *move_speed,
                        },
                    );
                }
            }
            Message::PlayerStats { player_id, stats } => {
                if Some(*player_id) != local_id {
                    adapter.apply_stats(*player_id, stats);
                }
            }
            Message::PlayerDeath {
                player_id,
                killer_id,
                position,
            } => {
                if Some(*player_id) != local_id {
                    let killer = (*killer_id >= 0).then_some(*killer_id);
                    adapter.on_player_death(*player_id, killer, *position);
                }
            }
            _ => {}
        }
    }

    pub fn remove_player<A>(&mut self, player_id: PlayerId, adapter: &mut A)
    where
        A: PlayerAdapter + ?Sized,
    {
        if let Some(remote) = self.remotes.remove(&player_id) {
            debug!("despawning remote player {player_id}");
            adapter.despawn_remote_player(remote.handle);
        }
    }

    pub fn clear<A>(&mut self, adapter: &mut A)
    where
        A: PlayerAdapter + ?Sized,
    {
        for (_, remote) in std::mem::take(&mut self.remotes) {
            adapter.despawn_remote_player(remote.handle);
        }
        self.position_timer = 0.0;
        self.health_timer = 0.0;
        self.last_sent_position = None;
        self.last_sent_health = None;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::sync::testing::{Call, FakeGame, FakeSession};

    fn snapshot(x: f32, yaw: f32, timestamp_ms: u32) -> PositionSnapshot {
        PositionSnapshot {
            position: Vec3::new(x, 0.0, 0.0),
            velocity: Vec3::ZERO,
            yaw_degrees: yaw,
            timestamp_ms,
        }
    }

    fn position(player_id: PlayerId, x: f32, timestamp_ms: u32) -> Message {
        Message::PlayerPosition {
            player_id,
            position: Vec3::new(x, 0.0, 0.0),
            velocity: Vec3::ZERO,
            rotation_y: 0.0,
            timestamp_ms,
        }
    }

    #[test]
    fn test_single_snapshot_does_not_interpolate() {
        let mut buffer = InterpolationBuffer::default();
        buffer.push(snapshot(1.0, 0.0, 0));
        assert_eq!(buffer.advance(0.1), None);
    }

    #[test]
    fn test_interpolates_halfway() {
        let mut buffer = InterpolationBuffer::default();
        buffer.push(snapshot(0.0, 0.0, 0));
        buffer.push(snapshot(10.0, 90.0, 100));

        let (position, yaw) = buffer.advance(0.05).unwrap();
        assert!((position.x - 5.0).abs() < 1e-4);
        assert!((yaw - 45.0).abs() < 1e-2);
    }

    #[test]
    fn test_advances_past_finished_segment() {
        let mut buffer = InterpolationBuffer::default();
        buffer.push(snapshot(0.0, 0.0, 0));
        buffer.push(snapshot(1.0, 0.0, 100));
        buffer.push(snapshot(2.0, 0.0, 200));

        let (position, _) = buffer.advance(0.2).unwrap();
        assert_eq!(position.x, 1.0);
        assert_eq!(buffer.len(), 2);

        // The last two snapshots stay put once the end is reached.
        buffer.advance(1.0);
        buffer.advance(1.0);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_stale_snapshot_rejected() {
        let mut buffer = InterpolationBuffer::default();
        assert!(buffer.push(snapshot(0.0, 0.0, 100)));
        assert!(!buffer.push(snapshot(1.0, 0.0, 50)));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut buffer = InterpolationBuffer::default();
        for i in 0..50 {
            buffer.push(snapshot(i as f32, 0.0, i * 10));
        }
        assert_eq!(buffer.len(), MAX_BUFFERED_SNAPSHOTS);
        assert_eq!(buffer.latest().unwrap().timestamp_ms, 490);
    }

    #[test]
    fn test_equal_timestamps_use_fallback_segment() {
        let mut buffer = InterpolationBuffer::default();
        buffer.push(snapshot(0.0, 0.0, 100));
        buffer.push(snapshot(4.0, 0.0, 100));
        let (position, _) = buffer.advance(0.008).unwrap();
        assert!((position.x - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_yaw_takes_short_way_round() {
        let yaw = slerp_yaw(350.0, 10.0, 0.5);
        assert!(yaw < 0.5 || yaw > 359.5, "yaw was {yaw}");
    }

    #[test]
    fn test_position_sent_only_when_moved() {
        let mut sync = PlayerSync::new();
        let mut session = FakeSession::client(1, 2);
        let mut game = FakeGame::default();
        let state = LocalPlayerState::default();

        sync.update(0.02, Some(&state), &mut session, &mut game);
        let first = session.take_sent();
        assert!(first.iter().any(|s| matches!(s.message, Message::PlayerPosition { .. })));

        sync.update(0.02, Some(&state), &mut session, &mut game);
        assert!(
            !session
                .take_sent()
                .iter()
                .any(|s| matches!(s.message, Message::PlayerPosition { .. }))
        );

        let moved = LocalPlayerState {
            position: Vec3::new(1.0, 0.0, 0.0),
            ..state
        };
        sync.update(0.02, Some(&moved), &mut session, &mut game);
        let sent = session.take_sent();
        let position = sent
            .iter()
            .find(|s| matches!(s.message, Message::PlayerPosition { .. }))
            .unwrap();
        assert_eq!(position.mode, DeliveryMode::Unreliable);
    }

    #[test]
    fn test_position_rate_follows_tick_rate() {
        let positions_sent = |tick_rate: u32| {
            let mut game = FakeGame::default();
            let mut sync = PlayerSync::new();
            let mut session = FakeSession::client(1, 2);
            session.config.tick_rate = tick_rate;
            for i in 0..6 {
                let state = LocalPlayerState {
                    position: Vec3::new(i as f32, 0.0, 0.0),
                    ..Default::default()
                };
                sync.update(0.02, Some(&state), &mut session, &mut game);
            }
            session
                .take_sent()
                .iter()
                .filter(|s| matches!(s.message, Message::PlayerPosition { .. }))
                .count()
        };

        assert_eq!(positions_sent(60), 6);
        assert_eq!(positions_sent(20), 2);
    }

    #[test]
    fn test_health_sent_reliably_on_change() {
        let mut sync = PlayerSync::new();
        let mut session = FakeSession::client(1, 2);
        let mut game = FakeGame::default();
        let mut state = LocalPlayerState::default();
        state.health.current = 100.0;

        sync.update(0.1, Some(&state), &mut session, &mut game);
        let sent = session.take_sent();
        let health = sent
            .iter()
            .find(|s| matches!(s.message, Message::PlayerHealth { .. }))
            .unwrap();
        assert_eq!(health.mode, DeliveryMode::ReliableOrdered);

        state.health.current = 100.05;
        sync.update(0.1, Some(&state), &mut session, &mut game);
        assert!(
            !session
                .take_sent()
                .iter()
                .any(|s| matches!(s.message, Message::PlayerHealth { .. }))
        );
    }

    #[test]
    fn test_nothing_sent_while_disconnected() {
        let mut sync = PlayerSync::new();
        let mut session = FakeSession::client(1, 2);
        session.connected = false;
        let mut game = FakeGame::default();

        sync.update(1.0, Some(&LocalPlayerState::default()), &mut session, &mut game);
        assert!(session.sent.is_empty());
    }

    #[test]
    fn test_remote_spawned_once_and_despawned() {
        let mut sync = PlayerSync::new();
        let mut session = FakeSession::client(1, 3);
        let mut game = FakeGame::default();

        sync.handle_message(&position(2, 0.0, 0), &mut session, &mut game);
        sync.handle_message(&position(2, 1.0, 16), &mut session, &mut game);
        assert_eq!(game.count(|c| matches!(c, Call::SpawnPlayer(2))), 1);
        assert_eq!(sync.remote(2).unwrap().buffered(), 2);

        sync.update(0.016, None, &mut session, &mut game);
        assert_eq!(game.count(|c| matches!(c, Call::Transform(..))), 1);

        sync.remove_player(2, &mut game);
        assert!(sync.remote(2).is_none());
        assert_eq!(game.count(|c| matches!(c, Call::DespawnPlayer(_))), 1);
    }

    #[test]
    fn test_late_position_does_not_respawn_departed_player() {
        let mut sync = PlayerSync::new();
        let mut session = FakeSession::client(1, 3);
        let mut game = FakeGame::default();

        sync.handle_message(&position(2, 0.0, 0), &mut session, &mut game);
        session.players.retain(|&id| id != 2);
        sync.remove_player(2, &mut game);

        sync.handle_message(&position(2, 1.0, 16), &mut session, &mut game);
        assert!(sync.remote(2).is_none());
        assert_eq!(game.count(|c| matches!(c, Call::SpawnPlayer(2))), 1);
    }

    #[test]
    fn test_own_position_echo_ignored() {
        let mut sync = PlayerSync::new();
        let mut session = FakeSession::client(1, 2);
        let mut game = FakeGame::default();

        sync.handle_message(&position(1, 0.0, 0), &mut session, &mut game);
        assert!(sync.remote(1).is_none());
        assert!(game.calls.is_empty());
    }

    #[test]
    fn test_environment_death_has_no_killer() {
        let mut sync = PlayerSync::new();
        let mut session = FakeSession::client(1, 3);
        let mut game = FakeGame::default();

        sync.handle_message(
            &Message::PlayerDeath {
                player_id: 2,
                killer_id: -1,
                position: Vec3::ZERO,
            },
            &mut session,
            &mut game,
        );
        assert_eq!(game.calls, vec![Call::Death(2, None)]);
    }

    proptest! {
        #[test]
        fn interpolated_position_stays_on_segment(
            a in -1000.0f32..1000.0,
            b in -1000.0f32..1000.0,
            gap in 0u32..500,
            steps in prop::collection::vec(0.0f32..0.5, 1..20),
        ) {
            let mut buffer = InterpolationBuffer::default();
            buffer.push(snapshot(a, 0.0, 1000));
            buffer.push(snapshot(b, 0.0, 1000 + gap));

            let (lo, hi) = (a.min(b), a.max(b));
            for dt in steps {
                let (position, yaw) = buffer.advance(dt).unwrap();
                prop_assert!(position.x >= lo - 1e-3 && position.x <= hi + 1e-3);
                prop_assert!((0.0..=360.0).contains(&yaw));
            }
        }
    }
}
