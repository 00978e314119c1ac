use std::collections::HashMap;

use glam::Vec3;
use log::debug;

use coop::PlayerId;
use coop::sync::{
    CombatAdapter, DamageReport, EnemyAdapter, EnemySnapshot, EntityHandle, ItemAdapter,
    LocalPlayerState, MapAdapter, MapState, PlayerAdapter, PlayerHealth, SyncedItem,
};

const WALK_RADIUS: f32 = 5.0;
const WALK_SPEED: f32 = 0.5;
const ARENA_HALF_EXTENT: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    RemotePlayer(PlayerId),
    Enemy(i32),
    Item(i32),
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub kind: EntityKind,
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Stand-in for a game engine: a flat arena that keeps track of whatever
/// the synchronizers ask it to spawn.
#[derive(Debug, Default)]
pub struct HeadlessWorld {
    entities: HashMap<EntityHandle, Entity>,
    next_handle: u64,
    map: Option<MapState>,
    elapsed: f32,
}

impl HeadlessWorld {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, kind: EntityKind, position: Vec3, velocity: Vec3) -> EntityHandle {
        self.next_handle += 1;
        let handle = EntityHandle(self.next_handle);
        self.entities.insert(
            handle,
            Entity {
                kind,
                position,
                velocity,
            },
        );
        handle
    }

    /// Host side: an enemy the local simulation owns.
    pub fn spawn_wandering_enemy(
        &mut self,
        enemy_type: i32,
        position: Vec3,
        velocity: Vec3,
    ) -> EntityHandle {
        self.insert(EntityKind::Enemy(enemy_type), position, velocity)
    }

    pub fn count(&self, pred: impl Fn(&EntityKind) -> bool) -> usize {
        self.entities.values().filter(|e| pred(&e.kind)).count()
    }

    pub fn map(&self) -> Option<&MapState> {
        self.map.as_ref()
    }

    /// Moves owned enemies and bounces them off the arena walls.
    pub fn step(&mut self, dt: f32) {
        self.elapsed += dt;
        for entity in self.entities.values_mut() {
            if !matches!(entity.kind, EntityKind::Enemy(_)) || entity.velocity == Vec3::ZERO {
                continue;
            }
            entity.position += entity.velocity * dt;
            if entity.position.x.abs() > ARENA_HALF_EXTENT {
                entity.velocity.x = -entity.velocity.x;
            }
            if entity.position.z.abs() > ARENA_HALF_EXTENT {
                entity.velocity.z = -entity.velocity.z;
            }
        }
    }

    /// The local player walks a circle around the origin.
    pub fn local_player(&self) -> LocalPlayerState {
        let angle = self.elapsed * WALK_SPEED;
        let position = Vec3::new(angle.cos(), 0.0, angle.sin()) * WALK_RADIUS;
        let velocity = Vec3::new(-angle.sin(), 0.0, angle.cos()) * WALK_RADIUS * WALK_SPEED;
        LocalPlayerState {
            position,
            velocity,
            yaw_degrees: (-angle).to_degrees().rem_euclid(360.0),
            health: PlayerHealth {
                current: 100.0,
                max: 100.0,
                shield: 0.0,
                overheal: 0.0,
            },
        }
    }
}

impl PlayerAdapter for HeadlessWorld {
    fn spawn_remote_player(&mut self, player_id: PlayerId, position: Vec3) -> EntityHandle {
        debug!("remote player {player_id} appears at {position}");
        self.insert(EntityKind::RemotePlayer(player_id), position, Vec3::ZERO)
    }

    fn despawn_remote_player(&mut self, handle: EntityHandle) {
        self.entities.remove(&handle);
    }

    fn apply_transform(&mut self, handle: EntityHandle, position: Vec3, _yaw_degrees: f32) {
        if let Some(entity) = self.entities.get_mut(&handle) {
            entity.position = position;
        }
    }

    fn apply_health(&mut self, handle: EntityHandle, health: PlayerHealth) {
        debug!("{handle:?} health {}/{}", health.current, health.max);
    }

    fn on_player_death(
        &mut self,
        player_id: PlayerId,
        killer_id: Option<PlayerId>,
        _position: Vec3,
    ) {
        match killer_id {
            Some(killer) => debug!("player {player_id} killed by player {killer}"),
            None => debug!("player {player_id} died"),
        }
    }
}

impl EnemyAdapter for HeadlessWorld {
    fn enemy_state(&self, handle: EntityHandle) -> Option<EnemySnapshot> {
        self.entities.get(&handle).map(|e| EnemySnapshot {
            position: e.position,
            velocity: e.velocity,
            state: u8::from(e.velocity != Vec3::ZERO),
        })
    }

    fn spawn_enemy(&mut self, enemy_type: i32, position: Vec3, _health: f32) -> EntityHandle {
        self.insert(EntityKind::Enemy(enemy_type), position, Vec3::ZERO)
    }

    fn move_enemy(&mut self, handle: EntityHandle, position: Vec3) {
        if let Some(entity) = self.entities.get_mut(&handle) {
            entity.position = position;
        }
    }

    fn despawn_enemy(&mut self, handle: EntityHandle) {
        self.entities.remove(&handle);
    }

    fn award_rewards(&mut self, xp: i32, credits: i32) {
        debug!("earned {xp} xp and {credits} credits");
    }
}

impl ItemAdapter for HeadlessWorld {
    fn spawn_item(&mut self, item_type: i32, _rarity: u8, position: Vec3) -> EntityHandle {
        self.insert(EntityKind::Item(item_type), position, Vec3::ZERO)
    }

    fn remove_item(&mut self, handle: EntityHandle) {
        self.entities.remove(&handle);
    }

    fn on_item_picked_up(&mut self, item: &SyncedItem, by_local_player: bool) {
        if by_local_player {
            debug!("picked up item {} (type {})", item.net_id, item.item_type);
        }
    }
}

impl MapAdapter for HeadlessWorld {
    fn apply_map_seed(&mut self, map: &MapState) {
        debug!("generating level from seed {}", map.seed);
        self.map = Some(*map);
    }
}

impl CombatAdapter for HeadlessWorld {
    fn apply_damage(&mut self, report: &DamageReport) {
        debug!(
            "player {} hit {} for {}",
            report.source_player_id, report.target_id, report.damage
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enemies_stay_in_arena() {
        let mut world = HeadlessWorld::new();
        let handle = world.spawn_wandering_enemy(1, Vec3::ZERO, Vec3::new(8.0, 0.0, 3.0));
        for _ in 0..1000 {
            world.step(0.05);
        }
        let position = world.enemy_state(handle).unwrap().position;
        assert!(position.x.abs() <= ARENA_HALF_EXTENT + 1.0);
        assert!(position.z.abs() <= ARENA_HALF_EXTENT + 1.0);
    }

    #[test]
    fn test_local_player_walks_circle() {
        let mut world = HeadlessWorld::new();
        world.step(1.0);
        let state = world.local_player();
        assert!((state.position.length() - WALK_RADIUS).abs() < 1e-4);
    }
}
