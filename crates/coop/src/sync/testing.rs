use glam::Vec3;

use super::*;
use crate::config::CoopConfig;
use crate::net::DeliveryMode;

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    All,
    AllExcept(PlayerId),
    Player(PlayerId),
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub target: Target,
    pub message: Message,
    pub mode: DeliveryMode,
}

pub struct FakeSession {
    pub host: bool,
    pub connected: bool,
    pub local_id: Option<PlayerId>,
    pub players: Vec<PlayerId>,
    pub config: CoopConfig,
    pub map_seed: i32,
    pub sent: Vec<Sent>,
}

impl FakeSession {
    pub fn host(players: usize) -> Self {
        Self {
            host: true,
            connected: true,
            local_id: Some(0),
            players: (0..players as PlayerId).collect(),
            config: CoopConfig::default(),
            map_seed: 0,
            sent: Vec::new(),
        }
    }

    pub fn client(local_id: PlayerId, players: usize) -> Self {
        Self {
            host: false,
            local_id: Some(local_id),
            ..Self::host(players)
        }
    }

    pub fn take_sent(&mut self) -> Vec<Sent> {
        std::mem::take(&mut self.sent)
    }
}

impl NetworkSession for FakeSession {
    fn is_host(&self) -> bool {
        self.host
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn local_player_id(&self) -> Option<PlayerId> {
        self.local_id
    }

    fn player_ids(&self) -> Vec<PlayerId> {
        self.players.clone()
    }

    fn config(&self) -> &CoopConfig {
        &self.config
    }

    fn send(&mut self, message: &Message, mode: DeliveryMode) {
        self.sent.push(Sent {
            target: Target::All,
            message: message.clone(),
            mode,
        });
    }

    fn send_to(&mut self, player_id: PlayerId, message: &Message, mode: DeliveryMode) {
        self.sent.push(Sent {
            target: Target::Player(player_id),
            message: message.clone(),
            mode,
        });
    }

    fn broadcast_except(&mut self, message: &Message, mode: DeliveryMode, exclude: PlayerId) {
        self.sent.push(Sent {
            target: Target::AllExcept(exclude),
            message: message.clone(),
            mode,
        });
    }

    fn set_map_seed(&mut self, seed: i32) {
        self.map_seed = seed;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SpawnPlayer(PlayerId),
    DespawnPlayer(EntityHandle),
    Transform(EntityHandle, Vec3, f32),
    Health(EntityHandle, PlayerHealth),
    Death(PlayerId, Option<PlayerId>),
    SpawnEnemy(i32, Vec3),
    MoveEnemy(EntityHandle, Vec3),
    DespawnEnemy(EntityHandle),
    Rewards(i32, i32),
    SpawnItem(i32, u8),
    RemoveItem(EntityHandle),
    PickedUp(NetId, bool),
    OpenChest(EntityHandle, PlayerId),
    MapSeed(i32),
    Room(PlayerId, i32, i32),
    WeaponFire(PlayerId, i32),
    Damage(PlayerId, i32),
}

#[derive(Default)]
pub struct FakeGame {
    pub calls: Vec<Call>,
    pub next_handle: u64,
    pub enemy_states: Vec<(EntityHandle, EnemySnapshot)>,
    pub loot: Vec<LootDrop>,
}

impl FakeGame {
    fn handle(&mut self) -> EntityHandle {
        self.next_handle += 1;
        EntityHandle(self.next_handle)
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

impl PlayerAdapter for FakeGame {
    fn spawn_remote_player(&mut self, player_id: PlayerId, _position: Vec3) -> EntityHandle {
        self.calls.push(Call::SpawnPlayer(player_id));
        self.handle()
    }

    fn despawn_remote_player(&mut self, handle: EntityHandle) {
        self.calls.push(Call::DespawnPlayer(handle));
    }

    fn apply_transform(&mut self, handle: EntityHandle, position: Vec3, yaw_degrees: f32) {
        self.calls.push(Call::Transform(handle, position, yaw_degrees));
    }

    fn apply_health(&mut self, handle: EntityHandle, health: PlayerHealth) {
        self.calls.push(Call::Health(handle, health));
    }

    fn on_player_death(
        &mut self,
        player_id: PlayerId,
        killer_id: Option<PlayerId>,
        _position: Vec3,
    ) {
        self.calls.push(Call::Death(player_id, killer_id));
    }
}

impl EnemyAdapter for FakeGame {
    fn enemy_state(&self, handle: EntityHandle) -> Option<EnemySnapshot> {
        self.enemy_states
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, s)| *s)
    }

    fn spawn_enemy(&mut self, enemy_type: i32, position: Vec3, _health: f32) -> EntityHandle {
        self.calls.push(Call::SpawnEnemy(enemy_type, position));
        self.handle()
    }

    fn move_enemy(&mut self, handle: EntityHandle, position: Vec3) {
        self.calls.push(Call::MoveEnemy(handle, position));
    }

    fn despawn_enemy(&mut self, handle: EntityHandle) {
        self.calls.push(Call::DespawnEnemy(handle));
    }

    fn award_rewards(&mut self, xp: i32, credits: i32) {
        self.calls.push(Call::Rewards(xp, credits));
    }
}

impl ItemAdapter for FakeGame {
    fn spawn_item(&mut self, item_type: i32, rarity: u8, _position: Vec3) -> EntityHandle {
        self.calls.push(Call::SpawnItem(item_type, rarity));
        self.handle()
    }

    fn remove_item(&mut self, handle: EntityHandle) {
        self.calls.push(Call::RemoveItem(handle));
    }

    fn on_item_picked_up(&mut self, item: &SyncedItem, by_local_player: bool) {
        self.calls.push(Call::PickedUp(item.net_id, by_local_player));
    }

    fn open_chest(&mut self, handle: EntityHandle, player_id: PlayerId) {
        self.calls.push(Call::OpenChest(handle, player_id));
    }

    fn roll_chest_loot(&mut self, _chest: &SyncedChest) -> Vec<LootDrop> {
        self.loot.clone()
    }
}

impl MapAdapter for FakeGame {
    fn apply_map_seed(&mut self, map: &MapState) {
        self.calls.push(Call::MapSeed(map.seed));
    }

    fn on_room_transition(&mut self, player_id: PlayerId, from_room: i32, to_room: i32) {
        self.calls.push(Call::Room(player_id, from_room, to_room));
    }
}

impl CombatAdapter for FakeGame {
    fn on_weapon_fire(
        &mut self,
        player_id: PlayerId,
        weapon_id: i32,
        _direction: Vec3,
        _position: Vec3,
    ) {
        self.calls.push(Call::WeaponFire(player_id, weapon_id));
    }

    fn apply_damage(&mut self, report: &DamageReport) {
        self.calls.push(Call::Damage(report.source_player_id, report.target_id));
    }
}
