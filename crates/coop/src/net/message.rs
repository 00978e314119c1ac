use bytes::Bytes;
use glam::Vec3;

use super::codec::{DecodeError, WireReader, WireWriter};
use crate::{NetId, PlayerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ConnectRequest = 0,
    ConnectAccept = 1,
    Disconnect = 2,
    Heartbeat = 3,

    PlayerJoin = 20,
    PlayerLeave = 21,
    PlayerReady = 22,
    SessionStart = 23,

    PlayerPosition = 40,
    PlayerAnimation = 41,
    PlayerHealth = 42,
    PlayerStats = 43,
    PlayerDeath = 44,

    WeaponFire = 60,
    ProjectileSpawn = 61,
    DamageDealt = 64,

    EnemySpawn = 80,
    EnemyPosition = 81,
    EnemyDeath = 82,

    ItemSpawn = 100,
    ItemPickup = 101,
    ChestOpen = 102,

    MapSeed = 120,
    RoomTransition = 121,

    ChatMessage = 140,
    Ping = 141,
}

impl MessageType {
    pub const ALL: [MessageType; 26] = [
        MessageType::ConnectRequest,
        MessageType::ConnectAccept,
        MessageType::Disconnect,
        MessageType::Heartbeat,
        MessageType::PlayerJoin,
        MessageType::PlayerLeave,
        MessageType::PlayerReady,
        MessageType::SessionStart,
        MessageType::PlayerPosition,
        MessageType::PlayerAnimation,
        MessageType::PlayerHealth,
        MessageType::PlayerStats,
        MessageType::PlayerDeath,
        MessageType::WeaponFire,
        MessageType::ProjectileSpawn,
        MessageType::DamageDealt,
        MessageType::EnemySpawn,
        MessageType::EnemyPosition,
        MessageType::EnemyDeath,
        MessageType::ItemSpawn,
        MessageType::ItemPickup,
        MessageType::ChestOpen,
        MessageType::MapSeed,
        MessageType::RoomTransition,
        MessageType::ChatMessage,
        MessageType::Ping,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.tag() == tag)
            .ok_or(DecodeError::UnknownType(tag))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ConnectRequest {
        player_name: String,
        version: String,
    },
    ConnectAccept {
        player_id: PlayerId,
        map_seed: i32,
    },
    Disconnect {
        reason: String,
    },
    Heartbeat {
        timestamp_ms: i64,
    },

    PlayerJoin {
        player_id: PlayerId,
        player_name: String,
        character_id: i32,
        skin_id: i32,
    },
    PlayerLeave {
        player_id: PlayerId,
        reason: String,
    },
    PlayerReady {
        player_id: PlayerId,
        ready: bool,
    },
    SessionStart {
        map_seed: i32,
        difficulty: i32,
        start_delay: f32,
    },

    PlayerPosition {
        player_id: PlayerId,
        position: Vec3,
        velocity: Vec3,
        rotation_y: f32,
        timestamp_ms: u32,
    },
    PlayerAnimation {
        player_id: PlayerId,
        animation_id: i32,
        animation_time: f32,
        grounded: bool,
        move_speed: f32,
    },
    PlayerHealth {
        player_id: PlayerId,
        current: f32,
        max: f32,
        shield: f32,
        overheal: f32,
    },
    PlayerStats {
        player_id: PlayerId,
        stats: Vec<(i32, f32)>,
    },
    PlayerDeath {
        player_id: PlayerId,
        /// -1 when the environment killed the player.
        killer_id: i32,
        position: Vec3,
    },

    WeaponFire {
        player_id: PlayerId,
        weapon_id: i32,
        direction: Vec3,
        position: Vec3,
    },
    ProjectileSpawn {
        projectile_id: NetId,
        owner_id: PlayerId,
        projectile_type: i32,
        position: Vec3,
        velocity: Vec3,
        damage: f32,
        element: u8,
    },
    DamageDealt {
        source_player_id: PlayerId,
        target_id: i32,
        target_is_player: bool,
        damage: f32,
        critical: bool,
        element: u8,
        hit_position: Vec3,
    },

    EnemySpawn {
        enemy_id: NetId,
        enemy_type: i32,
        position: Vec3,
        health: f32,
        room_id: i32,
    },
    EnemyPosition {
        enemy_id: NetId,
        position: Vec3,
        velocity: Vec3,
        state: u8,
    },
    EnemyDeath {
        enemy_id: NetId,
        killer_id: PlayerId,
        xp_reward: i32,
        credit_reward: i32,
    },

    ItemSpawn {
        item_id: NetId,
        item_type: i32,
        rarity: u8,
        position: Vec3,
        /// -1 for items that did not drop from a chest or enemy.
        source_entity_id: i32,
    },
    ItemPickup {
        item_id: NetId,
        player_id: PlayerId,
    },
    ChestOpen {
        chest_id: NetId,
        player_id: PlayerId,
        room_id: i32,
    },

    MapSeed {
        seed: i32,
        difficulty: i32,
        biome_id: i32,
    },
    RoomTransition {
        player_id: PlayerId,
        from_room: i32,
        to_room: i32,
    },

    ChatMessage {
        sender_id: PlayerId,
        message: String,
    },
    Ping {
        player_id: PlayerId,
        ping_type: u8,
        position: Vec3,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ConnectRequest { .. } => MessageType::ConnectRequest,
            Message::ConnectAccept { .. } => MessageType::ConnectAccept,
            Message::Disconnect { .. } => MessageType::Disconnect,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
            Message::PlayerJoin { .. } => MessageType::PlayerJoin,
            Message::PlayerLeave { .. } => MessageType::PlayerLeave,
            Message::PlayerReady { .. } => MessageType::PlayerReady,
            Message::SessionStart { .. } => MessageType::SessionStart,
            Message::PlayerPosition { .. } => MessageType::PlayerPosition,
            Message::PlayerAnimation { .. } => MessageType::PlayerAnimation,
            Message::PlayerHealth { .. } => MessageType::PlayerHealth,
            Message::PlayerStats { .. } => MessageType::PlayerStats,
            Message::PlayerDeath { .. } => MessageType::PlayerDeath,
            Message::WeaponFire { .. } => MessageType::WeaponFire,
            Message::ProjectileSpawn { .. } => MessageType::ProjectileSpawn,
            Message::DamageDealt { .. } => MessageType::DamageDealt,
            Message::EnemySpawn { .. } => MessageType::EnemySpawn,
            Message::EnemyPosition { .. } => MessageType::EnemyPosition,
            Message::EnemyDeath { .. } => MessageType::EnemyDeath,
            Message::ItemSpawn { .. } => MessageType::ItemSpawn,
            Message::ItemPickup { .. } => MessageType::ItemPickup,
            Message::ChestOpen { .. } => MessageType::ChestOpen,
            Message::MapSeed { .. } => MessageType::MapSeed,
            Message::RoomTransition { .. } => MessageType::RoomTransition,
            Message::ChatMessage { .. } => MessageType::ChatMessage,
            Message::Ping { .. } => MessageType::Ping,
        }
    }

    /// The player a peer-originated message speaks for. The host relays these
    /// to the other clients after checking the id against the sender.
    pub fn relayed_player(&self) -> Option<PlayerId> {
        match self {
            Message::PlayerReady { player_id, .. }
            | Message::PlayerPosition { player_id, .. }
            | Message::PlayerAnimation { player_id, .. }
            | Message::PlayerHealth { player_id, .. }
            | Message::PlayerStats { player_id, .. }
            | Message::PlayerDeath { player_id, .. }
            | Message::WeaponFire { player_id, .. }
            | Message::RoomTransition { player_id, .. }
            | Message::Ping { player_id, .. } => Some(*player_id),
            Message::ProjectileSpawn { owner_id, .. } => Some(*owner_id),
            Message::ChatMessage { sender_id, .. } => Some(*sender_id),
            _ => None,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.put_u8(self.message_type().tag());

        match self {
            Message::ConnectRequest {
                player_name,
                version,
            } => {
                w.put_str(player_name);
                w.put_str(version);
            }
            Message::ConnectAccept {
                player_id,
                map_seed,
            } => {
                w.put_i32(*player_id);
                w.put_i32(*map_seed);
            }
            Message::Disconnect { reason } => w.put_str(reason),
            Message::Heartbeat { timestamp_ms } => w.put_i64(*timestamp_ms),
            Message::PlayerJoin {
                player_id,
                player_name,
                character_id,
                skin_id,
            } => {
                w.put_i32(*player_id);
                w.put_str(player_name);
                w.put_i32(*character_id);
                w.put_i32(*skin_id);
            }
            Message::PlayerLeave { player_id, reason } => {
                w.put_i32(*player_id);
                w.put_str(reason);
            }
            Message::PlayerReady { player_id, ready } => {
                w.put_i32(*player_id);
                w.put_bool(*ready);
            }
            Message::SessionStart {
                map_seed,
                difficulty,
                start_delay,
            } => {
                w.put_i32(*map_seed);
                w.put_i32(*difficulty);
                w.put_f32(*start_delay);
            }
            Message::PlayerPosition {
                player_id,
                position,
                velocity,
                rotation_y,
                timestamp_ms,
            } => {
                w.put_i32(*player_id);
                w.put_vec3(*position);
                w.put_vec3(*velocity);
                w.put_f32(*rotation_y);
                w.put_u32(*timestamp_ms);
            }
            Message::PlayerAnimation {
                player_id,
                animation_id,
                animation_time,
                grounded,
                move_speed,
            } => {
                w.put_i32(*player_id);
                w.put_i32(*animation_id);
                w.put_f32(*animation_time);
                w.put_bool(*grounded);
                w.put_f32(*move_speed);
            }
            Message::PlayerHealth {
                player_id,
                current,
                max,
                shield,
                overheal,
            } => {
                w.put_i32(*player_id);
                w.put_f32(*current);
                w.put_f32(*max);
                w.put_f32(*shield);
                w.put_f32(*overheal);
            }
            Message::PlayerStats { player_id, stats } => {
                w.put_i32(*player_id);
                w.put_i32(stats.len() as i32);
                for (stat_id, value) in stats {
                    w.put_i32(*stat_id);
                    w.put_f32(*value);
                }
            }
            Message::PlayerDeath {
                player_id,
                killer_id,
                position,
            } => {
                w.put_i32(*player_id);
                w.put_i32(*killer_id);
                w.put_vec3(*position);
            }
            Message::WeaponFire {
                player_id,
                weapon_id,
                direction,
                position,
            } => {
                w.put_i32(*player_id);
                w.put_i32(*weapon_id);
                w.put_vec3(*direction);
                w.put_vec3(*position);
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
                w.put_i32(*projectile_id);
                w.put_i32(*owner_id);
                w.put_i32(*projectile_type);
                w.put_vec3(*position);
                w.put_vec3(*velocity);
                w.put_f32(*damage);
                w.put_u8(*element);
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
                w.put_i32(*source_player_id);
                w.put_i32(*target_id);
                w.put_bool(*target_is_player);
                w.put_f32(*damage);
                w.put_bool(*critical);
                w.put_u8(*element);
                w.put_vec3(*hit_position);
            }
            Message::EnemySpawn {
                enemy_id,
                enemy_type,
                position,
                health,
                room_id,
            } => {
                w.put_i32(*enemy_id);
                w.put_i32(*enemy_type);
                w.put_vec3(*position);
                w.put_f32(*health);
                w.put_i32(*room_id);
            }
            Message::EnemyPosition {
                enemy_id,
                position,
                velocity,
                state,
            } => {
                w.put_i32(*enemy_id);
                w.put_vec3(*position);
                w.put_vec3(*velocity);
                w.put_u8(*state);
            }
            Message::EnemyDeath {
                enemy_id,
                killer_id,
                xp_reward,
                credit_reward,
            } => {
                w.put_i32(*enemy_id);
                w.put_i32(*killer_id);
                w.put_i32(*xp_reward);
                w.put_i32(*credit_reward);
            }
            Message::ItemSpawn {
                item_id,
                item_type,
                rarity,
                position,
                source_entity_id,
            } => {
                w.put_i32(*item_id);
                w.put_i32(*item_type);
                w.put_u8(*rarity);
                w.put_vec3(*position);
                w.put_i32(*source_entity_id);
            }
            Message::ItemPickup { item_id, player_id } => {
                w.put_i32(*item_id);
                w.put_i32(*player_id);
            }
            Message::ChestOpen {
                chest_id,
                player_id,
                room_id,
            } => {
                w.put_i32(*chest_id);
                w.put_i32(*player_id);
                w.put_i32(*room_id);
            }
            Message::MapSeed {
                seed,
                difficulty,
                biome_id,
            } => {
                w.put_i32(*seed);
                w.put_i32(*difficulty);
                w.put_i32(*biome_id);
            }
            Message::RoomTransition {
                player_id,
                from_room,
                to_room,
            } => {
                w.put_i32(*player_id);
                w.put_i32(*from_room);
                w.put_i32(*to_room);
            }
            Message::ChatMessage { sender_id, message } => {
                w.put_i32(*sender_id);
                w.put_str(message);
            }
            Message::Ping {
                player_id,
                ping_type,
                position,
            } => {
                w.put_i32(*player_id);
                w.put_u8(*ping_type);
                w.put_vec3(*position);
            }
        }

        w.finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let (&tag, body) = data.split_first().ok_or(DecodeError::Empty)?;
        let mut r = WireReader::new(body);

        let message = match MessageType::try_from(tag)? {
            MessageType::ConnectRequest => Message::ConnectRequest {
                player_name: r.get_string()?,
                version: r.get_string()?,
            },
            MessageType::ConnectAccept => Message::ConnectAccept {
                player_id: r.get_i32()?,
                map_seed: r.get_i32()?,
            },
            MessageType::Disconnect => Message::Disconnect {
                reason: r.get_string()?,
            },
            MessageType::Heartbeat => Message::Heartbeat {
                timestamp_ms: r.get_i64()?,
            },
            MessageType::PlayerJoin => Message::PlayerJoin {
                player_id: r.get_i32()?,
                player_name: r.get_string()?,
                character_id: r.get_i32()?,
                skin_id: r.get_i32()?,
            },
            MessageType::PlayerLeave => Message::PlayerLeave {
                player_id: r.get_i32()?,
                reason: r.get_string()?,
            },
            MessageType::PlayerReady => Message::PlayerReady {
                player_id: r.get_i32()?,
                ready: r.get_bool()?,
            },
            MessageType::SessionStart => Message::SessionStart {
                map_seed: r.get_i32()?,
                difficulty: r.get_i32()?,
                start_delay: r.get_f32()?,
            },
            MessageType::PlayerPosition => Message::PlayerPosition {
                player_id: r.get_i32()?,
                position: r.get_vec3()?,
                velocity: r.get_vec3()?,
                rotation_y: r.get_f32()?,
                timestamp_ms: r.get_u32()?,
            },
            MessageType::PlayerAnimation => Message::PlayerAnimation {
                player_id: r.get_i32()?,
                animation_id: r.get_i32()?,
                animation_time: r.get_f32()?,
                grounded: r.get_bool()?,
                move_speed: r.get_f32()?,
            },
            MessageType::PlayerHealth => Message::PlayerHealth {
                player_id: r.get_i32()?,
                current: r.get_f32()?,
                max: r.get_f32()?,
                shield: r.get_f32()?,
                overheal: r.get_f32()?,
            },
            MessageType::PlayerStats => {
                let player_id = r.get_i32()?;
                let count =
                    usize::try_from(r.get_i32()?).map_err(|_| DecodeError::InvalidLength)?;
                if count > r.remaining() / 8 {
                    return Err(DecodeError::Truncated {
                        need: count.saturating_mul(8),
                        have: r.remaining(),
                    });
                }
                let mut stats = Vec::with_capacity(count);
                for _ in 0..count {
                    stats.push((r.get_i32()?, r.get_f32()?));
                }
                Message::PlayerStats { player_id, stats }
            }
            MessageType::PlayerDeath => Message::PlayerDeath {
                player_id: r.get_i32()?,
                killer_id: r.get_i32()?,
                position: r.get_vec3()?,
            },
            MessageType::WeaponFire => Message::WeaponFire {
                player_id: r.get_i32()?,
                weapon_id: r.get_i32()?,
                direction: r.get_vec3()?,
                position: r.get_vec3()?,
            },
            MessageType::ProjectileSpawn => Message::ProjectileSpawn {
                projectile_id: r.get_i32()?,
                owner_id: r.get_i32()?,
                projectile_type: r.get_i32()?,
                position: r.get_vec3()?,
                velocity: r.get_vec3()?,
                damage: r.get_f32()?,
                element: r.get_u8()?,
            },
            MessageType::DamageDealt => Message::DamageDealt {
                source_player_id: r.get_i32()?,
                target_id: r.get_i32()?,
                target_is_player: r.get_bool()?,
                damage: r.get_f32()?,
                critical: r.get_bool()?,
                element: r.get_u8()?,
                hit_position: r.get_vec3()?,
            },
            MessageType::EnemySpawn => Message::EnemySpawn {
                enemy_id: r.get_i32()?,
                enemy_type: r.get_i32()?,
                position: r.get_vec3()?,
                health: r.get_f32()?,
                room_id: r.get_i32()?,
            },
            MessageType::EnemyPosition => Message::EnemyPosition {
                enemy_id: r.get_i32()?,
                position: r.get_vec3()?,
                velocity: r.get_vec3()?,
                state: r.get_u8()?,
            },
            MessageType::EnemyDeath => Message::EnemyDeath {
                enemy_id: r.get_i32()?,
                killer_id: r.get_i32()?,
                xp_reward: r.get_i32()?,
                credit_reward: r.get_i32()?,
            },
            MessageType::ItemSpawn => Message::ItemSpawn {
                item_id: r.get_i32()?,
                item_type: r.get_i32()?,
                rarity: r.get_u8()?,
                position: r.get_vec3()?,
                source_entity_id: r.get_i32()?,
            },
            MessageType::ItemPickup => Message::ItemPickup {
                item_id: r.get_i32()?,
                player_id: r.get_i32()?,
            },
            MessageType::ChestOpen => Message::ChestOpen {
                chest_id: r.get_i32()?,
                player_id: r.get_i32()?,
                room_id: r.get_i32()?,
            },
            MessageType::MapSeed => Message::MapSeed {
                seed: r.get_i32()?,
                difficulty: r.get_i32()?,
                biome_id: r.get_i32()?,
            },
            MessageType::RoomTransition => Message::RoomTransition {
                player_id: r.get_i32()?,
                from_room: r.get_i32()?,
                to_room: r.get_i32()?,
            },
            MessageType::ChatMessage => Message::ChatMessage {
                sender_id: r.get_i32()?,
                message: r.get_string()?,
            },
            MessageType::Ping => Message::Ping {
                player_id: r.get_i32()?,
                ping_type: r.get_u8()?,
                position: r.get_vec3()?,
            },
        };

        r.finish()?;
        Ok(message)
    }
}
