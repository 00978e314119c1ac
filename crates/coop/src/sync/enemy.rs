use std::collections::BTreeMap;

use glam::Vec3;
use log::{debug, warn};

use super::{EntityHandle, SyncError};
use crate::net::{DeliveryMode, Message};
use crate::session::NetworkSession;
use crate::{HOST_PLAYER_ID, NetId, PlayerId};

pub const BASE_ENEMY_CAP: usize = 400;
pub const ENEMIES_PER_EXTRA_PLAYER: usize = 50;
pub const MAX_ENEMY_CAP: usize = 600;
pub const POSITION_SEND_INTERVAL: f32 = 1.0 / 30.0;
pub const POSITION_THRESHOLD: f32 = 0.1;
const CATCH_UP_RATE: f32 = 10.0;
const NO_KILLER: PlayerId = -1;

/// Live enemy budget for a session of `player_count` players.
pub fn enemy_cap(player_count: usize) -> usize {
    (BASE_ENEMY_CAP + ENEMIES_PER_EXTRA_PLAYER * player_count.saturating_sub(1)).min(MAX_ENEMY_CAP)
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnemySnapshot {
    pub position: Vec3,
    pub velocity: Vec3,
    pub state: u8,
}

pub trait EnemyAdapter {
    /// Host side: where the game currently has the enemy. None once it is gone.
    fn enemy_state(&self, handle: EntityHandle) -> Option<EnemySnapshot>;

    fn spawn_enemy(&mut self, enemy_type: i32, position: Vec3, health: f32) -> EntityHandle;
    fn move_enemy(&mut self, handle: EntityHandle, position: Vec3);
    fn despawn_enemy(&mut self, handle: EntityHandle);

    fn award_rewards(&mut self, _xp: i32, _credits: i32) {}
}

#[derive(Debug, Clone)]
pub struct SyncedEnemy {
    pub net_id: NetId,
    pub enemy_type: i32,
    pub handle: EntityHandle,
    pub room_id: i32,
    pub health: f32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub state: u8,
    target: Vec3,
    last_sent: Vec3,
}

#[derive(Debug)]
pub struct EnemySync {
    enemies: BTreeMap<NetId, SyncedEnemy>,
    next_net_id: NetId,
    send_timer: f32,
}

impl Default for EnemySync {
    fn default() -> Self {
        Self {
            enemies: BTreeMap::new(),
            next_net_id: 1,
            send_timer: 0.0,
        }
    }
}

impl EnemySync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, net_id: NetId) -> Option<&SyncedEnemy> {
        self.enemies.get(&net_id)
    }

    pub fn len(&self) -> usize {
        self.enemies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enemies.is_empty()
    }

    /// Host only. Assigns a network id and announces the enemy to every peer.
    pub fn register_enemy<S>(
        &mut self,
        handle: EntityHandle,
        enemy_type: i32,
        room_id: i32,
        position: Vec3,
        health: f32,
        session: &mut S,
    ) -> Result<NetId, SyncError>
    where
        S: NetworkSession + ?Sized,
    {
        if !session.is_host() {
            return Err(SyncError::NotHost);
        }
        let cap = enemy_cap(session.player_count());
        if self.enemies.len() >= cap {
            debug!("enemy cap {cap} reached, type {enemy_type} not synced");
            return Err(SyncError::EnemyCapReached(cap));
        }

        let net_id = self.next_net_id;
        self.next_net_id += 1;

        self.enemies.insert(
            net_id,
            SyncedEnemy {
                net_id,
                enemy_type,
                handle,
                room_id,
                health,
                position,
                velocity: Vec3::ZERO,
                state: 0,
                target: position,
                last_sent: position,
            },
        );

        session.send(
            &Message::EnemySpawn {
                enemy_id: net_id,
                enemy_type,
                position,
                health,
                room_id,
            },
            DeliveryMode::ReliableOrdered,
        );
        Ok(net_id)
    }

    /// Host only. Rewards are scaled by the configured XP multiplier before
    /// they go out.
    pub fn notify_enemy_death<S>(
        &mut self,
        net_id: NetId,
        killer_id: PlayerId,
        xp_reward: i32,
        credit_reward: i32,
        session: &mut S,
    ) -> Result<(), SyncError>
    where
        S: NetworkSession + ?Sized,
    {
        if !session.is_host() {
            return Err(SyncError::NotHost);
        }
        if self.enemies.remove(&net_id).is_none() {
            return Err(SyncError::Unknown {
                kind: "enemy",
                id: net_id,
            });
        }

        let xp_reward = (xp_reward as f32 * session.config().xp_multiplier).round() as i32;
        session.send(
            &Message::EnemyDeath {
                enemy_id: net_id,
                killer_id,
                xp_reward,
                credit_reward,
            },
            DeliveryMode::ReliableOrdered,
        );
        Ok(())
    }

    /// Host only. Removes an enemy that left the game without being killed,
    /// such as one culled with its room. Peers despawn it with no rewards.
    pub fn despawn_enemy<S>(&mut self, net_id: NetId, session: &mut S) -> Result<(), SyncError>
    where
        S: NetworkSession + ?Sized,
    {
        if !session.is_host() {
            return Err(SyncError::NotHost);
        }
        if self.enemies.remove(&net_id).is_none() {
            return Err(SyncError::Unknown {
                kind: "enemy",
                id: net_id,
            });
        }
        send_despawn(net_id, session);
        Ok(())
    }

    pub fn update<S, A>(&mut self, dt: f32, session: &mut S, adapter: &mut A)
    where
        S: NetworkSession + ?Sized,
        A: EnemyAdapter + ?Sized,
    {
        if !session.is_connected() {
            return;
        }
        if session.is_host() {
            self.send_positions(dt, session, adapter);
        } else {
            self.follow_targets(dt, adapter);
        }
    }

    fn send_positions<S, A>(&mut self, dt: f32, session: &mut S, adapter: &A)
    where
        S: NetworkSession + ?Sized,
        A: EnemyAdapter + ?Sized,
    {
        self.send_timer += dt;
        if self.send_timer < POSITION_SEND_INTERVAL {
            return;
        }
        self.send_timer = 0.0;

        let mut gone = Vec::new();
        for enemy in self.enemies.values_mut() {
            let Some(snapshot) = adapter.enemy_state(enemy.handle) else {
                gone.push(enemy.net_id);
                continue;
            };
            enemy.position = snapshot.position;
            enemy.velocity = snapshot.velocity;
            enemy.state = snapshot.state;

            if enemy.last_sent.distance(snapshot.position) < POSITION_THRESHOLD {
                continue;
            }
            enemy.last_sent = snapshot.position;

            session.send(
                &Message::EnemyPosition {
                    enemy_id: enemy.net_id,
                    position: snapshot.position,
                    velocity: snapshot.velocity,
                    state: snapshot.state,
                },
                DeliveryMode::Unreliable,
            );
        }

        for net_id in gone {
            debug!("enemy {net_id} left the world without a kill");
            self.enemies.remove(&net_id);
            send_despawn(net_id, session);
        }
    }

    fn follow_targets<A>(&mut self, dt: f32, adapter: &mut A)
    where
        A: EnemyAdapter + ?Sized,
    {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }
        let blend = (CATCH_UP_RATE * dt).min(1.0);
        for enemy in self.enemies.values_mut() {
            let predicted = enemy.target + enemy.velocity * dt;
            enemy.position = enemy.position.lerp(predicted, blend);
            adapter.move_enemy(enemy.handle, enemy.position);
        }
    }

    pub fn handle_message<S, A>(
        &mut self,
        sender: PlayerId,
        message: &Message,
        session: &mut S,
        adapter: &mut A,
    ) where
        S: NetworkSession + ?Sized,
        A: EnemyAdapter + ?Sized,
    {
        if session.is_host() || sender != HOST_PLAYER_ID {
            warn!("{:?} from player {sender} ignored", message.message_type());
            return;
        }

        match message {
            Message::EnemySpawn {
                enemy_id,
                enemy_type,
                position,
                health,
                room_id,
            } => {
                if self.enemies.contains_key(enemy_id) {
                    debug!("duplicate spawn for enemy {enemy_id}");
                    return;
                }
                let handle = adapter.spawn_enemy(*enemy_type, *position, *health);
                self.enemies.insert(
                    *enemy_id,
                    SyncedEnemy {
                        net_id: *enemy_id,
                        enemy_type: *enemy_type,
                        handle,
                        room_id: *room_id,
                        health: *health,
                        position: *position,
                        velocity: Vec3::ZERO,
                        state: 0,
                        target: *position,
                        last_sent: *position,
                    },
                );
            }
            Message::EnemyPosition {
                enemy_id,
                position,
                velocity,
                state,
            } => {
                if let Some(enemy) = self.enemies.get_mut(enemy_id) {
                    enemy.target = *position;
                    enemy.velocity = *velocity;
                    enemy.state = *state;
                }
            }
            Message::EnemyDeath {
                enemy_id,
                killer_id,
                xp_reward,
                credit_reward,
            } => {
                let Some(enemy) = self.enemies.remove(enemy_id) else {
                    debug!("death for unknown enemy {enemy_id}");
                    return;
                };
                adapter.despawn_enemy(enemy.handle);
                if session.local_player_id() == Some(*killer_id) {
                    adapter.award_rewards(*xp_reward, *credit_reward);
                }
            }
            _ => {}
        }
    }

    /// Drops every synced enemy. Ids keep counting up so a stale message
    /// can never land on a new enemy.
    pub fn clear<A>(&mut self, adapter: &mut A)
    where
        A: EnemyAdapter + ?Sized,
    {
        for (_, enemy) in std::mem::take(&mut self.enemies) {
            adapter.despawn_enemy(enemy.handle);
        }
        self.send_timer = 0.0;
    }
}

fn send_despawn<S>(net_id: NetId, session: &mut S)
where
    S: NetworkSession + ?Sized,
{
    session.send(
        &Message::EnemyDeath {
            enemy_id: net_id,
            killer_id: NO_KILLER,
            xp_reward: 0,
            credit_reward: 0,
        },
        DeliveryMode::ReliableOrdered,
    );
}
