use std::collections::BTreeMap;

use glam::Vec3;
use log::{debug, warn};

use super::{EntityHandle, SyncError};
use crate::net::{DeliveryMode, Message};
use crate::session::NetworkSession;
use crate::{HOST_PLAYER_ID, NetId, PlayerId};

/// Seconds a client waits for the host to confirm a pickup before it may
/// ask again.
pub const PICKUP_TIMEOUT: f32 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncedItem {
    pub net_id: NetId,
    pub item_type: i32,
    pub rarity: u8,
    pub position: Vec3,
    pub source_entity_id: i32,
    pub handle: EntityHandle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncedChest {
    pub net_id: NetId,
    pub room_id: i32,
    pub position: Vec3,
    pub handle: EntityHandle,
    pub opened: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LootDrop {
    pub item_type: i32,
    pub rarity: u8,
    pub position: Vec3,
}

pub trait ItemAdapter {
    fn spawn_item(&mut self, item_type: i32, rarity: u8, position: Vec3) -> EntityHandle;
    fn remove_item(&mut self, handle: EntityHandle);

    fn on_item_picked_up(&mut self, _item: &SyncedItem, _by_local_player: bool) {}
    fn open_chest(&mut self, _handle: EntityHandle, _player_id: PlayerId) {}

    /// Host side: what a chest drops when it opens.
    fn roll_chest_loot(&mut self, _chest: &SyncedChest) -> Vec<LootDrop> {
        Vec::new()
    }
}

#[derive(Debug)]
pub struct ItemSync {
    items: BTreeMap<NetId, SyncedItem>,
    chests: BTreeMap<NetId, SyncedChest>,
    pending_pickups: BTreeMap<NetId, f32>,
    next_item_id: NetId,
    next_chest_id: NetId,
}

impl Default for ItemSync {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            chests: BTreeMap::new(),
            pending_pickups: BTreeMap::new(),
            next_item_id: 1,
            next_chest_id: 1,
        }
    }
}

impl ItemSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(&self, net_id: NetId) -> Option<&SyncedItem> {
        self.items.get(&net_id)
    }

    pub fn chest(&self, net_id: NetId) -> Option<&SyncedChest> {
        self.chests.get(&net_id)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_pending(&self, net_id: NetId) -> bool {
        self.pending_pickups.contains_key(&net_id)
    }

    /// Host only. Registers an item the game has already placed in the world
    /// and announces it to every peer.
    pub fn spawn_item<S>(
        &mut self,
        handle: EntityHandle,
        item_type: i32,
        rarity: u8,
        position: Vec3,
        source_entity_id: i32,
        session: &mut S,
    ) -> Result<NetId, SyncError>
    where
        S: NetworkSession + ?Sized,
    {
        if !session.is_host() {
            return Err(SyncError::NotHost);
        }

        let net_id = self.next_item_id;
        self.next_item_id += 1;
        self.items.insert(
            net_id,
            SyncedItem {
                net_id,
                item_type,
                rarity,
                position,
                source_entity_id,
                handle,
            },
        );

        session.send(
            &Message::ItemSpawn {
                item_id: net_id,
                item_type,
                rarity,
                position,
                source_entity_id,
            },
            DeliveryMode::ReliableOrdered,
        );
        Ok(net_id)
    }

    /// Chests come from the seeded level generator, so every peer registers
    /// them in the same order and arrives at the same ids.
    pub fn register_chest(&mut self, handle: EntityHandle, room_id: i32, position: Vec3) -> NetId {
        let net_id = self.next_chest_id;
        self.next_chest_id += 1;
        self.chests.insert(
            net_id,
            SyncedChest {
                net_id,
                room_id,
                position,
                handle,
                opened: false,
            },
        );
        net_id
    }

    /// Asks to pick an item up. The host settles it on the spot; a client
    /// waits for the host's answer.
    pub fn request_pickup<S, A>(
        &mut self,
        item_id: NetId,
        session: &mut S,
        adapter: &mut A,
    ) -> Result<(), SyncError>
    where
        S: NetworkSession + ?Sized,
        A: ItemAdapter + ?Sized,
    {
        let Some(local_id) = session.local_player_id().filter(|_| session.is_connected()) else {
            return Err(SyncError::NotConnected);
        };
        if !self.items.contains_key(&item_id) {
            return Err(SyncError::Unknown {
                kind: "item",
                id: item_id,
            });
        }

        if session.is_host() {
            self.resolve_pickup(item_id, local_id, session, adapter);
            return Ok(());
        }

        if self.pending_pickups.contains_key(&item_id) {
            return Ok(());
        }
        self.pending_pickups.insert(item_id, 0.0);
        session.send(
            &Message::ItemPickup {
                item_id,
                player_id: local_id,
            },
            DeliveryMode::ReliableOrdered,
        );
        Ok(())
    }

    /// Awards the item to `player_id` if nobody has claimed it yet.
    fn resolve_pickup<S, A>(
        &mut self,
        item_id: NetId,
        player_id: PlayerId,
        session: &mut S,
        adapter: &mut A,
    ) -> bool
    where
        S: NetworkSession + ?Sized,
        A: ItemAdapter + ?Sized,
    {
        let Some(item) = self.items.remove(&item_id) else {
            debug!("item {item_id} already claimed, request from {player_id} refused");
            return false;
        };

        session.send(
            &Message::ItemPickup { item_id, player_id },
            DeliveryMode::ReliableOrdered,
        );
        adapter.remove_item(item.handle);
        adapter.on_item_picked_up(&item, session.local_player_id() == Some(player_id));
        true
    }

    pub fn request_chest_open<S, A>(
        &mut self,
        chest_id: NetId,
        session: &mut S,
        adapter: &mut A,
    ) -> Result<(), SyncError>
    where
        S: NetworkSession + ?Sized,
        A: ItemAdapter + ?Sized,
    {
        let Some(local_id) = session.local_player_id().filter(|_| session.is_connected()) else {
            return Err(SyncError::NotConnected);
        };
        let Some(chest) = self.chests.get(&chest_id) else {
            return Err(SyncError::Unknown {
                kind: "chest",
                id: chest_id,
            });
        };
        if chest.opened {
            return Ok(());
        }
        let room_id = chest.room_id;

        if session.is_host() {
            self.open_chest(chest_id, local_id, session, adapter);
        } else {
            session.send(
                &Message::ChestOpen {
                    chest_id,
                    player_id: local_id,
                    room_id,
                },
                DeliveryMode::ReliableOrdered,
            );
        }
        Ok(())
    }

    fn open_chest<S, A>(
        &mut self,
        chest_id: NetId,
        player_id: PlayerId,
        session: &mut S,
        adapter: &mut A,
    ) where
        S: NetworkSession + ?Sized,
        A: ItemAdapter + ?Sized,
    {
        let Some(chest) = self.chests.get_mut(&chest_id) else {
            warn!("player {player_id} opened unknown chest {chest_id}");
            return;
        };
        if chest.opened {
            return;
        }
        chest.opened = true;
        let chest = chest.clone();

        session.send(
            &Message::ChestOpen {
                chest_id,
                player_id,
                room_id: chest.room_id,
            },
            DeliveryMode::ReliableOrdered,
        );
        adapter.open_chest(chest.handle, player_id);

        for drop in adapter.roll_chest_loot(&chest) {
            let handle = adapter.spawn_item(drop.item_type, drop.rarity, drop.position);
            let spawned = self.spawn_item(
                handle,
                drop.item_type,
                drop.rarity,
                drop.position,
                chest_id,
                session,
            );
            if let Err(e) = spawned {
                warn!("chest {chest_id} loot not synced: {e}");
            }
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
        A: ItemAdapter + ?Sized,
    {
        let is_host = session.is_host();

        match message {
            Message::ItemSpawn {
                item_id,
                item_type,
                rarity,
                position,
                source_entity_id,
            } => {
                if is_host || sender != HOST_PLAYER_ID {
                    warn!("item spawn from player {sender} ignored");
                    return;
                }
                if self.items.contains_key(item_id) {
                    return;
                }
                let handle = adapter.spawn_item(*item_type, *rarity, *position);
                self.items.insert(
                    *item_id,
                    SyncedItem {
                        net_id: *item_id,
                        item_type: *item_type,
                        rarity: *rarity,
                        position: *position,
                        source_entity_id: *source_entity_id,
                        handle,
                    },
                );
            }
            Message::ItemPickup { item_id, player_id } => {
                if is_host {
                    if *player_id != sender {
                        warn!("player {sender} claimed a pickup for player {player_id}");
                    }
                    self.resolve_pickup(*item_id, sender, session, adapter);
                    return;
                }
                self.pending_pickups.remove(item_id);
                if let Some(item) = self.items.remove(item_id) {
                    adapter.remove_item(item.handle);
                    adapter.on_item_picked_up(&item, session.local_player_id() == Some(*player_id));
                }
            }
            Message::ChestOpen {
                chest_id,
                player_id,
                ..
            } => {
                if is_host {
                    self.open_chest(*chest_id, sender, session, adapter);
                    return;
                }
                match self.chests.get_mut(chest_id) {
                    Some(chest) if !chest.opened => {
                        chest.opened = true;
                        adapter.open_chest(chest.handle, *player_id);
                    }
                    Some(_) => {}
                    None => debug!("open for unknown chest {chest_id}"),
                }
            }
            _ => {}
        }
    }

    /// Expires pickup requests the host never answered.
    pub fn update(&mut self, dt: f32) {
        for age in self.pending_pickups.values_mut() {
            *age += dt;
        }
        self.pending_pickups.retain(|item_id, age| {
            let keep = *age < PICKUP_TIMEOUT;
            if !keep {
                debug!("pickup of item {item_id} timed out");
            }
            keep
        });
    }

    /// Item ids keep counting so a late pickup from the previous run cannot
    /// claim a new item. Chest ids restart because every peer regenerates
    /// the level and registers its chests in the same order again.
    pub fn clear(&mut self) {
        self.items.clear();
        self.chests.clear();
        self.pending_pickups.clear();
        self.next_chest_id = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{Call, FakeGame, FakeSession, Target};

    fn host_with_item() -> (ItemSync, FakeSession, NetId) {
        let mut sync = ItemSync::new();
        let mut session = FakeSession::host(3);
        let id = sync
            .spawn_item(EntityHandle(9), 4, 2, Vec3::ONE, -1, &mut session)
            .unwrap();
        session.take_sent();
        (sync, session, id)
    }

    #[test]
    fn test_only_host_spawns_items() {
        let mut sync = ItemSync::new();
        let mut session = FakeSession::client(1, 2);
        assert_eq!(
            sync.spawn_item(EntityHandle(1), 0, 0, Vec3::ZERO, -1, &mut session),
            Err(SyncError::NotHost)
        );
    }

    #[test]
    fn test_simultaneous_pickups_confirm_once() {
        let (mut sync, mut session, id) = host_with_item();
        let mut game = FakeGame::default();

        for player_id in [1, 2] {
            sync.handle_message(
                player_id,
                &Message::ItemPickup {
                    item_id: id,
                    player_id,
                },
                &mut session,
                &mut game,
            );
        }

        let sent = session.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, Target::All);
        assert_eq!(
            sent[0].message,
            Message::ItemPickup {
                item_id: id,
                player_id: 1,
            }
        );
        assert_eq!(game.count(|c| matches!(c, Call::RemoveItem(_))), 1);
        assert!(sync.item(id).is_none());
    }

    #[test]
    fn test_host_pickup_resolves_immediately() {
        let (mut sync, mut session, id) = host_with_item();
        let mut game = FakeGame::default();

        sync.request_pickup(id, &mut session, &mut game).unwrap();
        assert_eq!(game.calls, vec![Call::RemoveItem(EntityHandle(9)), Call::PickedUp(id, true)]);
        assert_eq!(session.take_sent().len(), 1);
    }

    #[test]
    fn test_client_pickup_waits_for_host() {
        let mut sync = ItemSync::new();
        let mut session = FakeSession::client(2, 3);
        let mut game = FakeGame::default();
        sync.handle_message(
            0,
            &Message::ItemSpawn {
                item_id: 5,
                item_type: 1,
                rarity: 0,
                position: Vec3::ZERO,
                source_entity_id: -1,
            },
            &mut session,
            &mut game,
        );

        sync.request_pickup(5, &mut session, &mut game).unwrap();
        sync.request_pickup(5, &mut session, &mut game).unwrap();
        assert_eq!(session.take_sent().len(), 1);
        assert!(sync.is_pending(5));
        assert!(sync.item(5).is_some());

        sync.handle_message(
            0,
            &Message::ItemPickup {
                item_id: 5,
                player_id: 2,
            },
            &mut session,
            &mut game,
        );
        assert!(!sync.is_pending(5));
        assert!(sync.item(5).is_none());
        assert_eq!(game.count(|c| matches!(c, Call::PickedUp(5, true))), 1);
    }

    #[test]
    fn test_pending_pickup_expires() {
        let mut sync = ItemSync::new();
        let mut session = FakeSession::client(1, 2);
        let mut game = FakeGame::default();
        sync.handle_message(
            0,
            &Message::ItemSpawn {
                item_id: 1,
                item_type: 1,
                rarity: 0,
                position: Vec3::ZERO,
                source_entity_id: -1,
            },
            &mut session,
            &mut game,
        );
        sync.request_pickup(1, &mut session, &mut game).unwrap();

        sync.update(1.5);
        assert!(sync.is_pending(1));
        sync.update(1.0);
        assert!(!sync.is_pending(1));

        sync.request_pickup(1, &mut session, &mut game).unwrap();
        assert_eq!(session.take_sent().len(), 2);
    }

    #[test]
    fn test_unknown_item_pickup() {
        let mut sync = ItemSync::new();
        let mut session = FakeSession::client(1, 2);
        let mut game = FakeGame::default();
        assert_eq!(
            sync.request_pickup(3, &mut session, &mut game),
            Err(SyncError::Unknown { kind: "item", id: 3 })
        );
    }

    #[test]
    fn test_chest_ids_follow_registration_order() {
        let mut a = ItemSync::new();
        let mut b = ItemSync::new();
        for room in 0..3 {
            assert_eq!(
                a.register_chest(EntityHandle(room as u64), room, Vec3::ZERO),
                b.register_chest(EntityHandle(100 + room as u64), room, Vec3::ZERO)
            );
        }
    }

    #[test]
    fn test_chest_opens_once_and_drops_loot() {
        let mut sync = ItemSync::new();
        let mut session = FakeSession::host(2);
        let mut game = FakeGame {
            loot: vec![LootDrop {
                item_type: 8,
                rarity: 3,
                position: Vec3::ZERO,
            }],
            ..Default::default()
        };
        let chest = sync.register_chest(EntityHandle(50), 2, Vec3::ZERO);

        let open = Message::ChestOpen {
            chest_id: chest,
            player_id: 1,
            room_id: 2,
        };
        sync.handle_message(1, &open, &mut session, &mut game);
        sync.handle_message(1, &open, &mut session, &mut game);

        let sent = session.take_sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0].message, Message::ChestOpen { .. }));
        assert!(matches!(
            sent[1].message,
            Message::ItemSpawn {
                item_type: 8,
                source_entity_id,
                ..
            } if source_entity_id == chest
        ));
        assert_eq!(game.count(|c| matches!(c, Call::OpenChest(_, 1))), 1);
        assert!(sync.chest(chest).unwrap().opened);
    }

    #[test]
    fn test_item_ids_survive_clear() {
        let (mut sync, mut session, first) = host_with_item();
        sync.register_chest(EntityHandle(1), 0, Vec3::ZERO);
        sync.clear();

        assert_eq!(sync.register_chest(EntityHandle(2), 0, Vec3::ZERO), 1);
        let second = sync
            .spawn_item(EntityHandle(3), 0, 0, Vec3::ZERO, -1, &mut session)
            .unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_stale_pickup_after_clear_misses_new_item() {
        let (mut sync, mut session, old) = host_with_item();
        let mut game = FakeGame::default();
        sync.clear();
        let new = sync
            .spawn_item(EntityHandle(4), 1, 0, Vec3::ZERO, -1, &mut session)
            .unwrap();
        session.take_sent();

        sync.handle_message(
            1,
            &Message::ItemPickup {
                item_id: old,
                player_id: 1,
            },
            &mut session,
            &mut game,
        );
        assert!(session.take_sent().is_empty());
        assert!(sync.item(new).is_some());
    }
}
