//! Reward delivery: direct inventory placement and timed world drops.
//!
//! A world drop goes through three phases: an owner-only claim window, an
//! open pickup window, then expiry removal. Window lengths come from config.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use log::debug;
use thiserror::Error;

use aisim_shared::{ServerMessage, Vec2};

use super::{Broadcaster, CastScope};
use crate::task::{lock, read, spawn_guarded, write};

/// An item handed out by the loot resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardItem {
    pub item_id: u32,
    pub quantity: u32,
    /// Upgrade level
    pub plus: u8,
}

/// Request to place an item visibly in the world
#[derive(Debug, Clone)]
pub struct WorldDrop {
    pub item: RewardItem,
    pub server: u16,
    pub map: u32,
    pub position: Vec2,
    /// Player with exclusive pickup rights during the claim window
    pub owner: u64,
}

pub trait Inventory: Send + Sync {
    /// Put an item straight into a player's inventory
    fn give(&self, player: u64, item: RewardItem);

    /// Spawn a timed world drop
    fn spawn_world_drop(&self, drop: WorldDrop);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPhase {
    OwnerOnly,
    Open,
}

/// An item lying in the world
#[derive(Debug, Clone)]
pub struct WorldItem {
    pub entity_id: u64,
    pub drop: WorldDrop,
    pub phase: DropPhase,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PickupError {
    #[error("item {0} is not on the ground")]
    NotFound(u64),
    #[error("item {0} is still reserved for its owner")]
    Reserved(u64),
}

/// In-memory inventories and world drops
pub struct InMemoryInventory {
    bags: RwLock<HashMap<u64, Vec<RewardItem>>>,
    world_items: Arc<Mutex<HashMap<u64, WorldItem>>>,
    next_item_id: AtomicU64,
    broadcaster: Arc<dyn Broadcaster>,
    claim_window: Duration,
    open_window: Duration,
}

impl InMemoryInventory {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, claim_window: Duration, open_window: Duration) -> Self {
        Self {
            bags: RwLock::new(HashMap::new()),
            world_items: Arc::new(Mutex::new(HashMap::new())),
            next_item_id: AtomicU64::new(20000),
            broadcaster,
            claim_window,
            open_window,
        }
    }

    /// Items a player received directly
    pub fn bag(&self, player: u64) -> Vec<RewardItem> {
        read(&self.bags).get(&player).cloned().unwrap_or_default()
    }

    /// Items currently on the ground
    pub fn world_items(&self) -> Vec<WorldItem> {
        lock(&self.world_items).values().cloned().collect()
    }

    /// Pick up an item from the world
    pub fn pickup(&self, player: u64, entity_id: u64) -> Result<RewardItem, PickupError> {
        let item = {
            let mut items = lock(&self.world_items);
            let item = items.get(&entity_id).ok_or(PickupError::NotFound(entity_id))?;
            if item.phase == DropPhase::OwnerOnly && item.drop.owner != player {
                return Err(PickupError::Reserved(entity_id));
            }
            items.remove(&entity_id).ok_or(PickupError::NotFound(entity_id))?
        };

        self.broadcaster.cast(
            CastScope::Near { server: item.drop.server, map: item.drop.map, position: item.drop.position },
            ServerMessage::ItemDespawn { entity_id },
        );
        self.give(player, item.drop.item.clone());
        Ok(item.drop.item)
    }
}

impl Inventory for InMemoryInventory {
    fn give(&self, player: u64, item: RewardItem) {
        debug!("Player {} received item {} x{}", player, item.item_id, item.quantity);
        write(&self.bags).entry(player).or_default().push(item);
    }

    fn spawn_world_drop(&self, drop: WorldDrop) {
        let entity_id = self.next_item_id.fetch_add(1, Ordering::Relaxed);
        let scope = CastScope::Near { server: drop.server, map: drop.map, position: drop.position };

        self.broadcaster.cast(scope, ServerMessage::ItemSpawn {
            entity_id,
            item_id: drop.item.item_id,
            quantity: drop.item.quantity,
            plus: drop.item.plus,
            position: drop.position,
            owner_id: Some(drop.owner),
        });
        lock(&self.world_items).insert(entity_id, WorldItem {
            entity_id,
            drop,
            phase: DropPhase::OwnerOnly,
        });

        let world_items = self.world_items.clone();
        let broadcaster = self.broadcaster.clone();
        let (claim, open) = (self.claim_window, self.open_window);
        spawn_guarded(format!("world drop {}", entity_id), async move {
            tokio::time::sleep(claim).await;
            if let Some(item) = lock(&world_items).get_mut(&entity_id) {
                item.phase = DropPhase::Open;
            }

            tokio::time::sleep(open).await;
            if lock(&world_items).remove(&entity_id).is_some() {
                debug!("World drop {} expired", entity_id);
                broadcaster.cast(scope, ServerMessage::ItemDespawn { entity_id });
            }
        });
    }
}
