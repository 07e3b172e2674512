//! Collaborator interfaces the simulation calls into, with the in-memory
//! implementations used by the standalone binary and the tests.

mod broadcast;
mod sessions;
mod inventory;

pub use broadcast::{Broadcaster, CastScope, ChannelBroadcaster};
pub use sessions::{CombatStats, PlayerSnapshot, Sessions, SessionTable};
pub use inventory::{DropPhase, InMemoryInventory, Inventory, PickupError, RewardItem, WorldDrop, WorldItem};

#[cfg(test)]
pub(crate) use sessions::test_support;
