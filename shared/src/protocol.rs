//! Broadcast payloads and small enums shared between the simulation and the
//! session layer. Byte framing of these messages belongs to the network layer.

use serde::{Deserialize, Serialize};

use crate::Vec2;

/// Faction a player belongs to, or a war objective is tied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Faction {
    Red,
    Yellow,
    Blue,
}

/// Which attack and defense stats a hit uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttackKind {
    #[default]
    Physical,
    Arts,
}

/// Reference to any combatant visible on a map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    /// Player character id
    Player(u64),
    /// Monster registry handle
    Monster(u16),
    /// Companion registry handle
    Companion(u16),
}

// =============================================================================
// Server -> Client Messages
// =============================================================================

/// Messages the simulation casts to nearby observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Monster appeared (initial spawn or respawn)
    MonsterSpawn {
        handle: u16,
        monster_id: u64,
        npc_id: u32,
        position: Vec2,
        health: u32,
        max_health: u32,
        level: u16,
    },
    
    /// Monster removed from the map
    MonsterDespawn {
        handle: u16,
    },
    
    /// Entity started a straight-line move
    Move {
        entity: EntityRef,
        from: Vec2,
        to: Vec2,
        speed: f32,
    },
    
    /// Damage was dealt (zero damage means the hit was evaded)
    DamageEvent {
        attacker: EntityRef,
        target: EntityRef,
        damage: u32,
        target_new_health: u32,
        /// Skill used, if any
        skill_id: Option<u32>,
    },
    
    /// Entity died
    EntityDeath {
        entity: EntityRef,
        killer_id: Option<u64>,
    },
    
    /// Item dropped in the world
    ItemSpawn {
        entity_id: u64,
        item_id: u32,
        quantity: u32,
        plus: u8,
        position: Vec2,
        /// Player with exclusive pickup rights during the claim window
        owner_id: Option<u64>,
    },
    
    /// Item was picked up or expired
    ItemDespawn {
        entity_id: u64,
    },
}

impl ServerMessage {
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }
    
    pub fn deserialize(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
