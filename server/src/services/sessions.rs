//! Character/session lookup.
//!
//! Players are owned by the session layer. The simulation reads snapshots of
//! them and asks the session layer to apply damage and rewards.

use std::collections::HashMap;
use std::sync::RwLock;

use aisim_shared::{AttackKind, Faction, Vec2};

use crate::task::{read, write};

/// Aggregated combat stats of a player (computed by the equipment layer)
#[derive(Debug, Clone, Default)]
pub struct CombatStats {
    pub min_attack: u32,
    pub max_attack: u32,
    pub min_arts_attack: u32,
    pub max_arts_attack: u32,
    pub defense: u32,
    pub arts_defense: u32,
    pub accuracy: u32,
    pub dodge: u32,
}

impl CombatStats {
    pub fn attack_range_for(&self, kind: AttackKind) -> (u32, u32) {
        match kind {
            AttackKind::Physical => (self.min_attack, self.max_attack),
            AttackKind::Arts => (self.min_arts_attack, self.max_arts_attack),
        }
    }
    
    pub fn defense_for(&self, kind: AttackKind) -> u32 {
        match kind {
            AttackKind::Physical => self.defense,
            AttackKind::Arts => self.arts_defense,
        }
    }
}

/// Point-in-time view of a player
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub id: u64,
    pub server: u16,
    pub map: u32,
    pub position: Vec2,
    pub health: u32,
    pub level: u16,
    pub faction: Faction,
    pub invisible: bool,
    pub online: bool,
    pub stats: CombatStats,
    /// Personal drop rate multiplier (1.0 = normal)
    pub drop_multiplier: f64,
}

impl PlayerSnapshot {
    pub fn is_on(&self, server: u16, map: u32) -> bool {
        self.online && self.server == server && self.map == map
    }
}

pub trait Sessions: Send + Sync {
    fn player(&self, id: u64) -> Option<PlayerSnapshot>;
    
    /// Online players of a partition within `radius` of `position`
    fn players_near(&self, server: u16, map: u32, position: Vec2, radius: f32) -> Vec<PlayerSnapshot>;
    
    /// Apply damage, returning the player's new health (None if gone)
    fn apply_damage(&self, id: u64, damage: u32) -> Option<u32>;
    
    fn award_experience(&self, id: u64, amount: u64);
}

/// In-memory session table
#[derive(Debug, Default)]
pub struct SessionTable {
    players: RwLock<HashMap<u64, PlayerSnapshot>>,
    experience: RwLock<HashMap<u64, u64>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Insert or replace a player
    pub fn upsert(&self, player: PlayerSnapshot) {
        write(&self.players).insert(player.id, player);
    }
    
    /// Mark a player as disconnected
    pub fn disconnect(&self, id: u64) {
        if let Some(player) = write(&self.players).get_mut(&id) {
            player.online = false;
        }
    }
    
    pub fn set_position(&self, id: u64, map: u32, position: Vec2) {
        if let Some(player) = write(&self.players).get_mut(&id) {
            player.map = map;
            player.position = position;
        }
    }
    
    pub fn experience(&self, id: u64) -> u64 {
        read(&self.experience).get(&id).copied().unwrap_or(0)
    }
}

impl Sessions for SessionTable {
    fn player(&self, id: u64) -> Option<PlayerSnapshot> {
        read(&self.players).get(&id).cloned()
    }
    
    fn players_near(&self, server: u16, map: u32, position: Vec2, radius: f32) -> Vec<PlayerSnapshot> {
        read(&self.players)
            .values()
            .filter(|p| p.is_on(server, map) && p.position.distance_to(position) <= radius)
            .cloned()
            .collect()
    }
    
    fn apply_damage(&self, id: u64, damage: u32) -> Option<u32> {
        let mut players = write(&self.players);
        let player = players.get_mut(&id)?;
        player.health = player.health.saturating_sub(damage);
        Some(player.health)
    }
    
    fn award_experience(&self, id: u64, amount: u64) {
        *write(&self.experience).entry(id).or_insert(0) += amount;
    }
}
