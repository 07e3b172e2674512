//! Companion pets owned by players.
//!
//! Companions are driven by their owner's session; the simulation only moves
//! them, lets monsters target them, and credits their hits to the owner.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard};

use aisim_shared::{AttackKind, EntityRef, Faction, Vec2};

use crate::movement::{Movable, MovementState};
use crate::services::CastScope;
use crate::task::lock;

/// Fixed companion stats, provided by the owner's session when summoned
#[derive(Debug, Clone)]
pub struct CompanionStats {
    pub level: u16,
    pub max_health: u32,
    pub min_attack: u32,
    pub max_attack: u32,
    pub defense: u32,
    pub arts_defense: u32,
    /// Combat pets fight; others only follow their owner around
    pub combat: bool,
}

#[derive(Debug, Clone)]
pub struct CompanionState {
    pub position: Vec2,
    pub health: u32,
}

#[derive(Debug)]
pub struct Companion {
    pub id: u64,
    /// Owning player character id
    pub owner: u64,
    pub owner_faction: Option<Faction>,
    pub server: u16,
    pub map: u32,
    pub stats: CompanionStats,
    handle: AtomicU16,
    state: Mutex<CompanionState>,
    movement: MovementState,
}

impl Companion {
    pub fn new(
        id: u64,
        owner: u64,
        owner_faction: Option<Faction>,
        server: u16,
        map: u32,
        position: Vec2,
        stats: CompanionStats,
    ) -> Self {
        Self {
            id,
            owner,
            owner_faction,
            server,
            map,
            handle: AtomicU16::new(0),
            state: Mutex::new(CompanionState { position, health: stats.max_health }),
            movement: MovementState::new(),
            stats,
        }
    }
    
    pub fn handle(&self) -> u16 {
        self.handle.load(Ordering::Acquire)
    }
    
    pub fn set_handle(&self, handle: u16) {
        self.handle.store(handle, Ordering::Release);
    }
    
    pub fn state(&self) -> MutexGuard<'_, CompanionState> {
        lock(&self.state)
    }
    
    pub fn health(&self) -> u32 {
        self.state().health
    }
    
    pub fn is_alive(&self) -> bool {
        self.health() > 0
    }
    
    pub fn defense_for(&self, kind: AttackKind) -> u32 {
        match kind {
            AttackKind::Physical => self.stats.defense,
            AttackKind::Arts => self.stats.arts_defense,
        }
    }
    
    /// Take damage, returns (damage applied, remaining health)
    pub fn take_damage(&self, damage: u32) -> (u32, u32) {
        let mut state = self.state();
        let damage = damage.min(state.health);
        state.health -= damage;
        (damage, state.health)
    }
}

impl Movable for Companion {
    fn movement(&self) -> &MovementState {
        &self.movement
    }
    
    fn position(&self) -> Vec2 {
        self.state().position
    }
    
    fn set_position(&self, position: Vec2) {
        self.state().position = position;
    }
    
    fn entity_ref(&self) -> EntityRef {
        EntityRef::Companion(self.handle())
    }
    
    fn cast_scope(&self) -> CastScope {
        CastScope::Near { server: self.server, map: self.map, position: self.position() }
    }
}
