//! Server-side monster entity.
//!
//! Monsters are shared between their behavior loop, movement continuations
//! and player-driven combat, so all mutable state sits behind a mutex or in
//! atomics. Updates are best-effort: a tick and a player hit racing on the
//! same monster may both act on a slightly stale view, which is accepted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use aisim_shared::{EntityRef, Faction, NpcTemplate, ServerMessage, SpawnTemplate, Vec2};

use crate::combat::DamageLedger;
use crate::movement::{Movable, MovementState};
use crate::services::CastScope;
use crate::task::lock;

/// What a monster is currently fighting. Being an enum, a monster can never
/// target a player and a companion at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Player character id
    Player(u64),
    /// Companion registry handle
    Companion(u16),
}

/// Mutable monster state
#[derive(Debug, Clone)]
pub struct MonsterState {
    pub position: Vec2,
    pub health: u32,
    pub mana: u32,
    pub target: Option<Target>,
    /// Players currently aware of this monster
    pub on_sight: HashSet<u64>,
    /// War objective tag
    pub faction: Option<Faction>,
    pub dead: bool,
    /// Dead and the kill not yet settled: late hits still earn credit
    pub settling: bool,
}

/// Result of applying damage to a monster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageApplied {
    pub damage: u32,
    pub health: u32,
    /// True only for the hit that took the monster from alive to dead
    pub killed: bool,
}

/// Server-side monster
#[derive(Debug)]
pub struct Monster {
    /// Stable identity, survives respawns
    pub id: u64,
    pub server: u16,
    pub map: u32,
    pub spawn: Arc<SpawnTemplate>,
    pub npc: Arc<NpcTemplate>,
    /// Registry handle, 0 while unbound
    handle: AtomicU16,
    removed: AtomicBool,
    state: Mutex<MonsterState>,
    movement: MovementState,
    ledger: DamageLedger,
}

impl Monster {
    pub fn new(
        id: u64,
        server: u16,
        spawn: Arc<SpawnTemplate>,
        npc: Arc<NpcTemplate>,
        position: Vec2,
    ) -> Self {
        Self {
            id,
            server,
            map: spawn.map_id,
            handle: AtomicU16::new(0),
            removed: AtomicBool::new(false),
            state: Mutex::new(MonsterState {
                position,
                health: npc.max_health,
                mana: npc.max_mana,
                target: None,
                on_sight: HashSet::new(),
                faction: spawn.faction,
                dead: false,
                settling: false,
            }),
            movement: MovementState::new(),
            ledger: DamageLedger::new(),
            spawn,
            npc,
        }
    }
    
    pub fn handle(&self) -> u16 {
        self.handle.load(Ordering::Acquire)
    }
    
    pub fn set_handle(&self, handle: u16) {
        self.handle.store(handle, Ordering::Release);
    }
    
    /// Locked access to the mutable state. Never hold it across an await.
    pub fn state(&self) -> MutexGuard<'_, MonsterState> {
        lock(&self.state)
    }
    
    pub fn snapshot(&self) -> MonsterState {
        self.state().clone()
    }
    
    pub fn ledger(&self) -> &DamageLedger {
        &self.ledger
    }
    
    pub fn health(&self) -> u32 {
        self.state().health
    }
    
    pub fn is_dead(&self) -> bool {
        self.state().dead
    }
    
    pub fn target(&self) -> Option<Target> {
        self.state().target
    }
    
    pub fn set_target(&self, target: Option<Target>) {
        self.state().target = target;
    }
    
    /// Whether the owning partition was torn down
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
    
    pub fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
        self.movement.cancel();
    }
    
    /// Take damage, clamping health at zero
    pub fn take_damage(&self, damage: u32) -> DamageApplied {
        let mut state = self.state();
        if state.dead {
            return DamageApplied { damage: 0, health: 0, killed: false };
        }
        let damage = damage.min(state.health);
        state.health -= damage;
        let killed = state.health == 0;
        if killed {
            state.dead = true;
            state.settling = true;
            state.target = None;
        }
        DamageApplied { damage, health: state.health, killed }
    }

    /// Credit a hit that arrived after the killing blow but before the kill
    /// was settled. Health stays at zero. False once settlement has begun.
    pub fn credit_late_hit(&self, attacker: u64, damage: u32) -> bool {
        let state = self.state();
        if !(state.dead && state.settling) {
            return false;
        }
        // under the state lock, so settlement cannot clear the ledger in between
        self.ledger.add(attacker, damage);
        true
    }

    /// Close the kill to late hits
    pub fn finish_settling(&self) {
        self.state().settling = false;
    }
    
    /// Spend mana for a skill; false if the pool is too low
    pub fn spend_mana(&self, cost: u32) -> bool {
        let mut state = self.state();
        if state.mana < cost {
            return false;
        }
        state.mana -= cost;
        true
    }
    
    pub fn regen_mana(&self, amount: u32) {
        let mut state = self.state();
        state.mana = (state.mana + amount).min(self.npc.max_mana);
    }
    
    /// Spawn announcement with the current state
    pub fn spawn_message(&self) -> ServerMessage {
        let state = self.state();
        ServerMessage::MonsterSpawn {
            handle: self.handle(),
            monster_id: self.id,
            npc_id: self.npc.id,
            position: state.position,
            health: state.health,
            max_health: self.npc.max_health,
            level: self.npc.level,
        }
    }
    
    /// Bring a dead monster back with full pools at `position`
    pub fn reset_for_respawn(&self, position: Vec2) {
        let mut state = self.state();
        state.position = position;
        state.health = self.npc.max_health;
        state.mana = self.npc.max_mana;
        state.target = None;
        state.on_sight.clear();
        state.dead = false;
        state.settling = false;
    }
}

impl Movable for Monster {
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
        EntityRef::Monster(self.handle())
    }
    
    fn cast_scope(&self) -> CastScope {
        CastScope::Near { server: self.server, map: self.map, position: self.position() }
    }
}
