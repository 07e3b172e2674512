//! Simulated world.
//!
//! `Simulation` owns the shared subsystems and is the entry point the session
//! layer calls into: spawning from templates, dungeon teardown, companions,
//! and player-initiated attacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info};
use rand::Rng;

use aisim_shared::{AttackKind, ServerMessage, SpawnTemplate, Vec2};

use crate::behavior::BehaviorScheduler;
use crate::combat::{CombatResolver, DeathPipeline, HitOutcome};
use crate::config::SimConfig;
use crate::content::WorldContent;
use crate::entities::{Companion, CompanionStats, Monster, RegisteredEntity};
use crate::error::{Result, SimError};
use crate::loot::LootResolver;
use crate::movement::{random_point_in, Movable, MovementInterpolator};
use crate::registry::EntityRegistry;
use crate::services::{Broadcaster, Inventory, PlayerSnapshot, Sessions};

/// External services the simulation talks to
pub struct Collaborators {
    pub content: Arc<dyn WorldContent>,
    pub sessions: Arc<dyn Sessions>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub inventory: Arc<dyn Inventory>,
}

/// The simulated world
pub struct Simulation {
    config: Arc<SimConfig>,
    content: Arc<dyn WorldContent>,
    sessions: Arc<dyn Sessions>,
    broadcaster: Arc<dyn Broadcaster>,
    registry: Arc<EntityRegistry<RegisteredEntity>>,
    movement: MovementInterpolator,
    combat: Arc<CombatResolver>,
    scheduler: Arc<BehaviorScheduler>,
    next_entity_id: AtomicU64,
}

impl Simulation {
    pub fn new(config: SimConfig, services: Collaborators) -> Self {
        let Collaborators { content, sessions, broadcaster, inventory } = services;
        let config = Arc::new(config);
        let registry = Arc::new(EntityRegistry::new());
        let movement = MovementInterpolator::new(broadcaster.clone(), config.movement_step());

        let loot = Arc::new(LootResolver::new(config.clone(), content.clone(), sessions.clone(), inventory));
        let death = Arc::new(DeathPipeline::new(
            config.clone(),
            sessions.clone(),
            broadcaster.clone(),
            registry.clone(),
            loot,
        ));
        let combat = Arc::new(CombatResolver::new(sessions.clone(), broadcaster.clone(), death));
        let scheduler = Arc::new(BehaviorScheduler::new(
            config.clone(),
            content.clone(),
            sessions.clone(),
            registry.clone(),
            combat.clone(),
            movement.clone(),
        ));

        Self {
            config,
            content,
            sessions,
            broadcaster,
            registry,
            movement,
            combat,
            scheduler,
            next_entity_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn registry(&self) -> &EntityRegistry<RegisteredEntity> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<BehaviorScheduler> {
        &self.scheduler
    }

    pub fn monster(&self, server: u16, map: u32, handle: u16) -> Option<Arc<Monster>> {
        self.registry.lookup(server, map, handle)?.as_monster().cloned()
    }

    pub fn companion(&self, server: u16, map: u32, handle: u16) -> Option<Arc<Companion>> {
        self.registry.lookup(server, map, handle)?.as_companion().cloned()
    }

    fn next_id(&self) -> u64 {
        self.next_entity_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawn one monster of a template and start its behavior loop.
    /// Without an explicit position it appears at a random point of the box.
    pub fn spawn_monster(&self, server: u16, spawn: Arc<SpawnTemplate>, position: Option<Vec2>) -> Result<Arc<Monster>> {
        let npc = self.content.npc(spawn.npc_id).ok_or(SimError::UnknownNpc(spawn.npc_id))?;
        let position = position.unwrap_or_else(|| random_point_in(&mut rand::thread_rng(), spawn.bounds));

        let monster = Arc::new(Monster::new(self.next_id(), server, spawn, npc, position));
        let handle = self.registry.allocate(server, monster.map, RegisteredEntity::Monster(monster.clone()))?;
        monster.set_handle(handle);

        self.broadcaster.cast(monster.cast_scope(), monster.spawn_message());
        self.scheduler.spawn_loop(monster.clone());
        debug!(
            "Spawned {} (monster {}) as handle {} on server {} map {}",
            monster.npc.name, monster.id, handle, server, monster.map
        );
        Ok(monster)
    }

    /// Spawn the full group of a spawn template
    pub fn spawn_group(&self, server: u16, template_id: u32) -> Result<Vec<Arc<Monster>>> {
        let spawn = self
            .content
            .spawn_template(template_id)
            .ok_or(SimError::UnknownSpawnTemplate(template_id))?;
        (0..spawn.count)
            .map(|_| self.spawn_monster(server, spawn.clone(), None))
            .collect()
    }

    /// Spawn every template of a server, or only those of one map (dungeon
    /// instance load). Failing templates are logged and skipped.
    pub fn populate(&self, server: u16, map: Option<u32>) -> usize {
        let mut total = 0;
        for spawn in self.content.spawn_templates() {
            if map.is_some_and(|map| map != spawn.map_id) {
                continue;
            }
            match self.spawn_group(server, spawn.id) {
                Ok(monsters) => total += monsters.len(),
                Err(e) => error!("Spawn template {} failed on server {}: {}", spawn.id, server, e),
            }
        }
        info!("Spawned {} monsters on server {}", total, server);
        total
    }

    /// Release a whole partition. Removed monsters stop ticking, never respawn,
    /// and their in-flight movement goes stale.
    pub fn teardown_partition(&self, server: u16, map: u32) -> usize {
        // flag first so a respawn timer firing mid-teardown cannot rebind
        for monster in self.registry.monsters_in(server, map) {
            monster.mark_removed();
        }
        let released = self.registry.release_partition(server, map);
        for (handle, entity) in &released {
            match entity {
                RegisteredEntity::Monster(monster) => {
                    monster.mark_removed();
                    self.broadcaster.cast(monster.cast_scope(), ServerMessage::MonsterDespawn { handle: *handle });
                }
                RegisteredEntity::Companion(companion) => companion.movement().cancel(),
            }
        }
        info!("Tore down server {} map {} ({} entities)", server, map, released.len());
        released.len()
    }

    /// Put a player's pet into the world next to its owner
    pub fn summon_companion(&self, owner: &PlayerSnapshot, stats: CompanionStats) -> Result<Arc<Companion>> {
        let offset = {
            let mut rng = rand::thread_rng();
            Vec2::new(rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0))
        };
        let companion = Arc::new(Companion::new(
            self.next_id(),
            owner.id,
            Some(owner.faction),
            owner.server,
            owner.map,
            owner.position + offset,
            stats,
        ));
        let handle = self
            .registry
            .allocate(owner.server, owner.map, RegisteredEntity::Companion(companion.clone()))?;
        companion.set_handle(handle);
        debug!("Player {} summoned companion {} as handle {}", owner.id, companion.id, handle);
        Ok(companion)
    }

    pub fn dismiss_companion(&self, server: u16, map: u32, handle: u16) -> bool {
        let Some(RegisteredEntity::Companion(companion)) = self.registry.lookup(server, map, handle) else {
            return false;
        };
        companion.movement().cancel();
        self.registry.release(server, map, handle).is_some()
    }

    /// Walk a companion to `destination`. Returns the movement token.
    pub fn move_companion(&self, server: u16, map: u32, handle: u16, destination: Vec2, speed: f32) -> Option<u64> {
        let companion = self.companion(server, map, handle)?;
        if !companion.is_alive() {
            return None;
        }
        Some(self.movement.start(companion, destination, speed))
    }

    /// Player-initiated attack on a monster
    pub fn player_attack(&self, player_id: u64, handle: u16, kind: AttackKind) -> Option<HitOutcome> {
        let player = self.sessions.player(player_id).filter(|p| p.online && p.health > 0)?;
        let monster = self.monster(player.server, player.map, handle)?;
        self.combat.player_attacks_monster(&mut rand::thread_rng(), &player, &monster, kind)
    }

    /// A combat companion attacks a monster on its owner's behalf
    pub fn companion_attack(&self, server: u16, map: u32, companion: u16, monster: u16) -> Option<HitOutcome> {
        let companion = self.companion(server, map, companion).filter(|c| c.stats.combat)?;
        let monster = self.monster(server, map, monster)?;
        self.combat.companion_attacks_monster(&mut rand::thread_rng(), &companion, &monster)
    }

    pub fn player_attack_player(&self, attacker: u64, target: u64, kind: AttackKind) -> Option<HitOutcome> {
        let attacker = self.sessions.player(attacker).filter(|p| p.online)?;
        let target = self.sessions.player(target)?;
        self.combat.player_attacks_player(&mut rand::thread_rng(), &attacker, &target, kind)
    }
}
