//! What happens after a monster dies.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rand::Rng;

use aisim_shared::{Rect, ServerMessage, Vec2};

use crate::config::SimConfig;
use crate::entities::{Monster, RegisteredEntity};
use crate::loot::LootResolver;
use crate::movement::Movable;
use crate::registry::EntityRegistry;
use crate::services::{Broadcaster, Sessions};
use crate::task::spawn_guarded;

/// Invoked exactly once per kill, by the hit that took the monster to 0 HP
pub trait DeathHook: Send + Sync {
    fn on_monster_death(&self, monster: Arc<Monster>, killer: Option<u64>);
}

/// Respawn location: the death point jittered by up to `scatter` per axis,
/// clamped into the spawn box
pub fn respawn_point<R: Rng + ?Sized>(rng: &mut R, bounds: Rect, death: Vec2, scatter: f32) -> Vec2 {
    let scatter = if scatter.is_finite() { scatter.max(0.0) } else { 0.0 };
    let jitter = Vec2::new(rng.gen_range(-scatter..=scatter), rng.gen_range(-scatter..=scatter));
    bounds.clamp(death + jitter)
}

/// Death bookkeeping: broadcast, kill credit, loot, ledger cleanup and respawn
#[derive(Clone)]
pub struct DeathPipeline {
    config: Arc<SimConfig>,
    sessions: Arc<dyn Sessions>,
    broadcaster: Arc<dyn Broadcaster>,
    registry: Arc<EntityRegistry<RegisteredEntity>>,
    loot: Arc<LootResolver>,
}

impl DeathPipeline {
    pub fn new(
        config: Arc<SimConfig>,
        sessions: Arc<dyn Sessions>,
        broadcaster: Arc<dyn Broadcaster>,
        registry: Arc<EntityRegistry<RegisteredEntity>>,
        loot: Arc<LootResolver>,
    ) -> Self {
        Self { config, sessions, broadcaster, registry, loot }
    }

    /// Elect the claimer and hand out experience and loot. Runs after the
    /// ledger grace delay; hits landing on the corpse until then are credited.
    fn settle(&self, monster: &Monster, death_position: Vec2) {
        monster.finish_settling();
        let claimer = monster.ledger().top_contributor();
        monster.ledger().clear();

        let Some(claimer) = claimer else {
            info!("Monster {} died with no one to credit", monster.id);
            return;
        };
        if monster.npc.experience > 0 {
            self.sessions.award_experience(claimer, monster.npc.experience);
        }
        let rewards = self.loot.resolve_kill(monster, Some(claimer), death_position);
        info!(
            "Monster {} ({}) claimed by player {}: {} exp, {} items",
            monster.id,
            monster.npc.name,
            claimer,
            monster.npc.experience,
            rewards.len()
        );
    }

    /// Bring a dead monster back. Torn-down monsters stay gone.
    fn respawn(&self, monster: &Arc<Monster>, death_position: Vec2) {
        if monster.is_removed() {
            return;
        }
        let position = {
            let mut rng = rand::thread_rng();
            respawn_point(&mut rng, monster.spawn.bounds, death_position, self.config.respawn_scatter)
        };
        monster.reset_for_respawn(position);

        // The old binding may have been released while the monster was dead.
        let bound = match self.registry.lookup(monster.server, monster.map, monster.handle()) {
            Some(RegisteredEntity::Monster(current)) => Arc::ptr_eq(&current, monster),
            _ => false,
        };
        if !bound {
            if monster.is_removed() {
                return;
            }
            match self.registry.allocate(monster.server, monster.map, RegisteredEntity::Monster(monster.clone())) {
                Ok(handle) if monster.is_removed() => {
                    // torn down while we were allocating
                    self.registry.release(monster.server, monster.map, handle);
                    return;
                }
                Ok(handle) => {
                    warn!("Monster {} lost handle {}, rebound as {}", monster.id, monster.handle(), handle);
                    monster.set_handle(handle);
                }
                Err(e) => {
                    error!("Monster {} cannot respawn: {}", monster.id, e);
                    monster.mark_removed();
                    return;
                }
            }
        }

        self.broadcaster.cast(monster.cast_scope(), monster.spawn_message());
        info!("Monster {} respawned at ({:.1}, {:.1})", monster.id, position.x, position.z);
    }
}

impl DeathHook for DeathPipeline {
    fn on_monster_death(&self, monster: Arc<Monster>, killer: Option<u64>) {
        monster.movement().cancel();
        let death_position = monster.position();
        self.broadcaster.cast(monster.cast_scope(), ServerMessage::EntityDeath {
            entity: monster.entity_ref(),
            killer_id: killer,
        });

        let this = self.clone();
        let dead = monster.clone();
        let grace = self.config.ledger_grace();
        spawn_guarded(format!("settle monster {}", monster.id), async move {
            tokio::time::sleep(grace).await;
            this.settle(&dead, death_position);
        });

        let delay = match Duration::try_from_secs_f32(monster.spawn.respawn_secs) {
            Ok(delay) => delay,
            Err(e) => {
                error!(
                    "Monster {} has unusable respawn time {} ({}), it stays dead",
                    monster.id, monster.spawn.respawn_secs, e
                );
                return;
            }
        };
        let this = self.clone();
        spawn_guarded(format!("respawn monster {}", monster.id), async move {
            tokio::time::sleep(delay).await;
            this.respawn(&monster, death_position);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentStore;
    use crate::entities::test_support::{test_monster, test_npc, test_spawn};
    use aisim_shared::SpawnTemplate;
    use crate::services::test_support::test_player;
    use crate::services::{CastScope, ChannelBroadcaster, InMemoryInventory, SessionTable};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tokio::sync::mpsc;

    struct Fixture {
        pipeline: DeathPipeline,
        sessions: Arc<SessionTable>,
        registry: Arc<EntityRegistry<RegisteredEntity>>,
        rx: mpsc::Receiver<(CastScope, ServerMessage)>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(SimConfig::default());
        let sessions = Arc::new(SessionTable::new());
        let (broadcaster, rx) = ChannelBroadcaster::new(1024);
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(broadcaster);
        let inventory = Arc::new(InMemoryInventory::new(
            broadcaster.clone(),
            config.world_drop_claim(),
            config.world_drop_open(),
        ));
        let registry = Arc::new(EntityRegistry::new());
        let loot = Arc::new(LootResolver::new(
            config.clone(),
            Arc::new(ContentStore::with_defaults()),
            sessions.clone(),
            inventory,
        ));
        let pipeline = DeathPipeline::new(config, sessions.clone(), broadcaster, registry.clone(), loot);
        Fixture { pipeline, sessions, registry, rx }
    }

    fn bound_monster(registry: &EntityRegistry<RegisteredEntity>) -> Arc<Monster> {
        let monster = Arc::new(test_monster(test_npc()));
        let handle = registry.allocate(1, 1, RegisteredEntity::Monster(monster.clone())).unwrap();
        monster.set_handle(handle);
        monster
    }

    fn kinds(rx: &mut mpsc::Receiver<(CastScope, ServerMessage)>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok((_, message)) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[test]
    fn test_respawn_point_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(9);
        let bounds = Rect::from_corners(0.0, 0.0, 10.0, 10.0);
        for _ in 0..500 {
            let p = respawn_point(&mut rng, bounds, Vec2::new(9.5, 0.5), 5.0);
            assert!(bounds.contains(p));
        }
        assert_eq!(respawn_point(&mut rng, bounds, Vec2::new(3.0, 3.0), 0.0), Vec2::new(3.0, 3.0));
        assert!(bounds.contains(respawn_point(&mut rng, bounds, Vec2::new(50.0, -3.0), -1.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_credits_top_contributor_and_respawns() {
        let mut f = fixture();
        f.sessions.upsert(test_player(7, Vec2::default()));
        f.sessions.upsert(test_player(8, Vec2::default()));
        let monster = bound_monster(&f.registry);
        let handle = monster.handle();

        monster.ledger().add(8, 40);
        monster.ledger().add(7, 80);
        monster.take_damage(u32::MAX);
        f.pipeline.on_monster_death(monster.clone(), Some(8));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.sessions.experience(7), monster.npc.experience);
        assert_eq!(f.sessions.experience(8), 0);
        assert!(monster.ledger().is_empty());
        assert!(monster.is_dead());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!monster.is_dead());
        assert_eq!(monster.health(), monster.npc.max_health);
        assert_eq!(monster.handle(), handle);
        assert!(monster.spawn.bounds.contains(monster.position()));

        let messages = kinds(&mut f.rx);
        assert!(matches!(messages.first(), Some(ServerMessage::EntityDeath { killer_id: Some(8), .. })));
        assert!(matches!(messages.last(), Some(ServerMessage::MonsterSpawn { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_respawn_rebinds_a_released_handle() {
        let f = fixture();
        let monster = bound_monster(&f.registry);
        let old = monster.handle();
        monster.take_damage(u32::MAX);
        f.pipeline.on_monster_death(monster.clone(), None);

        f.registry.release(1, 1, old);
        // somebody else takes the freed slot range
        let squatter = bound_monster(&f.registry);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!monster.is_dead());
        assert_ne!(monster.handle(), squatter.handle());
        match f.registry.lookup(1, 1, monster.handle()) {
            Some(RegisteredEntity::Monster(bound)) => assert!(Arc::ptr_eq(&bound, &monster)),
            other => panic!("monster not rebound: {:?}", other.is_some()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_hits_count_towards_the_claimer() {
        let f = fixture();
        f.sessions.upsert(test_player(7, Vec2::default()));
        f.sessions.upsert(test_player(8, Vec2::default()));
        let monster = bound_monster(&f.registry);

        monster.ledger().add(7, 50);
        monster.take_damage(u32::MAX);
        f.pipeline.on_monster_death(monster.clone(), Some(7));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(monster.credit_late_hit(8, 80));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.sessions.experience(8), monster.npc.experience);
        assert_eq!(f.sessions.experience(7), 0);
        assert!(!monster.credit_late_hit(7, 500));
        assert!(monster.ledger().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_respawn_time_keeps_the_monster_dead() {
        let f = fixture();
        f.sessions.upsert(test_player(7, Vec2::default()));
        for respawn_secs in [f32::INFINITY, f32::NAN, -5.0, 1e30] {
            let spawn = Arc::new(SpawnTemplate { respawn_secs, ..test_spawn(101) });
            let monster = Arc::new(Monster::new(1, 1, spawn, Arc::new(test_npc()), Vec2::new(10.0, 10.0)));
            monster.ledger().add(7, 10);
            monster.take_damage(u32::MAX);
            f.pipeline.on_monster_death(monster.clone(), Some(7));

            tokio::time::sleep(Duration::from_secs(60)).await;
            assert!(monster.is_dead());
            assert!(monster.ledger().is_empty());
        }
        assert_eq!(f.sessions.experience(7), 4 * test_npc().experience);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_monster_never_respawns() {
        let mut f = fixture();
        let monster = bound_monster(&f.registry);
        monster.take_damage(u32::MAX);
        f.pipeline.on_monster_death(monster.clone(), None);
        monster.mark_removed();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(monster.is_dead());
        assert!(!kinds(&mut f.rx).iter().any(|m| matches!(m, ServerMessage::MonsterSpawn { .. })));
    }
}
