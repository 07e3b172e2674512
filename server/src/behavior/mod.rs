//! Monster behavior loop.
//!
//! Each monster runs one task that sleeps a randomized interval, runs a tick,
//! and goes around again until the monster is removed. The tick body runs
//! under a panic guard: a failing tick is logged and the next one still fires.

mod fsm;

pub use fsm::{chance, classify, decide, BehaviorState, SkillOption, TickAction, TickInput};

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinHandle;

use aisim_shared::Vec2;

use crate::combat::{is_faction_immune, CombatResolver};
use crate::config::SimConfig;
use crate::content::WorldContent;
use crate::entities::{Companion, Monster, RegisteredEntity, Target};
use crate::movement::{Movable, MovementInterpolator};
use crate::registry::EntityRegistry;
use crate::services::{PlayerSnapshot, Sessions};
use crate::task::run_guarded;

/// A validated target with its current data
#[derive(Debug, Clone)]
pub enum Engagement {
    Player(PlayerSnapshot),
    Companion(Arc<Companion>),
}

impl Engagement {
    pub fn target(&self) -> Target {
        match self {
            Self::Player(player) => Target::Player(player.id),
            Self::Companion(companion) => Target::Companion(companion.handle()),
        }
    }

    pub fn position(&self) -> Vec2 {
        match self {
            Self::Player(player) => player.position,
            Self::Companion(companion) => companion.position(),
        }
    }
}

pub struct BehaviorScheduler {
    config: Arc<SimConfig>,
    content: Arc<dyn WorldContent>,
    sessions: Arc<dyn Sessions>,
    registry: Arc<EntityRegistry<RegisteredEntity>>,
    combat: Arc<CombatResolver>,
    movement: MovementInterpolator,
}

impl BehaviorScheduler {
    pub fn new(
        config: Arc<SimConfig>,
        content: Arc<dyn WorldContent>,
        sessions: Arc<dyn Sessions>,
        registry: Arc<EntityRegistry<RegisteredEntity>>,
        combat: Arc<CombatResolver>,
        movement: MovementInterpolator,
    ) -> Self {
        Self { config, content, sessions, registry, combat, movement }
    }

    /// Start the tick loop of a monster. The loop ends on its own once the
    /// monster is removed.
    pub fn spawn_loop(self: &Arc<Self>, monster: Arc<Monster>) -> JoinHandle<()> {
        let this = self.clone();
        let label = format!("behavior tick of monster {}", monster.id);
        tokio::spawn(async move {
            loop {
                let delay = rand::thread_rng().gen_range(this.config.tick_range_ms());
                tokio::time::sleep(Duration::from_millis(delay)).await;

                if monster.is_removed() {
                    debug!("Monster {} removed, behavior loop ends", monster.id);
                    break;
                }
                run_guarded(&label, || this.tick(&mut rand::thread_rng(), &monster));
            }
        })
    }

    /// One behavior tick. Returns what was decided, `None` while dead.
    pub fn tick<R: Rng + ?Sized>(&self, rng: &mut R, monster: &Arc<Monster>) -> Option<(BehaviorState, TickAction)> {
        if monster.is_dead() || monster.is_removed() {
            return None;
        }
        monster.regen_mana(self.config.mana_regen);
        self.refresh_sight(monster);

        let mut engagement = self.validate_target(monster);
        let home = monster.spawn.bounds.contains(monster.position());
        if engagement.is_none() && home && !monster.movement().is_moving() {
            engagement = self.acquire_target(rng, monster);
        }

        let mana = monster.state().mana;
        let input = TickInput {
            position: monster.position(),
            bounds: monster.spawn.bounds,
            moving: monster.movement().is_moving(),
            target: engagement.as_ref().map(Engagement::position),
            attack_range: monster.npc.attack_range,
            chase_range: self.config.chase_range,
            leash_distance: self.config.leash_distance,
            chase_jitter: self.config.chase_jitter,
            wander_chance: self.config.wander_chance,
            skill_chance: self.config.skill_chance,
            skill: self.skill_option(rng, monster),
            mana,
        };
        let (state, action) = decide(&input, rng);
        debug!("Monster {} {:?}: {:?}", monster.id, state, action);

        self.apply(rng, monster, engagement, action);
        Some((state, action))
    }

    /// Track players in sight, dropping those who left the partition
    fn refresh_sight(&self, monster: &Monster) {
        let (server, map) = (monster.server, monster.map);
        let visible = self.sessions.players_near(server, map, monster.position(), self.config.sight_radius);

        let tracked: Vec<u64> = monster.state().on_sight.iter().copied().collect();
        let departed: Vec<u64> = tracked
            .into_iter()
            .filter(|id| !self.sessions.player(*id).is_some_and(|p| p.is_on(server, map)))
            .collect();

        let mut state = monster.state();
        for id in departed {
            state.on_sight.remove(&id);
        }
        state.on_sight.extend(visible.iter().map(|p| p.id));
    }

    /// Current target if it is still attackable; otherwise clear it
    fn validate_target(&self, monster: &Monster) -> Option<Engagement> {
        let target = monster.target()?;
        let (server, map) = (monster.server, monster.map);
        let engagement = match target {
            Target::Player(id) => self
                .sessions
                .player(id)
                .filter(|p| p.is_on(server, map) && p.health > 0 && !p.invisible)
                .map(Engagement::Player),
            Target::Companion(handle) => self
                .registry
                .lookup(server, map, handle)
                .and_then(|entity| entity.as_companion().cloned())
                .filter(|companion| companion.is_alive())
                .map(Engagement::Companion),
        };

        if engagement.is_none() {
            debug!("Monster {} lost target {:?}", monster.id, target);
            let mut state = monster.state();
            // combat may have set a fresh target meanwhile
            if state.target == Some(target) {
                state.target = None;
            }
        }
        engagement
    }

    fn acquire_target<R: Rng + ?Sized>(&self, rng: &mut R, monster: &Monster) -> Option<Engagement> {
        let (server, map) = (monster.server, monster.map);
        let position = monster.position();
        let bounds = monster.spawn.bounds;
        let faction = monster.state().faction;

        let mut candidates: Vec<PlayerSnapshot> = self
            .sessions
            .players_near(server, map, position, self.config.acquire_radius)
            .into_iter()
            .filter(|p| p.is_on(server, map) && p.health > 0 && !p.invisible && bounds.contains(p.position))
            .filter(|_| chance(rng, self.config.acquire_chance))
            .collect();
        candidates.shuffle(rng);
        let player = candidates.into_iter().find(|p| !is_faction_immune(p.faction, faction));
        let companion = self.nearest_companion(monster, position);

        let chosen = match (player, companion) {
            (Some(_), Some(companion))
                if !companion.stats.combat && chance(rng, self.config.companion_preference) =>
            {
                Engagement::Companion(companion)
            }
            (Some(player), _) => Engagement::Player(player),
            (None, Some(companion)) => Engagement::Companion(companion),
            (None, None) => return None,
        };
        debug!("Monster {} acquired {:?}", monster.id, chosen.target());
        monster.set_target(Some(chosen.target()));
        Some(chosen)
    }

    fn nearest_companion(&self, monster: &Monster, position: Vec2) -> Option<Arc<Companion>> {
        let faction = monster.state().faction;
        self.registry
            .companions_in(monster.server, monster.map)
            .into_iter()
            .filter(|c| c.is_alive() && !c.owner_faction.is_some_and(|owner| is_faction_immune(owner, faction)))
            .map(|c| (c.position().distance_to(position), c))
            .filter(|(distance, _)| *distance <= self.config.acquire_radius)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, companion)| companion)
    }

    fn skill_option<R: Rng + ?Sized>(&self, rng: &mut R, monster: &Monster) -> Option<SkillOption> {
        let id = *monster.npc.skills.choose(rng)?;
        match self.content.skill(id) {
            Some(skill) => Some(SkillOption { id, mana_cost: skill.mana_cost }),
            None => {
                warn!("NPC {} uses unknown skill {}", monster.npc.id, id);
                None
            }
        }
    }

    fn apply<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        monster: &Arc<Monster>,
        engagement: Option<Engagement>,
        action: TickAction,
    ) {
        match action {
            TickAction::Stay => {}
            TickAction::Wander(destination) => {
                self.movement.start(monster.clone(), destination, monster.npc.walk_speed);
            }
            TickAction::Chase(destination) => {
                self.movement.start(monster.clone(), destination, monster.npc.run_speed);
            }
            TickAction::Retreat { home } => {
                debug!("Monster {} leashed back", monster.id);
                monster.set_target(None);
                match home {
                    Some(home) => {
                        self.movement.start(monster.clone(), home, monster.npc.walk_speed);
                    }
                    None => monster.movement().cancel(),
                }
            }
            TickAction::Attack { skill } => {
                if monster.movement().is_moving() {
                    monster.movement().cancel();
                }
                let skill = skill
                    .and_then(|id| self.content.skill(id))
                    .filter(|skill| monster.spend_mana(skill.mana_cost));
                let outcome = match engagement {
                    Some(Engagement::Player(player)) => {
                        self.combat.monster_attacks_player(rng, monster, &player, skill.as_deref())
                    }
                    Some(Engagement::Companion(companion)) => {
                        self.combat.monster_attacks_companion(rng, monster, &companion, skill.as_deref())
                    }
                    None => None,
                };
                if outcome.is_some_and(|hit| hit.killed) {
                    monster.set_target(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::DeathHook;
    use crate::content::ContentStore;
    use crate::entities::test_support::{test_companion, test_monster, test_npc};
    use crate::services::test_support::test_player;
    use crate::services::{ChannelBroadcaster, SessionTable};
    use aisim_shared::{Faction, NpcTemplate};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoDeaths;

    impl DeathHook for NoDeaths {
        fn on_monster_death(&self, _monster: Arc<Monster>, _killer: Option<u64>) {}
    }

    struct Fixture {
        scheduler: Arc<BehaviorScheduler>,
        sessions: Arc<SessionTable>,
        registry: Arc<EntityRegistry<RegisteredEntity>>,
    }

    fn config() -> SimConfig {
        SimConfig { acquire_chance: 1.0, wander_chance: 0.0, ..Default::default() }
    }

    fn build(
        config: SimConfig,
        sessions: Arc<dyn Sessions>,
    ) -> (Arc<BehaviorScheduler>, Arc<EntityRegistry<RegisteredEntity>>) {
        let (broadcaster, _rx) = ChannelBroadcaster::new(4096);
        let broadcaster = Arc::new(broadcaster);
        let config = Arc::new(config);
        let registry = Arc::new(EntityRegistry::new());
        let combat = Arc::new(CombatResolver::new(sessions.clone(), broadcaster.clone(), Arc::new(NoDeaths)));
        let movement = MovementInterpolator::new(broadcaster, config.movement_step());
        let scheduler = Arc::new(BehaviorScheduler::new(
            config,
            Arc::new(ContentStore::with_defaults()),
            sessions,
            registry.clone(),
            combat,
            movement,
        ));
        (scheduler, registry)
    }

    fn fixture(config: SimConfig) -> Fixture {
        let sessions = Arc::new(SessionTable::new());
        let (scheduler, registry) = build(config, sessions.clone());
        Fixture { scheduler, sessions, registry }
    }

    fn monster() -> Arc<Monster> {
        Arc::new(test_monster(test_npc()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_leash_clears_target_and_stops() {
        let f = fixture(config());
        let mut rng = StdRng::seed_from_u64(1);
        let monster = monster();
        f.sessions.upsert(test_player(7, Vec2::new(10.0, 60.0)));
        monster.set_target(Some(Target::Player(7)));
        monster.movement().begin();

        let (state, action) = f.scheduler.tick(&mut rng, &monster).unwrap();
        assert_eq!((state, action), (BehaviorState::Retreating, TickAction::Retreat { home: None }));
        assert_eq!(monster.target(), None);
        assert!(!monster.movement().is_moving());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_the_spawn_box_retreats() {
        let f = fixture(config());
        let mut rng = StdRng::seed_from_u64(2);
        let monster = monster();
        monster.set_position(Vec2::new(25.0, 10.0));
        f.sessions.upsert(test_player(7, Vec2::new(26.0, 10.0)));
        monster.set_target(Some(Target::Player(7)));

        let (_, action) = f.scheduler.tick(&mut rng, &monster).unwrap();
        assert!(matches!(action, TickAction::Retreat { home: Some(_) }));
        assert_eq!(monster.target(), None);
        assert!(monster.movement().is_moving());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stray_monster_walks_back_before_hunting() {
        let f = fixture(config());
        let mut rng = StdRng::seed_from_u64(12);
        let monster = monster();
        monster.set_position(Vec2::new(25.0, 10.0));
        // within acquire range of the monster and of every point in the box
        f.sessions.upsert(test_player(7, Vec2::new(10.0, 10.0)));

        let mut reacquired = false;
        for _ in 0..30 {
            f.scheduler.tick(&mut rng, &monster);
            if !monster.spawn.bounds.contains(monster.position()) {
                // nobody is picked up while out of bounds
                assert_eq!(monster.target(), None);
            }
            reacquired |= monster.target() == Some(Target::Player(7));
            tokio::time::sleep(Duration::from_millis(1500)).await;
        }
        assert!(monster.spawn.bounds.contains(monster.position()));
        assert!(reacquired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquires_and_attacks_player_in_range() {
        let f = fixture(config());
        let mut rng = StdRng::seed_from_u64(3);
        let monster = monster();
        f.sessions.upsert(test_player(7, Vec2::new(11.0, 10.0)));

        for _ in 0..10 {
            let (state, action) = f.scheduler.tick(&mut rng, &monster).unwrap();
            assert_eq!(state, BehaviorState::Engaged);
            assert!(matches!(action, TickAction::Attack { skill: None }));
        }
        assert_eq!(monster.target(), Some(Target::Player(7)));
        assert!(f.sessions.player(7).unwrap().health < 500);
        assert!(monster.state().on_sight.contains(&7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chases_player_in_box() {
        let f = fixture(config());
        let mut rng = StdRng::seed_from_u64(4);
        let monster = monster();
        f.sessions.upsert(test_player(7, Vec2::new(18.0, 10.0)));

        let (state, action) = f.scheduler.tick(&mut rng, &monster).unwrap();
        assert_eq!(state, BehaviorState::Chasing);
        assert!(matches!(action, TickAction::Chase(_)));
        assert!(monster.movement().is_moving());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(monster.position().distance_to(Vec2::new(18.0, 10.0)) < 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_own_faction_hidden_and_outside_players() {
        let f = fixture(config());
        let mut rng = StdRng::seed_from_u64(5);
        let monster = monster();
        monster.state().faction = Some(Faction::Red);

        f.sessions.upsert(test_player(1, Vec2::new(11.0, 10.0)));
        let mut hidden = test_player(2, Vec2::new(11.0, 11.0));
        hidden.faction = Faction::Blue;
        hidden.invisible = true;
        f.sessions.upsert(hidden);
        let mut outside = test_player(3, Vec2::new(-3.0, 10.0));
        outside.faction = Faction::Blue;
        f.sessions.upsert(outside);

        for _ in 0..20 {
            f.scheduler.tick(&mut rng, &monster);
            assert_eq!(monster.target(), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_companion_preference() {
        for (combat, preference, expect_companion) in [(false, 1.0, true), (false, 0.0, false), (true, 1.0, false)] {
            let f = fixture(SimConfig { companion_preference: preference, ..config() });
            let mut rng = StdRng::seed_from_u64(6);
            let monster = monster();
            f.sessions.upsert(test_player(7, Vec2::new(12.0, 10.0)));
            let pet = Arc::new(test_companion(7, combat, Vec2::new(11.0, 10.0)));
            let handle = f.registry.allocate(1, 1, RegisteredEntity::Companion(pet.clone())).unwrap();
            pet.set_handle(handle);

            f.scheduler.tick(&mut rng, &monster);
            let expected = if expect_companion { Target::Companion(handle) } else { Target::Player(7) };
            assert_eq!(monster.target(), Some(expected), "combat={} preference={}", combat, preference);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_combat_companion_targeted_without_players() {
        let f = fixture(config());
        let mut rng = StdRng::seed_from_u64(7);
        let monster = monster();
        let pet = Arc::new(test_companion(7, true, Vec2::new(11.0, 10.0)));
        let handle = f.registry.allocate(1, 1, RegisteredEntity::Companion(pet.clone())).unwrap();
        pet.set_handle(handle);

        f.scheduler.tick(&mut rng, &monster);
        assert_eq!(monster.target(), Some(Target::Companion(handle)));

        // a released companion is dropped on the next tick
        f.registry.release(1, 1, handle);
        f.scheduler.tick(&mut rng, &monster);
        assert_eq!(monster.target(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_departed_players_leave_sight() {
        let f = fixture(config());
        let mut rng = StdRng::seed_from_u64(8);
        let monster = monster();
        f.sessions.upsert(test_player(7, Vec2::new(15.0, 15.0)));
        f.scheduler.tick(&mut rng, &monster);
        assert!(monster.state().on_sight.contains(&7));

        f.sessions.disconnect(7);
        f.scheduler.tick(&mut rng, &monster);
        assert!(!monster.state().on_sight.contains(&7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skill_spends_mana() {
        let f = fixture(SimConfig { skill_chance: 1.0, ..config() });
        let mut rng = StdRng::seed_from_u64(9);
        let npc = NpcTemplate { max_mana: 100, skills: vec![1], ..test_npc() };
        let monster = Arc::new(test_monster(npc));
        f.sessions.upsert(test_player(7, Vec2::new(11.0, 10.0)));

        let (_, action) = f.scheduler.tick(&mut rng, &monster).unwrap();
        assert_eq!(action, TickAction::Attack { skill: Some(1) });
        // regen to full, then 60 spent
        assert_eq!(monster.state().mana, 40);

        let (_, action) = f.scheduler.tick(&mut rng, &monster).unwrap();
        assert_eq!(action, TickAction::Attack { skill: None });
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_monster_does_nothing() {
        let f = fixture(config());
        let mut rng = StdRng::seed_from_u64(10);
        let monster = monster();
        monster.take_damage(u32::MAX);
        assert!(f.scheduler.tick(&mut rng, &monster).is_none());
    }

    /// Session layer whose scans always blow up
    struct BrokenSessions {
        scans: AtomicUsize,
    }

    impl Sessions for BrokenSessions {
        fn player(&self, _id: u64) -> Option<PlayerSnapshot> {
            None
        }

        fn players_near(&self, _server: u16, _map: u32, _position: Vec2, _radius: f32) -> Vec<PlayerSnapshot> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            panic!("scan failed");
        }

        fn apply_damage(&self, _id: u64, _damage: u32) -> Option<u32> {
            None
        }

        fn award_experience(&self, _id: u64, _amount: u64) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_tick_keeps_the_loop_alive() {
        let sessions = Arc::new(BrokenSessions { scans: AtomicUsize::new(0) });
        let (scheduler, _) = build(config(), sessions.clone());
        let monster = monster();

        let handle = scheduler.spawn_loop(monster.clone());
        tokio::time::sleep(Duration::from_millis(7600)).await;
        let scans = sessions.scans.load(Ordering::SeqCst);
        assert!((5..=7).contains(&scans), "{} ticks", scans);

        monster.mark_removed();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }
}
