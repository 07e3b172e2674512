//! Combat resolution.
//!
//! Every hit follows the same order: suppress it if faction immunity applies,
//! roll evasion, roll raw damage, subtract defense (floor 3, capped at the
//! target's health), mutate health, feed the damage ledger, broadcast, and on
//! a kill hand the monster to the death hook. Hits on a monster that died but
//! whose kill is not settled yet only feed the ledger.
//!
//! Health and target updates race with behavior ticks. That is accepted: the
//! monster's own lock keeps each update whole, and the worst outcome is a tick
//! acting on a view one hit old.

mod death;
mod formulas;
mod ledger;

pub use death::{respawn_point, DeathHook, DeathPipeline};
pub use formulas::*;
pub use ledger::DamageLedger;

use std::sync::Arc;

use log::debug;
use rand::Rng;

use aisim_shared::{AttackKind, EntityRef, Faction, ServerMessage, SkillDef};

use crate::entities::{Companion, Monster, Target};
use crate::movement::Movable;
use crate::services::{Broadcaster, CastScope, PlayerSnapshot, Sessions};

/// Faction, health to roll against, and whether the hit lands after the kill.
/// `None` for a corpse whose kill was already settled.
fn hittable(monster: &Monster) -> Option<(Option<Faction>, u32, bool)> {
    let state = monster.state();
    if !state.dead {
        return Some((state.faction, state.health, false));
    }
    // the hit was aimed at a living monster, so roll it against full health
    state.settling.then_some((state.faction, monster.npc.max_health, true))
}

/// Ledger credit for a hit that arrived after the killing blow
fn late_hit(monster: &Monster, credited: u64, damage: u32) -> Option<HitOutcome> {
    if !monster.credit_late_hit(credited, damage) {
        return None;
    }
    debug!("Late hit of {} by {} credited on monster {}", damage, credited, monster.id);
    Some(HitOutcome { damage: 0, target_health: 0, killed: false })
}

/// What a resolved hit did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitOutcome {
    /// 0 when evaded
    pub damage: u32,
    pub target_health: u32,
    pub killed: bool,
}

pub struct CombatResolver {
    sessions: Arc<dyn Sessions>,
    broadcaster: Arc<dyn Broadcaster>,
    death: Arc<dyn DeathHook>,
}

impl CombatResolver {
    pub fn new(sessions: Arc<dyn Sessions>, broadcaster: Arc<dyn Broadcaster>, death: Arc<dyn DeathHook>) -> Self {
        Self { sessions, broadcaster, death }
    }

    /// A player hits a monster. `None` when the hit is suppressed (settled
    /// corpse or faction immunity); nothing is mutated in that case.
    pub fn player_attacks_monster<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        player: &PlayerSnapshot,
        monster: &Arc<Monster>,
        kind: AttackKind,
    ) -> Option<HitOutcome> {
        let (faction, health, late) = hittable(monster)?;
        if is_faction_immune(player.faction, faction) {
            debug!("Player {} cannot hit own-faction monster {}", player.id, monster.id);
            return None;
        }

        let (min_attack, max_attack) = player.stats.attack_range_for(kind);
        let damage = roll_level_hit(
            rng,
            HitRoll {
                min_attack,
                max_attack,
                percent: 100,
                defense: monster.npc.defense_for(kind),
                target_health: health,
            },
            player.level,
            monster.npc.level,
        );
        if late {
            return late_hit(monster, player.id, damage);
        }
        Some(self.hit_monster(monster, player.id, Target::Player(player.id), EntityRef::Player(player.id), damage))
    }

    /// A companion hits a monster; the damage is credited to its owner.
    pub fn companion_attacks_monster<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        companion: &Arc<Companion>,
        monster: &Arc<Monster>,
    ) -> Option<HitOutcome> {
        if !companion.is_alive() {
            return None;
        }
        let (faction, health, late) = hittable(monster)?;
        if companion.owner_faction.is_some_and(|owner| is_faction_immune(owner, faction)) {
            return None;
        }

        let damage = roll_level_hit(
            rng,
            HitRoll {
                min_attack: companion.stats.min_attack,
                max_attack: companion.stats.max_attack,
                percent: 100,
                defense: monster.npc.defense,
                target_health: health,
            },
            companion.stats.level,
            monster.npc.level,
        );
        if late {
            return late_hit(monster, companion.owner, damage);
        }
        let handle = companion.handle();
        Some(self.hit_monster(monster, companion.owner, Target::Companion(handle), EntityRef::Companion(handle), damage))
    }

    fn hit_monster(
        &self,
        monster: &Arc<Monster>,
        credited: u64,
        aggro: Target,
        attacker: EntityRef,
        damage: u32,
    ) -> HitOutcome {
        let applied = monster.take_damage(damage);
        monster.ledger().add(credited, applied.damage);
        if !applied.killed {
            let mut state = monster.state();
            if !state.dead && state.target.is_none() {
                state.target = Some(aggro);
            }
        }

        self.broadcaster.cast(monster.cast_scope(), ServerMessage::DamageEvent {
            attacker,
            target: EntityRef::Monster(monster.handle()),
            damage: applied.damage,
            target_new_health: applied.health,
            skill_id: None,
        });

        if applied.killed {
            self.death.on_monster_death(monster.clone(), Some(credited));
        }
        HitOutcome { damage: applied.damage, target_health: applied.health, killed: applied.killed }
    }

    /// A monster hits a player, optionally with a skill whose mana the caller
    /// already spent.
    pub fn monster_attacks_player<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        monster: &Monster,
        player: &PlayerSnapshot,
        skill: Option<&SkillDef>,
    ) -> Option<HitOutcome> {
        if monster.is_dead() || player.health == 0 {
            return None;
        }
        let kind = skill.map_or(monster.npc.attack_kind, |s| s.kind);
        let (min_attack, max_attack) = monster.npc.attack_range_for(kind);
        let damage = roll_level_hit(
            rng,
            HitRoll {
                min_attack,
                max_attack,
                percent: skill.map_or(100, |s| s.damage_percent),
                defense: player.stats.defense_for(kind),
                target_health: player.health,
            },
            monster.npc.level,
            player.level,
        );

        let health = self.sessions.apply_damage(player.id, damage)?;
        self.broadcaster.cast(monster.cast_scope(), ServerMessage::DamageEvent {
            attacker: monster.entity_ref(),
            target: EntityRef::Player(player.id),
            damage,
            target_new_health: health,
            skill_id: skill.map(|s| s.id),
        });
        if health == 0 {
            self.broadcaster.cast(monster.cast_scope(), ServerMessage::EntityDeath {
                entity: EntityRef::Player(player.id),
                killer_id: None,
            });
        }
        Some(HitOutcome { damage, target_health: health, killed: health == 0 })
    }

    /// A monster hits a companion
    pub fn monster_attacks_companion<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        monster: &Monster,
        companion: &Companion,
        skill: Option<&SkillDef>,
    ) -> Option<HitOutcome> {
        let health = companion.health();
        if monster.is_dead() || health == 0 {
            return None;
        }
        let kind = skill.map_or(monster.npc.attack_kind, |s| s.kind);
        let (min_attack, max_attack) = monster.npc.attack_range_for(kind);
        let damage = roll_level_hit(
            rng,
            HitRoll {
                min_attack,
                max_attack,
                percent: skill.map_or(100, |s| s.damage_percent),
                defense: companion.defense_for(kind),
                target_health: health,
            },
            monster.npc.level,
            companion.stats.level,
        );

        let (damage, health) = companion.take_damage(damage);
        self.broadcaster.cast(monster.cast_scope(), ServerMessage::DamageEvent {
            attacker: monster.entity_ref(),
            target: companion.entity_ref(),
            damage,
            target_new_health: health,
            skill_id: skill.map(|s| s.id),
        });
        if health == 0 {
            companion.movement().cancel();
            self.broadcaster.cast(monster.cast_scope(), ServerMessage::EntityDeath {
                entity: companion.entity_ref(),
                killer_id: None,
            });
        }
        Some(HitOutcome { damage, target_health: health, killed: health == 0 })
    }

    /// One player hits another
    pub fn player_attacks_player<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        attacker: &PlayerSnapshot,
        target: &PlayerSnapshot,
        kind: AttackKind,
    ) -> Option<HitOutcome> {
        if attacker.id == target.id || attacker.health == 0 || target.health == 0 {
            return None;
        }
        if !target.is_on(attacker.server, attacker.map) {
            return None;
        }
        let (min_attack, max_attack) = attacker.stats.attack_range_for(kind);
        let damage = roll_pvp_hit(
            rng,
            HitRoll {
                min_attack,
                max_attack,
                percent: 100,
                defense: target.stats.defense_for(kind),
                target_health: target.health,
            },
            attacker.stats.accuracy,
            target.stats.dodge,
        );

        let health = self.sessions.apply_damage(target.id, damage)?;
        let scope = CastScope::Near {
            server: target.server,
            map: target.map,
            position: target.position,
        };
        self.broadcaster.cast(scope, ServerMessage::DamageEvent {
            attacker: EntityRef::Player(attacker.id),
            target: EntityRef::Player(target.id),
            damage,
            target_new_health: health,
            skill_id: None,
        });
        if health == 0 {
            self.broadcaster.cast(scope, ServerMessage::EntityDeath {
                entity: EntityRef::Player(target.id),
                killer_id: Some(attacker.id),
            });
        }
        Some(HitOutcome { damage, target_health: health, killed: health == 0 })
    }
}
