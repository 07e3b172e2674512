//! Pure per-tick decision logic.

use rand::Rng;

use aisim_shared::{Rect, Vec2};

use crate::movement::random_point_in;

/// Where a monster stands with respect to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorState {
    /// No target
    Idle,
    /// Target known but out of attack range
    Chasing,
    /// Target within attack range
    Engaged,
    /// Outside the spawn box, or too far from the target: give up and head home
    Retreating,
}

/// Skill the monster could use this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillOption {
    pub id: u32,
    pub mana_cost: u32,
}

/// Everything `decide` looks at
#[derive(Debug, Clone)]
pub struct TickInput {
    pub position: Vec2,
    pub bounds: Rect,
    pub moving: bool,
    /// Position of the validated target, if any
    pub target: Option<Vec2>,
    pub attack_range: f32,
    pub chase_range: f32,
    pub leash_distance: f32,
    pub chase_jitter: f32,
    pub wander_chance: f64,
    pub skill_chance: f64,
    pub skill: Option<SkillOption>,
    pub mana: u32,
}

/// What the scheduler should do this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickAction {
    Stay,
    Wander(Vec2),
    Chase(Vec2),
    Attack { skill: Option<u32> },
    /// Drop the target. Walk to `home` when outside the spawn box, otherwise
    /// just stop moving.
    Retreat { home: Option<Vec2> },
}

/// Independent chance; out-of-range probabilities saturate
pub fn chance<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> bool {
    rng.gen::<f64>() < probability
}

pub fn classify(input: &TickInput) -> BehaviorState {
    let outside = !input.bounds.contains(input.position);
    let Some(target) = input.target else {
        return if outside { BehaviorState::Retreating } else { BehaviorState::Idle };
    };
    let distance = input.position.distance_to(target);
    if outside || distance > input.leash_distance {
        BehaviorState::Retreating
    } else if distance <= input.attack_range {
        BehaviorState::Engaged
    } else {
        BehaviorState::Chasing
    }
}

pub fn decide<R: Rng + ?Sized>(input: &TickInput, rng: &mut R) -> (BehaviorState, TickAction) {
    let state = classify(input);
    let action = match (state, input.target) {
        // already walking back
        (BehaviorState::Retreating, None) if input.moving => TickAction::Stay,
        (BehaviorState::Retreating, _) => {
            let home = (!input.bounds.contains(input.position)).then(|| random_point_in(rng, input.bounds));
            TickAction::Retreat { home }
        }
        (BehaviorState::Engaged, _) => {
            let skill = input
                .skill
                .filter(|skill| input.mana >= skill.mana_cost && chance(rng, input.skill_chance))
                .map(|skill| skill.id);
            TickAction::Attack { skill }
        }
        (BehaviorState::Chasing, Some(target)) if input.position.distance_to(target) <= input.chase_range => {
            let jitter = input.chase_jitter.max(0.0);
            let offset = if jitter > 0.0 {
                Vec2::new(rng.gen_range(-jitter..=jitter), rng.gen_range(-jitter..=jitter))
            } else {
                Vec2::default()
            };
            TickAction::Chase(target + offset)
        }
        (BehaviorState::Chasing, _) => TickAction::Stay,
        (BehaviorState::Idle, _) if !input.moving && chance(rng, input.wander_chance) => {
            TickAction::Wander(random_point_in(rng, input.bounds))
        }
        (BehaviorState::Idle, _) => TickAction::Stay,
    };
    (state, action)
}
