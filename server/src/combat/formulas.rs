//! Pure damage and evasion formulas.

use rand::Rng;

use aisim_shared::Faction;

/// Smallest damage a landed hit deals
pub const DAMAGE_FLOOR: u32 = 3;

/// Draw scale of level-based evasion (monsters and companions involved)
pub const LEVEL_EVASION_SCALE: u32 = 1000;
const LEVEL_EVASION_BASE: i64 = 50;
const LEVEL_EVASION_PER_LEVEL: i64 = 40;
const LEVEL_EVASION_MAX: i64 = 900;

/// Draw scale of player versus player evasion
pub const PVP_EVASION_SCALE: u32 = 2000;
const PVP_EVASION_BASE: i64 = 300;
const PVP_EVASION_MAX: i64 = 1800;

const PVP_DEFENSE_EXPONENT: f64 = 0.85;

/// Uniform raw damage in `[min, max]`
pub fn roll_raw_damage<R: Rng + ?Sized>(rng: &mut R, min: u32, max: u32) -> u32 {
    if max <= min {
        min
    } else {
        rng.gen_range(min..=max)
    }
}

/// Apply a skill's damage percentage (100 = plain hit)
pub fn scale_damage(raw: u32, percent: u32) -> u32 {
    (u64::from(raw) * u64::from(percent) / 100).min(u64::from(u32::MAX)) as u32
}

/// Subtract defense, then clamp into `[DAMAGE_FLOOR, target_health]`
pub fn mitigate(raw: u32, defense: u32, target_health: u32) -> u32 {
    raw.saturating_sub(defense).max(DAMAGE_FLOOR).min(target_health)
}

/// Miss threshold out of `LEVEL_EVASION_SCALE`, growing with how far the
/// target out-levels the attacker
pub fn level_evasion(attacker_level: u16, target_level: u16) -> u32 {
    let gap = i64::from(target_level) - i64::from(attacker_level);
    (LEVEL_EVASION_BASE + LEVEL_EVASION_PER_LEVEL * gap).clamp(0, LEVEL_EVASION_MAX) as u32
}

/// Miss threshold out of `PVP_EVASION_SCALE` from the dodge/accuracy gap
pub fn pvp_evasion(accuracy: u32, dodge: u32) -> u32 {
    let gap = i64::from(dodge) - i64::from(accuracy);
    (PVP_EVASION_BASE + gap).clamp(0, PVP_EVASION_MAX) as u32
}

pub fn evaded<R: Rng + ?Sized>(rng: &mut R, threshold: u32, scale: u32) -> bool {
    rng.gen_range(0..scale) < threshold
}

/// Defense in player versus player fights grows sub-linearly
pub fn pvp_defense(defense: u32) -> u32 {
    f64::from(defense).powf(PVP_DEFENSE_EXPONENT) as u32
}

/// A player never damages a monster fighting for the player's own faction
pub fn is_faction_immune(attacker: Faction, monster: Option<Faction>) -> bool {
    monster == Some(attacker)
}

/// Inputs of one hit
#[derive(Debug, Clone, Copy)]
pub struct HitRoll {
    pub min_attack: u32,
    pub max_attack: u32,
    /// Skill damage percentage, 100 for a plain hit
    pub percent: u32,
    pub defense: u32,
    pub target_health: u32,
}

/// Roll a hit that uses level-based evasion
pub fn roll_level_hit<R: Rng + ?Sized>(
    rng: &mut R,
    hit: HitRoll,
    attacker_level: u16,
    target_level: u16,
) -> u32 {
    if hit.target_health == 0 {
        return 0;
    }
    if evaded(rng, level_evasion(attacker_level, target_level), LEVEL_EVASION_SCALE) {
        return 0;
    }
    let raw = scale_damage(roll_raw_damage(rng, hit.min_attack, hit.max_attack), hit.percent);
    mitigate(raw, hit.defense, hit.target_health)
}

/// Roll a player versus player hit. `hit.defense` is the raw defense.
pub fn roll_pvp_hit<R: Rng + ?Sized>(rng: &mut R, hit: HitRoll, accuracy: u32, dodge: u32) -> u32 {
    if hit.target_health == 0 {
        return 0;
    }
    if evaded(rng, pvp_evasion(accuracy, dodge), PVP_EVASION_SCALE) {
        return 0;
    }
    let raw = scale_damage(roll_raw_damage(rng, hit.min_attack, hit.max_attack), hit.percent);
    mitigate(raw, pvp_defense(hit.defense), hit.target_health)
}
