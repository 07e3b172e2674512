//! Simulation tuning loaded from `sim_config.json`.

use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::Deserialize;

use crate::error::{Result, SimError};

/// Simulation tunables. Every field has a default so a partial file works.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Behavior tick interval bounds in milliseconds (upper bound exclusive)
    pub tick_min_ms: u64,
    pub tick_max_ms: u64,
    /// Chance an idle monster starts wandering on a tick
    pub wander_chance: f64,
    /// Radius scanned for new targets
    pub acquire_radius: f32,
    /// Independent chance each candidate player survives the aggro gate
    pub acquire_chance: f64,
    /// Radius within which players are tracked as "on sight"
    pub sight_radius: f32,
    /// Targets within this distance are chased
    pub chase_range: f32,
    /// Targets beyond this distance are dropped
    pub leash_distance: f32,
    /// Max per-axis offset of the chase destination around the target
    pub chase_jitter: f32,
    /// Chance an engaged monster uses a skill instead of a plain hit
    pub skill_chance: f64,
    /// Chance to prefer a non-combat companion over a player target
    pub companion_preference: f64,
    /// Mana restored per tick
    pub mana_regen: u32,
    /// Delay before a dead monster's damage ledger is wiped
    pub ledger_grace_ms: u64,
    /// Max per-axis distance a respawn lands from the death location
    pub respawn_scatter: f32,
    pub global_drop_rate: f64,
    pub boss_drop_bonus: f64,
    pub event_drop_bonus: f64,
    /// Map id -> drop rate multiplier
    pub map_drop_overrides: HashMap<u32, f64>,
    /// Distance between neighbouring world drops of one kill
    pub drop_ring_spacing: f32,
    /// Owner-only pickup window of a world drop
    pub world_drop_claim_secs: u64,
    /// Open pickup window that follows before the drop expires
    pub world_drop_open_secs: u64,
    /// Length of one movement step
    pub movement_step_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_min_ms: 1000,
            tick_max_ms: 1500,
            wander_chance: 0.75,
            acquire_radius: 15.0,
            acquire_chance: 0.5,
            sight_radius: 30.0,
            chase_range: 25.0,
            leash_distance: 40.0,
            chase_jitter: 1.5,
            skill_chance: 0.3,
            companion_preference: 0.5,
            mana_regen: 2,
            ledger_grace_ms: 1000,
            respawn_scatter: 5.0,
            global_drop_rate: 1.0,
            boss_drop_bonus: 0.5,
            event_drop_bonus: 0.0,
            map_drop_overrides: HashMap::new(),
            drop_ring_spacing: 1.0,
            world_drop_claim_secs: 30,
            world_drop_open_secs: 90,
            movement_step_ms: 1000,
        }
    }
}

impl SimConfig {
    /// Load config from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: SimConfig = serde_json::from_str(&content).map_err(|source| SimError::Json {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loaded simulation config from {:?}", path);
        Ok(config)
    }

    /// Tick interval range, never empty
    pub fn tick_range_ms(&self) -> Range<u64> {
        let min = self.tick_min_ms.max(1);
        min..self.tick_max_ms.max(min + 1)
    }

    pub fn ledger_grace(&self) -> Duration {
        Duration::from_millis(self.ledger_grace_ms)
    }

    pub fn movement_step(&self) -> Duration {
        Duration::from_millis(self.movement_step_ms.max(1))
    }

    pub fn world_drop_claim(&self) -> Duration {
        Duration::from_secs(self.world_drop_claim_secs)
    }

    pub fn world_drop_open(&self) -> Duration {
        Duration::from_secs(self.world_drop_open_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SimConfig = serde_json::from_str(
            r#"{ "wander_chance": 0.5, "map_drop_overrides": { "41": 2.0 } }"#,
        ).unwrap();
        assert_eq!(config.wander_chance, 0.5);
        assert_eq!(config.map_drop_overrides.get(&41), Some(&2.0));
        assert_eq!(config.tick_min_ms, 1000);
        assert_eq!(config.tick_range_ms(), 1000..1500);
    }

    #[test]
    fn test_degenerate_tick_range() {
        let config = SimConfig { tick_min_ms: 800, tick_max_ms: 200, ..SimConfig::default() };
        assert_eq!(config.tick_range_ms(), 800..801);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = SimConfig::load("/nonexistent/sim_config.json").unwrap_err();
        assert!(matches!(err, SimError::Io { .. }));
    }
}
