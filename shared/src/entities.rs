//! Static entity definitions: NPC stat blocks, spawn templates and skills.

use serde::{Deserialize, Serialize};

use crate::{AttackKind, Faction, Rect};

/// NPC stat block shared by every monster spawned from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcTemplate {
    pub id: u32,
    pub name: String,
    pub level: u16,
    pub max_health: u32,
    #[serde(default)]
    pub max_mana: u32,
    pub min_attack: u32,
    pub max_attack: u32,
    #[serde(default)]
    pub min_arts_attack: u32,
    #[serde(default)]
    pub max_arts_attack: u32,
    pub defense: u32,
    #[serde(default)]
    pub arts_defense: u32,
    /// Which attack stats plain hits use
    #[serde(default)]
    pub attack_kind: AttackKind,
    pub attack_range: f32,
    /// Units per second while wandering
    pub walk_speed: f32,
    /// Units per second while chasing
    pub run_speed: f32,
    pub experience: u64,
    /// Root drop table (None = drops nothing)
    #[serde(default)]
    pub drop_table: Option<u32>,
    /// Independent drop resolutions per kill
    #[serde(default = "default_drop_rolls")]
    pub drop_rolls: u32,
    #[serde(default)]
    pub boss: bool,
    #[serde(default)]
    pub skills: Vec<u32>,
}

fn default_drop_rolls() -> u32 {
    1
}

impl NpcTemplate {
    /// (min, max) attack for the given attack kind
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

/// Where and what to spawn on a map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnTemplate {
    pub id: u32,
    pub map_id: u32,
    pub npc_id: u32,
    /// Spawn area, also the leash bounds of every monster spawned here
    pub bounds: Rect,
    /// Number of monsters this template keeps alive
    pub count: u32,
    /// Respawn time in seconds after a monster dies
    pub respawn_secs: f32,
    /// War objective tag (None = attackable by everyone)
    #[serde(default)]
    pub faction: Option<Faction>,
}

/// Monster skill definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDef {
    pub id: u32,
    pub name: String,
    pub mana_cost: u32,
    /// Damage multiplier in percent applied to the rolled attack
    pub damage_percent: u32,
    pub kind: AttackKind,
}
