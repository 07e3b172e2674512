//! World-content lookup.
//!
//! Content (NPC stat blocks, spawn templates, drop tables, items, skills) is
//! read-only once loaded. `ContentStore` loads it from a JSON file exported by
//! the data pipeline and falls back to a small built-in set when that file is
//! missing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use serde::Deserialize;

use aisim_shared::{
    get_item_definitions, AttackKind, DropEntry, DropTable, Faction, ItemDef, NpcTemplate, Rect,
    SkillDef, SpawnTemplate,
};

use crate::error::{Result, SimError};

/// Longest accepted respawn timer, one week
pub const MAX_RESPAWN_SECS: f32 = 7.0 * 24.0 * 3600.0;

pub trait WorldContent: Send + Sync {
    fn npc(&self, id: u32) -> Option<Arc<NpcTemplate>>;
    fn spawn_template(&self, id: u32) -> Option<Arc<SpawnTemplate>>;
    fn spawn_templates(&self) -> Vec<Arc<SpawnTemplate>>;
    fn drop_table(&self, id: u32) -> Option<Arc<DropTable>>;
    fn item(&self, id: u32) -> Option<Arc<ItemDef>>;
    fn skill(&self, id: u32) -> Option<Arc<SkillDef>>;
}

/// On-disk layout of a content file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContentFile {
    pub npcs: Vec<NpcTemplate>,
    pub spawns: Vec<SpawnTemplate>,
    pub drop_tables: Vec<DropTable>,
    pub items: Vec<ItemDef>,
    pub skills: Vec<SkillDef>,
}

/// In-memory content tables
#[derive(Debug, Default)]
pub struct ContentStore {
    npcs: HashMap<u32, Arc<NpcTemplate>>,
    spawns: HashMap<u32, Arc<SpawnTemplate>>,
    drop_tables: HashMap<u32, Arc<DropTable>>,
    items: HashMap<u32, Arc<ItemDef>>,
    skills: HashMap<u32, Arc<SkillDef>>,
}

impl ContentStore {
    /// Build a store, skipping (and logging) malformed drop tables, spawn
    /// templates whose NPC does not exist and spawn templates with an
    /// unusable respawn timer.
    pub fn from_parts(file: ContentFile) -> Self {
        let mut store = Self::default();

        for npc in file.npcs {
            store.npcs.insert(npc.id, Arc::new(npc));
        }
        for item in file.items {
            store.items.insert(item.id, Arc::new(item));
        }
        for skill in file.skills {
            store.skills.insert(skill.id, Arc::new(skill));
        }
        for table in file.drop_tables {
            if let Err(reason) = table.validate() {
                let err = SimError::MalformedDropTable { id: table.id, reason };
                warn!("Skipping drop table: {}", err);
                continue;
            }
            store.drop_tables.insert(table.id, Arc::new(table));
        }
        for spawn in file.spawns {
            if !store.npcs.contains_key(&spawn.npc_id) {
                warn!("Skipping spawn template {}: {}", spawn.id, SimError::UnknownNpc(spawn.npc_id));
                continue;
            }
            if !(0.0..=MAX_RESPAWN_SECS).contains(&spawn.respawn_secs) {
                let err = SimError::MalformedSpawnTemplate {
                    id: spawn.id,
                    reason: format!("respawn_secs {} outside 0..={}", spawn.respawn_secs, MAX_RESPAWN_SECS),
                };
                warn!("Skipping spawn template: {}", err);
                continue;
            }
            store.spawns.insert(spawn.id, Arc::new(spawn));
        }

        info!(
            "Content ready: {} NPCs, {} spawns, {} drop tables, {} items, {} skills",
            store.npcs.len(),
            store.spawns.len(),
            store.drop_tables.len(),
            store.items.len(),
            store.skills.len()
        );
        store
    }

    /// Load content from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: ContentFile = serde_json::from_str(&content).map_err(|source| SimError::Json {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loaded content from {:?}", path);
        Ok(Self::from_parts(file))
    }

    /// Built-in content for running without a data export
    pub fn with_defaults() -> Self {
        Self::from_parts(default_content())
    }
}

impl WorldContent for ContentStore {
    fn npc(&self, id: u32) -> Option<Arc<NpcTemplate>> {
        self.npcs.get(&id).cloned()
    }

    fn spawn_template(&self, id: u32) -> Option<Arc<SpawnTemplate>> {
        self.spawns.get(&id).cloned()
    }

    fn spawn_templates(&self) -> Vec<Arc<SpawnTemplate>> {
        let mut spawns: Vec<_> = self.spawns.values().cloned().collect();
        spawns.sort_by_key(|s| s.id);
        spawns
    }

    fn drop_table(&self, id: u32) -> Option<Arc<DropTable>> {
        self.drop_tables.get(&id).cloned()
    }

    fn item(&self, id: u32) -> Option<Arc<ItemDef>> {
        self.items.get(&id).cloned()
    }

    fn skill(&self, id: u32) -> Option<Arc<SkillDef>> {
        self.skills.get(&id).cloned()
    }
}

fn default_content() -> ContentFile {
    let wild_dog = NpcTemplate {
        id: 101,
        name: "Wild Dog".into(),
        level: 3,
        max_health: 180,
        max_mana: 0,
        min_attack: 8,
        max_attack: 14,
        min_arts_attack: 0,
        max_arts_attack: 0,
        defense: 4,
        arts_defense: 2,
        attack_kind: AttackKind::Physical,
        attack_range: 2.0,
        walk_speed: 2.0,
        run_speed: 4.5,
        experience: 40,
        drop_table: Some(1),
        drop_rolls: 1,
        boss: false,
        skills: vec![],
    };
    let goblin_chief = NpcTemplate {
        id: 191,
        name: "Goblin Chief".into(),
        level: 12,
        max_health: 4000,
        max_mana: 300,
        min_attack: 40,
        max_attack: 65,
        min_arts_attack: 30,
        max_arts_attack: 50,
        defense: 25,
        arts_defense: 15,
        attack_kind: AttackKind::Physical,
        attack_range: 3.0,
        walk_speed: 2.0,
        run_speed: 5.0,
        experience: 1500,
        drop_table: Some(10),
        drop_rolls: 3,
        boss: true,
        skills: vec![1],
    };

    ContentFile {
        npcs: vec![wild_dog, goblin_chief],
        spawns: vec![
            SpawnTemplate {
                id: 1,
                map_id: 1,
                npc_id: 101,
                bounds: Rect::from_corners(20.0, 20.0, 60.0, 60.0),
                count: 12,
                respawn_secs: 15.0,
                faction: None,
            },
            SpawnTemplate {
                id: 2,
                map_id: 1,
                npc_id: 191,
                bounds: Rect::from_corners(-40.0, -40.0, -20.0, -20.0),
                count: 1,
                respawn_secs: 300.0,
                faction: None,
            },
            SpawnTemplate {
                id: 3,
                map_id: 2,
                npc_id: 191,
                bounds: Rect::from_corners(0.0, 0.0, 10.0, 10.0),
                count: 1,
                respawn_secs: 120.0,
                faction: Some(Faction::Red),
            },
        ],
        drop_tables: vec![
            DropTable {
                id: 1,
                entries: vec![DropEntry::Item(1), DropEntry::Item(3), DropEntry::Item(6), DropEntry::Table(2)],
                probabilities: vec![150, 250, 350, 400],
                min_guaranteed: 0,
            },
            DropTable {
                id: 2,
                entries: vec![DropEntry::Item(4), DropEntry::Item(5), DropEntry::Item(7)],
                probabilities: vec![500, 700, 1000],
                min_guaranteed: 0,
            },
            DropTable {
                id: 10,
                entries: vec![DropEntry::Table(2), DropEntry::Item(2), DropEntry::Item(8)],
                probabilities: vec![300, 500, 510],
                min_guaranteed: 2,
            },
        ],
        items: get_item_definitions(),
        skills: vec![SkillDef {
            id: 1,
            name: "War Cry Slam".into(),
            mana_cost: 60,
            damage_percent: 180,
            kind: AttackKind::Arts,
        }],
    }
}
