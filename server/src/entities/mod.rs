//! Server-side entity definitions.

mod monster;
mod companion;

pub use monster::{Monster, MonsterState, Target, DamageApplied};
pub use companion::{Companion, CompanionStats, CompanionState};

use std::sync::Arc;

use crate::registry::{EntityKind, EntityRegistry, Registrable};

/// What a registry slot binds to
#[derive(Debug, Clone)]
pub enum RegisteredEntity {
    Monster(Arc<Monster>),
    Companion(Arc<Companion>),
}

impl RegisteredEntity {
    pub fn as_monster(&self) -> Option<&Arc<Monster>> {
        match self {
            Self::Monster(monster) => Some(monster),
            Self::Companion(_) => None,
        }
    }
    
    pub fn as_companion(&self) -> Option<&Arc<Companion>> {
        match self {
            Self::Companion(companion) => Some(companion),
            Self::Monster(_) => None,
        }
    }
}

impl Registrable for RegisteredEntity {
    fn kind(&self) -> EntityKind {
        match self {
            Self::Monster(_) => EntityKind::Monster,
            Self::Companion(_) => EntityKind::Companion,
        }
    }
}

impl EntityRegistry<RegisteredEntity> {
    /// Monsters bound in a partition
    pub fn monsters_in(&self, server: u16, map: u32) -> Vec<Arc<Monster>> {
        self.entities(server, map)
            .into_iter()
            .filter_map(|(_, entity)| entity.as_monster().cloned())
            .collect()
    }

    /// Companions bound in a partition
    pub fn companions_in(&self, server: u16, map: u32) -> Vec<Arc<Companion>> {
        self.entities(server, map)
            .into_iter()
            .filter_map(|(_, entity)| entity.as_companion().cloned())
            .collect()
    }
}
