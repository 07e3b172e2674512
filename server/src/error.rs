//! Hard failures surfaced by the simulation core.
//!
//! Expected absences (vanished targets, unknown handles, missing claimers) are
//! `Option`s at the call sites and never become a `SimError`.

use thiserror::Error;

use crate::registry::EntityKind;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("no free {kind:?} handle left on server {server} map {map}")]
    HandlesExhausted {
        kind: EntityKind,
        server: u16,
        map: u32,
    },

    #[error("unknown NPC template {0}")]
    UnknownNpc(u32),

    #[error("unknown spawn template {0}")]
    UnknownSpawnTemplate(u32),

    #[error("malformed spawn template {id}: {reason}")]
    MalformedSpawnTemplate { id: u32, reason: String },

    #[error("malformed drop table {id}: {reason}")]
    MalformedDropTable { id: u32, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, SimError>;
