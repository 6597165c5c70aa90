//! Query-parameter errors shared across the engine.

use thiserror::Error;

/// Invalid query parameters, rejected before any I/O.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query string is empty")]
    EmptyQuery,

    #[error("unknown relation name: {0}")]
    UnknownRelation(String),

    #[error("unknown node kind: {0}")]
    UnknownKind(String),

    #[error("graph store has not been built yet (run a build first)")]
    StoreNotBuilt,
}
