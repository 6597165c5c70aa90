//! SQLite-backed canonical store for the CodeKG knowledge graph.
//!
//! This crate provides:
//! - The authoritative `nodes` / `edges` tables with stable ids
//! - Transactional, idempotent writes (wipe or upsert)
//! - Filtered node enumeration and edge lookup
//! - Bounded undirected BFS expansion with `(best_hop, via_seed)` provenance
//!
//! The store is the source of truth; the vector index is derived from it
//! and disposable.

pub mod store;

pub use store::{GraphStore, Provenance, StoreStats};

use thiserror::Error;

/// Errors raised by the canonical store.
///
/// A failed write rolls back: prior store contents are preserved.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create store directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
