//! Derived semantic index for the CodeKG knowledge graph.
//!
//! This crate provides:
//! - The `Embedder` trait and two implementations (an HTTP provider for
//!   OpenAI-compatible embedding endpoints and a deterministic
//!   feature-hashing embedder for offline use and tests)
//! - A disposable on-disk vector store (one JSON table per index directory)
//! - `SemanticIndex`: embedding-text construction, batched build, and
//!   k-nearest-neighbour search returning ranked seeds
//!
//! The index is derived from the graph store and can be deleted and rebuilt
//! at any time; the store remains the source of truth.

pub mod embeddings;
pub mod index;
pub mod vector;

pub use embeddings::{Embedder, HashEmbedder, HttpEmbedder};
pub use index::{build_index_text, IndexStats, SeedHit, SemanticIndex};
pub use vector::VectorStore;

use thiserror::Error;

/// Errors raised while building or searching the vector index.
///
/// These are fatal to the index operation only; the graph store remains
/// intact.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedder error: {0}")]
    Embedder(#[source] anyhow::Error),

    #[error("vector store I/O at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt vector table {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("vector dimension mismatch: table has {found}, embedder has {expected}")]
    DimensionMismatch { found: usize, expected: usize },

    #[error("graph store error: {0}")]
    Store(#[from] codekg_store::StoreError),
}
