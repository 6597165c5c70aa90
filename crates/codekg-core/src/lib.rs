//! Graph primitives for the CodeKG knowledge graph.
//!
//! This crate provides:
//! - Immutable `Node` and `Edge` value types with typed kinds and relations
//! - Deterministic identifier construction (`mod:`, `cls:`, `fn:`, `m:`, `sym:`)
//! - Repository-relative path normalization
//! - Engine configuration with `.codekg/` defaults

pub mod config;
pub mod error;
pub mod ids;
pub mod node;

// Re-exports
pub use config::CodeKgConfig;
pub use error::QueryError;
pub use ids::{module_qualname, node_id, symbol_id, to_repo_relative};
pub use node::{Edge, Evidence, Node, NodeKind, Rel};

/// Default embedding model identifier (MiniLM family, 384 dimensions).
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Fallback embedding dimension when a provider cannot report one.
pub const DEFAULT_DIMENSION: usize = 384;

/// Default vector table name.
pub const DEFAULT_TABLE: &str = "codekg_nodes";
