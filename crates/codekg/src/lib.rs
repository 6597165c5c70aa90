//! CodeKG: a deterministic, auditable knowledge graph over a Python source
//! tree, with hybrid natural-language + structural retrieval.
//!
//! The pipeline, bottom to top:
//! - [`codekg_extract`] parses every `.py` file and emits nodes and edges
//! - [`codekg_store`] persists the canonical graph in SQLite
//! - [`codekg_index`] derives a vector index used only to seed retrieval
//! - [`CodeKG`] (this crate) coordinates builds and executes hybrid
//!   queries: semantic seeding, bounded graph expansion, deterministic
//!   ranking, span deduplication, and source-grounded snippet packing
//!
//! ```no_run
//! use codekg::{CodeKG, CodeKgConfig, PackOpts, QueryOpts};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut kg = CodeKG::new(CodeKgConfig::new("/path/to/repo"));
//! let stats = kg.build(true).await?;
//! println!("{stats}");
//!
//! let result = kg.query("database connection setup", &QueryOpts::default()).await?;
//! let pack = kg.pack("configuration loading", &PackOpts::default()).await?;
//! println!("{}", pack.to_markdown());
//! # Ok(())
//! # }
//! ```

pub mod kg;
pub mod result;
pub mod snippet;

// Re-exports
pub use codekg_core::{CodeKgConfig, Edge, Evidence, Node, NodeKind, QueryError, Rel};
pub use codekg_index::{Embedder, HashEmbedder, HttpEmbedder, SeedHit};
pub use codekg_store::{GraphStore, Provenance, StoreStats};
pub use kg::{CodeKG, PackOpts, QueryOpts};
pub use result::{BuildStats, PackFormat, QueryResult, RankedNode, Snippet, SnippetPack};
