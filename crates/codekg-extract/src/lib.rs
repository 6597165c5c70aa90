//! Two-pass Python AST extraction for the CodeKG knowledge graph.
//!
//! This crate provides:
//! - Deterministic repository traversal (sorted file order, skip list)
//! - Pass 1: modules, classes, functions, methods, CONTAINS / IMPORTS /
//!   INHERITS edges with evidence
//! - Pass 2: a best-effort, conservative call graph
//!
//! Same input produces byte-identical output: files are enumerated in
//! sorted order and every intermediate map iterates deterministically.

pub mod extractor;
pub mod python;
pub mod walk;

// Re-exports
pub use extractor::{extract_repo, ExtractStats, Extractor};
pub use walk::collect_python_files;

use thiserror::Error;

/// Errors that abort extraction entirely.
///
/// Per-file parse and decode failures are not here: they are logged as
/// warnings and the file is skipped.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to enumerate repository root {path}: {source}")]
    Walk {
        path: String,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to load the Python grammar: {0}")]
    Language(#[from] tree_sitter::LanguageError),
}
