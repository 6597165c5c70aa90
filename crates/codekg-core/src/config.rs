//! Engine configuration.
//!
//! All artifact locations default to a `.codekg/` directory under the
//! repository root.

use std::path::{Path, PathBuf};

use crate::{DEFAULT_MODEL, DEFAULT_TABLE};

/// Directory holding the on-disk artifacts, relative to the repo root.
pub const ARTIFACT_DIR: &str = ".codekg";

/// Configuration for a CodeKG engine instance.
#[derive(Debug, Clone)]
pub struct CodeKgConfig {
    /// Root of the source tree to analyse.
    pub repo_root: PathBuf,
    /// Canonical graph database location.
    pub db_path: PathBuf,
    /// Vector index directory.
    pub index_dir: PathBuf,
    /// Embedder model identifier; determines the vector dimension.
    pub model_name: String,
    /// Vector table name.
    pub table_name: String,
}

impl CodeKgConfig {
    /// Create a configuration with defaults rooted at `<repo_root>/.codekg/`.
    pub fn new(repo_root: impl AsRef<Path>) -> Self {
        let repo_root = repo_root.as_ref().to_path_buf();
        let artifacts = repo_root.join(ARTIFACT_DIR);
        Self {
            db_path: artifacts.join("graph.sqlite"),
            index_dir: artifacts.join("vectors"),
            model_name: DEFAULT_MODEL.to_string(),
            table_name: DEFAULT_TABLE.to_string(),
            repo_root,
        }
    }

    /// Override the graph database path.
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Override the vector index directory.
    pub fn with_index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.index_dir = dir.into();
        self
    }

    /// Override the embedder model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_name = model.into();
        self
    }

    /// Override the vector table name.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CodeKgConfig::new("/repo");
        assert_eq!(config.repo_root, PathBuf::from("/repo"));
        assert_eq!(config.db_path, PathBuf::from("/repo/.codekg/graph.sqlite"));
        assert_eq!(config.index_dir, PathBuf::from("/repo/.codekg/vectors"));
        assert_eq!(config.model_name, DEFAULT_MODEL);
        assert_eq!(config.table_name, DEFAULT_TABLE);
    }

    #[test]
    fn test_config_overrides() {
        let config = CodeKgConfig::new("/repo")
            .with_db_path("/tmp/kg.sqlite")
            .with_index_dir("/tmp/vec")
            .with_model("custom-model")
            .with_table("nodes_v2");
        assert_eq!(config.db_path, PathBuf::from("/tmp/kg.sqlite"));
        assert_eq!(config.index_dir, PathBuf::from("/tmp/vec"));
        assert_eq!(config.model_name, "custom-model");
        assert_eq!(config.table_name, "nodes_v2");
    }
}
