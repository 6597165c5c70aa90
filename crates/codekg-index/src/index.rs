//! The semantic index: embedding-text construction, batched build, and
//! seed search.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use codekg_core::{Node, NodeKind, DEFAULT_DIMENSION};
use codekg_store::GraphStore;

use crate::embeddings::Embedder;
use crate::vector::{normalize, VectorRow, VectorStore};
use crate::IndexError;

/// Node kinds that get embedded. Symbol nodes never do.
pub const INDEX_KINDS: [NodeKind; 4] = [
    NodeKind::Module,
    NodeKind::Class,
    NodeKind::Function,
    NodeKind::Method,
];

/// Canonical text document used for embedding.
///
/// Stable: changing this format invalidates every existing index.
pub fn build_index_text(node: &Node) -> String {
    format!(
        "KIND: {}\nNAME: {}\nQUALNAME: {}\nMODULE: {}\nLINE: {}\nDOCSTRING:\n{}",
        node.kind,
        node.name,
        node.qualname.as_deref().unwrap_or(""),
        node.module_path.as_deref().unwrap_or(""),
        node.lineno.unwrap_or(0),
        node.docstring.as_deref().map(str::trim).unwrap_or(""),
    )
}

/// A single result from a semantic vector search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedHit {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub qualname: String,
    pub module_path: String,
    /// Opaque non-negative distance; smaller is closer.
    pub distance: f32,
    /// Zero-based rank in the result list.
    pub rank: usize,
}

/// Statistics from an index build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub indexed_rows: usize,
    pub dim: usize,
    pub table: String,
    pub index_dir: String,
}

/// Vector index over the graph store's embeddable nodes.
///
/// Derived and disposable: it can be rebuilt from the store at any time
/// without data loss.
pub struct SemanticIndex {
    index_dir: PathBuf,
    table_name: String,
    embedder: Arc<dyn Embedder>,
}

impl SemanticIndex {
    pub fn new(
        index_dir: impl AsRef<Path>,
        table_name: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            index_dir: index_dir.as_ref().to_path_buf(),
            table_name: table_name.into(),
            embedder,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Vector dimension in use (embedder-reported, with a 384 fallback).
    pub fn dimension(&self) -> usize {
        self.embedder.dimension().unwrap_or(DEFAULT_DIMENSION)
    }

    /// Build (or rebuild) the vector index from the store.
    ///
    /// Eligible nodes are enumerated in id order and embedded in fixed-size
    /// batches; rows are upserted by node id.
    pub async fn build(&self, store: &GraphStore, wipe: bool) -> Result<IndexStats, IndexError> {
        let mut nodes = store.query_nodes(Some(INDEX_KINDS.as_slice()), None)?;
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let dim = self.dimension();
        let mut vectors = VectorStore::open(&self.index_dir, &self.table_name, dim, wipe)?;

        let batch_size = self.embedder.max_batch_size().max(1);
        let mut indexed = 0usize;
        for chunk in nodes.chunks(batch_size) {
            let texts: Vec<String> = chunk.iter().map(build_index_text).collect();
            let embedded = self
                .embedder
                .embed_texts(&texts)
                .await
                .map_err(IndexError::Embedder)?;

            let rows: Vec<VectorRow> = chunk
                .iter()
                .zip(embedded.into_iter())
                .map(|(node, mut vector)| {
                    normalize(&mut vector);
                    VectorRow {
                        id: node.id.clone(),
                        kind: node.kind.to_string(),
                        name: node.name.clone(),
                        qualname: node.qualname.clone().unwrap_or_default(),
                        module_path: node.module_path.clone().unwrap_or_default(),
                        vector,
                    }
                })
                .collect();
            indexed += rows.len();
            vectors.upsert(rows);
            debug!("indexed {indexed} nodes so far");
        }

        vectors.save()?;
        info!(
            "vector index built: {} rows, dim {} in {:?}",
            indexed, dim, self.index_dir
        );
        Ok(IndexStats {
            indexed_rows: indexed,
            dim,
            table: self.table_name.clone(),
            index_dir: self.index_dir.display().to_string(),
        })
    }

    /// k-nearest-neighbour search over the index.
    ///
    /// Returns up to `k` seeds ordered by ascending distance (ties break by
    /// id), with ranks `0..k`. An absent or empty index yields no seeds.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SeedHit>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vectors = VectorStore::open_for_search(&self.index_dir, &self.table_name)?;
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed_query(query)
            .await
            .map_err(IndexError::Embedder)?;

        let hits = vectors
            .nearest(&query_vector, k)
            .into_iter()
            .enumerate()
            .map(|(rank, n)| SeedHit {
                id: n.row.id,
                kind: n.row.kind,
                name: n.row.name,
                qualname: n.row.qualname,
                module_path: n.row.module_path,
                distance: n.distance,
                rank,
            })
            .collect();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use codekg_core::node_id;
    use codekg_store::GraphStore;
    use tempfile::tempdir;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    fn node(kind: NodeKind, qualname: &str, doc: Option<&str>) -> Node {
        let qn = if kind == NodeKind::Module {
            None
        } else {
            Some(qualname.to_string())
        };
        Node {
            id: node_id(kind, "pkg/a.py", qn.as_deref()),
            kind,
            name: qualname.rsplit('.').next().unwrap().to_string(),
            qualname: Some(qualname.to_string()),
            module_path: Some("pkg/a.py".to_string()),
            lineno: Some(1),
            end_lineno: Some(3),
            docstring: doc.map(|d| d.to_string()),
        }
    }

    fn store_with(nodes: Vec<Node>, dir: &Path) -> GraphStore {
        let mut store = GraphStore::open(dir.join("graph.sqlite")).unwrap();
        store.write(&nodes, &[], true).unwrap();
        store
    }

    #[test]
    fn test_index_text_format_is_stable() {
        let n = node(NodeKind::Function, "foo", Some("Does foo."));
        assert_eq!(
            build_index_text(&n),
            "KIND: function\nNAME: foo\nQUALNAME: foo\nMODULE: pkg/a.py\nLINE: 1\nDOCSTRING:\nDoes foo."
        );
    }

    #[test]
    fn test_index_text_fallbacks() {
        let n = Node {
            id: "sym:os".to_string(),
            kind: NodeKind::Symbol,
            name: "os".to_string(),
            qualname: None,
            module_path: None,
            lineno: None,
            end_lineno: None,
            docstring: None,
        };
        assert_eq!(
            build_index_text(&n),
            "KIND: symbol\nNAME: os\nQUALNAME: \nMODULE: \nLINE: 0\nDOCSTRING:\n"
        );
    }

    #[test]
    fn test_build_skips_symbols() {
        let dir = tempdir().unwrap();
        let mut nodes = vec![
            node(NodeKind::Function, "foo", None),
            node(NodeKind::Class, "Bar", None),
        ];
        nodes.push(Node::symbol("os"));
        let store = store_with(nodes, dir.path());

        let index = SemanticIndex::new(
            dir.path().join("vectors"),
            "codekg_nodes",
            Arc::new(HashEmbedder::new(64)),
        );
        let stats = block_on(index.build(&store, true)).unwrap();
        assert_eq!(stats.indexed_rows, 2);
        assert_eq!(stats.dim, 64);
    }

    #[test]
    fn test_search_orders_by_distance() {
        let dir = tempdir().unwrap();
        let store = store_with(
            vec![
                node(NodeKind::Function, "connect_database", Some("Open a database connection.")),
                node(NodeKind::Function, "render_template", Some("Render HTML.")),
            ],
            dir.path(),
        );
        let index = SemanticIndex::new(
            dir.path().join("vectors"),
            "codekg_nodes",
            Arc::new(HashEmbedder::new(128)),
        );
        block_on(index.build(&store, true)).unwrap();

        let hits = block_on(index.search("database connection", 2)).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "fn:pkg/a.py:connect_database");
        assert_eq!(hits[0].rank, 0);
        assert_eq!(hits[1].rank, 1);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn test_search_k_zero_is_empty() {
        let dir = tempdir().unwrap();
        let store = store_with(vec![node(NodeKind::Function, "foo", None)], dir.path());
        let index = SemanticIndex::new(
            dir.path().join("vectors"),
            "codekg_nodes",
            Arc::new(HashEmbedder::new(32)),
        );
        block_on(index.build(&store, true)).unwrap();
        assert!(block_on(index.search("foo", 0)).unwrap().is_empty());
    }

    #[test]
    fn test_search_without_index_is_empty() {
        let dir = tempdir().unwrap();
        let index = SemanticIndex::new(
            dir.path().join("vectors"),
            "codekg_nodes",
            Arc::new(HashEmbedder::new(32)),
        );
        assert!(block_on(index.search("anything", 5)).unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_with(
            vec![
                node(NodeKind::Function, "alpha", None),
                node(NodeKind::Function, "beta", None),
            ],
            dir.path(),
        );
        let index = SemanticIndex::new(
            dir.path().join("vectors"),
            "codekg_nodes",
            Arc::new(HashEmbedder::new(64)),
        );
        let first = block_on(index.build(&store, true)).unwrap();
        let second = block_on(index.build(&store, true)).unwrap();
        assert_eq!(first, second);

        let h1 = block_on(index.search("alpha", 2)).unwrap();
        let h2 = block_on(index.search("alpha", 2)).unwrap();
        assert_eq!(h1, h2);
    }
}
