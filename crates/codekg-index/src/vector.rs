//! On-disk vector store.
//!
//! One JSON table per index directory, keyed by node id. The table records
//! its distance metric and dimension; a dimension that no longer matches
//! the embedder is an error unless the caller wipes. The whole directory is
//! disposable; the graph store is the source of truth.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::IndexError;

/// Distance metric identifier recorded in the table header.
pub const METRIC_COSINE: &str = "cosine";

/// One embedded node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRow {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub qualname: String,
    pub module_path: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorTable {
    metric: String,
    dim: usize,
    rows: BTreeMap<String, VectorRow>,
}

impl VectorTable {
    fn new(dim: usize) -> Self {
        Self {
            metric: METRIC_COSINE.to_string(),
            dim,
            rows: BTreeMap::new(),
        }
    }
}

/// A nearest-neighbour match, before rank assignment.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub row: VectorRow,
    pub distance: f32,
}

/// Directory-backed vector table with brute-force cosine k-NN.
pub struct VectorStore {
    dir: PathBuf,
    table_name: String,
    table: VectorTable,
}

impl VectorStore {
    /// Open the table in `dir`, creating an empty one with dimension `dim`
    /// if absent. With `wipe` any existing table is dropped and recreated
    /// at the current dimension; otherwise a stored dimension must match.
    pub fn open(
        dir: impl AsRef<Path>,
        table_name: &str,
        dim: usize,
        wipe: bool,
    ) -> Result<Self, IndexError> {
        let dir = dir.as_ref().to_path_buf();
        let path = table_path(&dir, table_name);

        let table = if wipe || !path.exists() {
            VectorTable::new(dim)
        } else {
            let table = read_table(&path)?;
            if table.dim != dim {
                return Err(IndexError::DimensionMismatch {
                    found: table.dim,
                    expected: dim,
                });
            }
            table
        };

        Ok(Self {
            dir,
            table_name: table_name.to_string(),
            table,
        })
    }

    /// Open an existing table read-only for search. A missing table yields
    /// an empty store (searches return nothing).
    pub fn open_for_search(dir: impl AsRef<Path>, table_name: &str) -> Result<Self, IndexError> {
        let dir = dir.as_ref().to_path_buf();
        let path = table_path(&dir, table_name);
        let table = if path.exists() {
            read_table(&path)?
        } else {
            VectorTable::new(0)
        };
        Ok(Self {
            dir,
            table_name: table_name.to_string(),
            table,
        })
    }

    pub fn len(&self) -> usize {
        self.table.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.rows.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.table.dim
    }

    /// Insert or replace rows by node id.
    pub fn upsert(&mut self, rows: Vec<VectorRow>) {
        for row in rows {
            self.table.rows.insert(row.id.clone(), row);
        }
    }

    /// Persist the table to disk.
    pub fn save(&self) -> Result<(), IndexError> {
        fs::create_dir_all(&self.dir).map_err(|source| IndexError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;
        let path = table_path(&self.dir, &self.table_name);
        let json = serde_json::to_string(&self.table).map_err(|source| IndexError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| IndexError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(
            "saved vector table {} ({} rows, dim {})",
            path.display(),
            self.table.rows.len(),
            self.table.dim
        );
        Ok(())
    }

    /// The `k` nearest rows to `query`, by ascending cosine distance.
    /// Ties break by id, so search order is total and deterministic.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let mut unit_query = query.to_vec();
        normalize(&mut unit_query);

        let mut neighbors: Vec<Neighbor> = self
            .table
            .rows
            .values()
            .map(|row| Neighbor {
                distance: cosine_distance(&unit_query, &row.vector),
                row: row.clone(),
            })
            .collect();
        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.row.id.cmp(&b.row.id))
        });
        neighbors.truncate(k);
        neighbors
    }
}

fn table_path(dir: &Path, table_name: &str) -> PathBuf {
    dir.join(format!("{table_name}.json"))
}

fn read_table(path: &Path) -> Result<VectorTable, IndexError> {
    let raw = fs::read_to_string(path).map_err(|source| IndexError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| IndexError::Corrupt {
        path: path.display().to_string(),
        source,
    })
}

/// Cosine distance: `1 - cos(a, b)`, assuming `b` is unit-norm (vectors are
/// normalized at build time). Non-negative, smaller is closer.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (1.0 - dot).max(0.0)
}

pub(crate) fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
