//! The `GraphStore`: canonical persistence and traversal primitives.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use codekg_core::{Edge, Evidence, Node, NodeKind, Rel};

use crate::StoreError;

const SCHEMA_SQL: &str = "
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;

CREATE TABLE IF NOT EXISTS nodes (
  id           TEXT PRIMARY KEY,
  kind         TEXT NOT NULL,
  name         TEXT NOT NULL,
  qualname     TEXT,
  module_path  TEXT,
  lineno       INTEGER,
  end_lineno   INTEGER,
  docstring    TEXT
);

CREATE TABLE IF NOT EXISTS edges (
  src      TEXT NOT NULL,
  rel      TEXT NOT NULL,
  dst      TEXT NOT NULL,
  evidence TEXT,
  PRIMARY KEY (src, rel, dst)
);

CREATE INDEX IF NOT EXISTS idx_nodes_kind   ON nodes(kind);
CREATE INDEX IF NOT EXISTS idx_nodes_name   ON nodes(name);
CREATE INDEX IF NOT EXISTS idx_nodes_module ON nodes(module_path);

CREATE INDEX IF NOT EXISTS idx_edges_src ON edges(src);
CREATE INDEX IF NOT EXISTS idx_edges_dst ON edges(dst);
CREATE INDEX IF NOT EXISTS idx_edges_rel ON edges(rel);
";

/// Provenance of a node reached by `expand`: the minimum hop distance from
/// any seed, and the lexicographically smallest seed achieving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub best_hop: u32,
    pub via_seed: String,
}

/// Node and edge counts grouped by kind and relation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub db_path: String,
    pub total_nodes: u64,
    pub total_edges: u64,
    pub node_counts: BTreeMap<String, u64>,
    pub edge_counts: BTreeMap<String, u64>,
}

/// SQLite-backed authoritative store for the knowledge graph.
///
/// Writes run inside a single transaction, which also gives the writer an
/// exclusive lock on the database file for the duration of the write.
/// Readers take no lock.
pub struct GraphStore {
    db_path: PathBuf,
    conn: Connection,
}

impl GraphStore {
    /// Open (or create) the store at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        debug!("opened graph store at {:?}", db_path);
        Ok(Self { db_path, conn })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Delete all nodes and edges.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM edges", [])?;
        tx.execute("DELETE FROM nodes", [])?;
        tx.commit()?;
        Ok(())
    }

    /// Persist a complete graph atomically.
    ///
    /// With `wipe` the tables are cleared first; otherwise rows are upserted
    /// by primary key. A failure mid-write rolls back and leaves the store
    /// in its prior state.
    pub fn write(&mut self, nodes: &[Node], edges: &[Edge], wipe: bool) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        if wipe {
            tx.execute("DELETE FROM edges", [])?;
            tx.execute("DELETE FROM nodes", [])?;
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO nodes
                   (id, kind, name, qualname, module_path, lineno, end_lineno, docstring)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                   kind=excluded.kind,
                   name=excluded.name,
                   qualname=excluded.qualname,
                   module_path=excluded.module_path,
                   lineno=excluded.lineno,
                   end_lineno=excluded.end_lineno,
                   docstring=excluded.docstring",
            )?;
            for n in nodes {
                stmt.execute(params![
                    n.id,
                    n.kind.as_str(),
                    n.name,
                    n.qualname,
                    n.module_path,
                    n.lineno,
                    n.end_lineno,
                    n.docstring,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO edges (src, rel, dst, evidence)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(src, rel, dst) DO UPDATE SET
                   evidence=excluded.evidence",
            )?;
            for e in edges {
                let evidence = e
                    .evidence
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .unwrap_or(None);
                stmt.execute(params![e.src, e.rel.as_str(), e.dst, evidence])?;
            }
        }
        tx.commit()?;
        info!(
            "wrote {} nodes, {} edges to {:?} (wipe={})",
            nodes.len(),
            edges.len(),
            self.db_path,
            wipe
        );
        Ok(())
    }

    /// Fetch a single node by id. Absent ids are `Ok(None)`, not errors.
    pub fn node(&self, node_id: &str) -> Result<Option<Node>, StoreError> {
        let node = self
            .conn
            .query_row(
                "SELECT id, kind, name, qualname, module_path, lineno, end_lineno, docstring
                 FROM nodes WHERE id = ?1",
                params![node_id],
                row_to_node,
            )
            .optional()?;
        Ok(node)
    }

    /// Enumerate nodes matching optional filters, ordered by
    /// `(module_path, lineno, id)`.
    pub fn query_nodes(
        &self,
        kinds: Option<&[NodeKind]>,
        module_prefix: Option<&str>,
    ) -> Result<Vec<Node>, StoreError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(kinds) = kinds {
            let placeholders = vec!["?"; kinds.len()].join(",");
            clauses.push(format!("kind IN ({placeholders})"));
            params.extend(kinds.iter().map(|k| k.as_str().to_string()));
        }
        if let Some(prefix) = module_prefix {
            clauses.push("module_path LIKE ? || '%'".to_string());
            params.push(prefix.to_string());
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT id, kind, name, qualname, module_path, lineno, end_lineno, docstring
             FROM nodes {where_clause}
             ORDER BY module_path, lineno, id"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), row_to_node)?;
        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }
        Ok(nodes)
    }

    /// Every edge whose `src` and `dst` are both in `node_ids`.
    pub fn edges_within(&self, node_ids: &BTreeSet<String>) -> Result<Vec<Edge>, StoreError> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }

        self.conn.execute("DROP TABLE IF EXISTS _tmp_ids", [])?;
        self.conn
            .execute("CREATE TEMP TABLE _tmp_ids (id TEXT PRIMARY KEY)", [])?;
        {
            let mut stmt = self
                .conn
                .prepare("INSERT INTO _tmp_ids (id) VALUES (?1)")?;
            for id in node_ids {
                stmt.execute(params![id])?;
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT e.src, e.rel, e.dst, e.evidence
             FROM edges e
             JOIN _tmp_ids s ON s.id = e.src
             JOIN _tmp_ids d ON d.id = e.dst
             ORDER BY e.src, e.rel, e.dst",
        )?;
        let rows = stmt.query_map([], row_to_edge)?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        self.conn.execute("DROP TABLE IF EXISTS _tmp_ids", [])?;
        Ok(edges)
    }

    /// Bounded breadth-first expansion from `seeds`, treating edges as
    /// undirected so callers and callees are reached alike.
    ///
    /// Every seed is included at hop 0. Each reachable node maps to its
    /// minimum hop count and the lexicographically smallest seed that
    /// achieved it; the frontier is processed in sorted order per hop, so
    /// the result is deterministic.
    pub fn expand(
        &self,
        seeds: &BTreeSet<String>,
        hop: u32,
        rels: &[Rel],
    ) -> Result<BTreeMap<String, Provenance>, StoreError> {
        let mut meta: BTreeMap<String, Provenance> = seeds
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    Provenance {
                        best_hop: 0,
                        via_seed: s.clone(),
                    },
                )
            })
            .collect();
        if hop == 0 || seeds.is_empty() || rels.is_empty() {
            return Ok(meta);
        }

        let placeholders = vec!["?"; rels.len()].join(",");
        let sql = format!(
            "SELECT src, dst FROM edges
             WHERE (src = ? OR dst = ?) AND rel IN ({placeholders})"
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let mut frontier: BTreeSet<String> = seeds.clone();
        for h in 1..=hop {
            let mut next: BTreeSet<String> = BTreeSet::new();
            for nid in &frontier {
                let via = match meta.get(nid) {
                    Some(p) => p.via_seed.clone(),
                    None => continue,
                };
                let mut args: Vec<String> = vec![nid.clone(), nid.clone()];
                args.extend(rels.iter().map(|r| r.as_str().to_string()));
                let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (src, dst) = row?;
                    for cand in [src, dst] {
                        let newly_reached = match meta.get(&cand) {
                            None => true,
                            // Same hop reached through a smaller seed wins
                            // the tie; the node is already in the frontier.
                            Some(p) => {
                                if !(p.best_hop == h && via < p.via_seed) {
                                    continue;
                                }
                                false
                            }
                        };
                        meta.insert(
                            cand.clone(),
                            Provenance {
                                best_hop: h,
                                via_seed: via.clone(),
                            },
                        );
                        if newly_reached {
                            next.insert(cand);
                        }
                    }
                }
            }
            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }
        Ok(meta)
    }

    /// Node and edge counts grouped by kind and relation.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let total_nodes: u64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))?;
        let total_edges: u64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0))?;

        let mut node_counts = BTreeMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM nodes GROUP BY kind")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?;
        for row in rows {
            let (kind, count) = row?;
            node_counts.insert(kind, count);
        }

        let mut edge_counts = BTreeMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT rel, COUNT(*) FROM edges GROUP BY rel")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?;
        for row in rows {
            let (rel, count) = row?;
            edge_counts.insert(rel, count);
        }

        Ok(StoreStats {
            db_path: self.db_path.display().to_string(),
            total_nodes,
            total_edges,
            node_counts,
            edge_counts,
        })
    }
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<Node> {
    let kind: String = row.get(1)?;
    let kind: NodeKind = kind.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Node {
        id: row.get(0)?,
        kind,
        name: row.get(2)?,
        qualname: row.get(3)?,
        module_path: row.get(4)?,
        lineno: row.get(5)?,
        end_lineno: row.get(6)?,
        docstring: row.get(7)?,
    })
}

fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<Edge> {
    let rel: String = row.get(1)?;
    let rel: Rel = rel.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let evidence: Option<String> = row.get(3)?;
    let evidence: Option<Evidence> =
        evidence.and_then(|raw| serde_json::from_str(&raw).ok());
    Ok(Edge {
        src: row.get(0)?,
        rel,
        dst: row.get(2)?,
        evidence,
    })
}
