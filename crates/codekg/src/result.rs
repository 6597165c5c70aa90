//! Structured results: build statistics, query results, and snippet packs.
//!
//! All result types serialize to JSON and back unchanged; `SnippetPack`
//! additionally renders to line-numbered markdown.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use codekg_core::{Edge, Node};

/// Statistics returned by the build pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStats {
    pub repo_root: String,
    pub db_path: String,
    pub total_nodes: u64,
    pub total_edges: u64,
    pub node_counts: BTreeMap<String, u64>,
    pub edge_counts: BTreeMap<String, u64>,
    /// Rows embedded into the vector index (`None` if the index was not built).
    pub indexed_rows: Option<usize>,
    /// Embedding dimension (`None` if the index was not built).
    pub index_dim: Option<usize>,
}

impl fmt::Display for BuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "repo_root   : {}", self.repo_root)?;
        writeln!(f, "db_path     : {}", self.db_path)?;
        writeln!(
            f,
            "nodes       : {}  {:?}",
            self.total_nodes, self.node_counts
        )?;
        write!(
            f,
            "edges       : {}  {:?}",
            self.total_edges, self.edge_counts
        )?;
        if let (Some(rows), Some(dim)) = (self.indexed_rows, self.index_dim) {
            write!(f, "\nindexed     : {rows} vectors  dim={dim}")?;
        }
        Ok(())
    }
}

/// A source-grounded code snippet: a closed 1-based line range plus the
/// line-numbered extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub path: String,
    pub start: u32,
    pub end: u32,
    pub text: String,
}

/// A node returned by a query, with its expansion provenance and, for
/// packs, an optional snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedNode {
    #[serde(flatten)]
    pub node: Node,
    /// Minimum hop distance from any seed.
    pub best_hop: u32,
    /// Seed that produced the shortest path (lexicographically smallest on
    /// ties).
    pub via_seed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<Snippet>,
}

/// Result of a hybrid query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    /// Number of semantic seed nodes.
    pub seeds: usize,
    /// Total nodes after graph expansion.
    pub expanded_nodes: usize,
    /// Nodes returned after filtering and ranking.
    pub returned_nodes: usize,
    pub hop: u32,
    pub rels: Vec<String>,
    pub nodes: Vec<RankedNode>,
    /// Edges whose endpoints are both in the returned node set.
    pub edges: Vec<Edge>,
}

impl QueryResult {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Output format for [`SnippetPack::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackFormat {
    Markdown,
    Json,
}

/// Result of a snippet pack: a query result whose nodes carry source
/// snippets, sized to fit a typical model context window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnippetPack {
    pub query: String,
    pub seeds: usize,
    pub expanded_nodes: usize,
    pub returned_nodes: usize,
    pub hop: u32,
    pub rels: Vec<String>,
    /// Embedding model the seeds came from.
    pub model: String,
    pub nodes: Vec<RankedNode>,
    pub edges: Vec<Edge>,
}

impl SnippetPack {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Render as a markdown context pack: one section per node with a
    /// header carrying id, kind, module path, and line range, followed by
    /// the line-numbered snippet in a fenced block.
    pub fn to_markdown(&self) -> String {
        let mut out: Vec<String> = Vec::new();
        out.push("# CodeKG Snippet Pack\n".to_string());
        out.push(format!("**Query:** `{}`  ", self.query));
        out.push(format!("**Seeds:** {}  ", self.seeds));
        out.push(format!(
            "**Expanded nodes:** {} (returned: {})  ",
            self.expanded_nodes, self.returned_nodes
        ));
        out.push(format!("**hop:** {}  ", self.hop));
        out.push(format!("**rels:** {}  ", self.rels.join(", ")));
        out.push(format!("**model:** {}  ", self.model));
        out.push("\n---\n".to_string());
        out.push("## Nodes\n".to_string());

        for rn in &self.nodes {
            let n = &rn.node;
            let location = match (&n.module_path, &rn.snippet) {
                (Some(mp), Some(sn)) => format!("{mp}:{}-{}", sn.start, sn.end),
                (Some(mp), None) => mp.clone(),
                (None, _) => String::new(),
            };
            out.push(format!("### {} `{}` — {}", n.kind, n.id, location));
            if let Some(doc) = &n.docstring {
                if let Some(first) = doc.trim().lines().next() {
                    let short: String = first.chars().take(140).collect();
                    out.push(format!("- doc: {short}"));
                }
            }
            if let Some(sn) = &rn.snippet {
                out.push(String::new());
                out.push(format!("```python\n{}\n```", sn.text));
            }
            out.push(String::new());
        }

        out.push("\n---\n".to_string());
        out.push("## Edges\n".to_string());
        for e in &self.edges {
            out.push(format!("- `{}` -[{}]-> `{}`", e.src, e.rel, e.dst));
        }
        out.push(String::new());
        out.join("\n")
    }

    /// Write the pack to a file as markdown or JSON.
    pub fn save(&self, path: impl AsRef<Path>, format: PackFormat) -> anyhow::Result<()> {
        let text = match format {
            PackFormat::Markdown => self.to_markdown(),
            PackFormat::Json => self.to_json()?,
        };
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }
}
