//! The `CodeKG` orchestrator.
//!
//! Owns the full pipeline: repository → extractor → graph store → semantic
//! index → query results and snippet packs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use codekg_core::{CodeKgConfig, Node, NodeKind, QueryError, Rel};
use codekg_extract::Extractor;
use codekg_index::{Embedder, HttpEmbedder, SeedHit, SemanticIndex};
use codekg_store::{GraphStore, StoreStats};

use crate::result::{BuildStats, QueryResult, RankedNode, SnippetPack};
use crate::snippet::{compute_span, make_snippet, spans_overlap, FileCache, SPAN_GAP};

/// Default OpenAI-compatible embedding endpoint for the built-in provider.
pub const DEFAULT_EMBEDDINGS_URL: &str = "http://localhost:8080/v1/embeddings";

/// Parameters for a hybrid query.
#[derive(Debug, Clone)]
pub struct QueryOpts {
    /// Top-k semantic seeds.
    pub k: usize,
    /// Graph expansion hops.
    pub hop: u32,
    /// Edge relations to expand.
    pub rels: Vec<Rel>,
    /// Include `symbol` nodes in results.
    pub include_symbols: bool,
    /// Maximum nodes to return.
    pub max_nodes: usize,
}

impl Default for QueryOpts {
    fn default() -> Self {
        Self {
            k: 8,
            hop: 1,
            rels: Rel::ALL.to_vec(),
            include_symbols: false,
            max_nodes: 25,
        }
    }
}

/// Parameters for a snippet pack.
#[derive(Debug, Clone)]
pub struct PackOpts {
    pub k: usize,
    pub hop: u32,
    pub rels: Vec<Rel>,
    pub include_symbols: bool,
    /// Extra context lines around each definition span.
    pub context: u32,
    /// Maximum lines per snippet block.
    pub max_lines: u32,
    /// Maximum nodes retained overall (applied after the per-file cap).
    pub max_nodes: usize,
    /// Maximum nodes retained per source file.
    pub per_file_cap: usize,
}

impl Default for PackOpts {
    fn default() -> Self {
        Self {
            k: 8,
            hop: 1,
            rels: Rel::ALL.to_vec(),
            include_symbols: false,
            context: 5,
            max_lines: 60,
            max_nodes: 15,
            per_file_cap: 3,
        }
    }
}

/// Top-level orchestrator for the code knowledge graph.
///
/// Coordinates the extractor, the canonical store, and the derived vector
/// index; executes hybrid queries with deterministic ranking.
pub struct CodeKG {
    config: CodeKgConfig,
    embedder: Arc<dyn Embedder>,
    store: Option<GraphStore>,
}

impl CodeKG {
    /// Create an engine with the built-in HTTP embedding provider for the
    /// configured model.
    pub fn new(config: CodeKgConfig) -> Self {
        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            DEFAULT_EMBEDDINGS_URL,
            config.model_name.clone(),
        ));
        Self {
            config,
            embedder,
            store: None,
        }
    }

    /// Create an engine with an injected embedding backend.
    pub fn with_embedder(config: CodeKgConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            embedder,
            store: None,
        }
    }

    pub fn config(&self) -> &CodeKgConfig {
        &self.config
    }

    fn graph_store(&mut self) -> anyhow::Result<&mut GraphStore> {
        if self.store.is_none() {
            let store = GraphStore::open(&self.config.db_path)
                .with_context(|| format!("opening graph store at {:?}", self.config.db_path))?;
            self.store = Some(store);
        }
        self.store
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("graph store not initialised"))
    }

    fn semantic_index(&self) -> SemanticIndex {
        SemanticIndex::new(
            &self.config.index_dir,
            self.config.table_name.clone(),
            Arc::clone(&self.embedder),
        )
    }

    /// Full pipeline: extraction → store → vector index.
    pub async fn build(&mut self, wipe: bool) -> anyhow::Result<BuildStats> {
        let graph_stats = self.build_graph(wipe)?;
        let index_stats = self.build_index(wipe).await?;
        Ok(BuildStats {
            indexed_rows: index_stats.indexed_rows,
            index_dim: index_stats.index_dim,
            ..graph_stats
        })
    }

    /// Extraction → store only.
    pub fn build_graph(&mut self, wipe: bool) -> anyhow::Result<BuildStats> {
        info!("building graph for {:?}", self.config.repo_root);
        let (nodes, edges, _) = Extractor::new(&self.config.repo_root)?
            .extract()
            .context("extraction failed")?;

        let store = self.graph_store()?;
        store.write(&nodes, &edges, wipe)?;
        let stats = store.stats()?;
        Ok(self.build_stats(stats, None, None))
    }

    /// Store → vector index only. Requires a built store.
    pub async fn build_index(&mut self, wipe: bool) -> anyhow::Result<BuildStats> {
        if !self.config.db_path.exists() {
            return Err(QueryError::StoreNotBuilt.into());
        }
        let index = self.semantic_index();
        let store = self.graph_store()?;
        let index_stats = index
            .build(store, wipe)
            .await
            .context("vector index build failed")?;
        let stats = store.stats()?;
        Ok(self.build_stats(
            stats,
            Some(index_stats.indexed_rows),
            Some(index_stats.dim),
        ))
    }

    fn build_stats(
        &self,
        stats: StoreStats,
        indexed_rows: Option<usize>,
        index_dim: Option<usize>,
    ) -> BuildStats {
        BuildStats {
            repo_root: self.config.repo_root.display().to_string(),
            db_path: stats.db_path,
            total_nodes: stats.total_nodes,
            total_edges: stats.total_edges,
            node_counts: stats.node_counts,
            edge_counts: stats.edge_counts,
            indexed_rows,
            index_dim,
        }
    }

    /// Hybrid query: semantic seeding then bounded structural expansion.
    ///
    /// The returned node order is total and deterministic: sorted by
    /// `(best_hop, via-seed distance, kind priority, id)`.
    pub async fn query(&mut self, q: &str, opts: &QueryOpts) -> anyhow::Result<QueryResult> {
        self.check_query(q)?;
        let index = self.semantic_index();
        let seeds = index
            .search(q, opts.k)
            .await
            .context("semantic search failed")?;

        let (mut nodes, expanded) =
            self.expand_and_rank(&seeds, opts.hop, &opts.rels, opts.include_symbols)?;
        nodes.truncate(opts.max_nodes);

        let ids: BTreeSet<String> = nodes.iter().map(|n| n.node.id.clone()).collect();
        let edges = self.graph_store()?.edges_within(&ids)?;

        Ok(QueryResult {
            query: q.to_string(),
            seeds: seeds.len(),
            expanded_nodes: expanded,
            returned_nodes: nodes.len(),
            hop: opts.hop,
            rels: rel_names(&opts.rels),
            nodes,
            edges,
        })
    }

    /// Hybrid query plus source-grounded snippet extraction.
    ///
    /// Nodes are deduplicated by overlapping span within a file, then
    /// capped per file, then capped globally. Each step filters the ranked
    /// sequence, so tightening a cap yields a subsequence of the looser
    /// result.
    pub async fn pack(&mut self, q: &str, opts: &PackOpts) -> anyhow::Result<SnippetPack> {
        self.check_query(q)?;
        let index = self.semantic_index();
        let seeds = index
            .search(q, opts.k)
            .await
            .context("semantic search failed")?;

        let (ranked, expanded) =
            self.expand_and_rank(&seeds, opts.hop, &opts.rels, opts.include_symbols)?;

        // Attach spans; a path escaping the repository root drops the node.
        let mut cache = FileCache::new(&self.config.repo_root);
        let mut spanned: Vec<(RankedNode, Option<(u32, u32)>)> = Vec::new();
        for rn in ranked {
            let span = match rn.node.module_path.as_deref() {
                None => None,
                Some(mp) => match cache.lines(mp) {
                    Err(escape) => {
                        warn!("dropping {}: {}", rn.node.id, escape);
                        continue;
                    }
                    Ok(lines) => compute_span(
                        rn.node.kind,
                        rn.node.lineno,
                        rn.node.end_lineno,
                        opts.context,
                        opts.max_lines,
                        lines.len() as u32,
                    ),
                },
            };
            spanned.push((rn, span));
        }

        // Deduplicate overlapping spans per file. Nodes without a usable
        // span are kept and do not participate.
        let mut kept_by_file: BTreeMap<String, Vec<(u32, u32)>> = BTreeMap::new();
        let mut deduped: Vec<(RankedNode, Option<(u32, u32)>)> = Vec::new();
        for (rn, span) in spanned {
            if let (Some(mp), Some(s)) = (rn.node.module_path.clone(), span) {
                let overlaps = kept_by_file
                    .get(&mp)
                    .map(|spans| spans.iter().any(|prev| spans_overlap(s, *prev, SPAN_GAP)))
                    .unwrap_or(false);
                if overlaps {
                    continue;
                }
                kept_by_file.entry(mp).or_default().push(s);
            }
            deduped.push((rn, span));
        }

        // Per-file cap, then the global cap.
        let mut per_file: BTreeMap<String, usize> = BTreeMap::new();
        let mut capped: Vec<(RankedNode, Option<(u32, u32)>)> = Vec::new();
        for (rn, span) in deduped {
            if let Some(mp) = rn.node.module_path.clone() {
                let count = per_file.entry(mp).or_insert(0);
                if *count >= opts.per_file_cap {
                    continue;
                }
                *count += 1;
            }
            capped.push((rn, span));
        }
        capped.truncate(opts.max_nodes);

        let mut nodes: Vec<RankedNode> = Vec::new();
        for (mut rn, span) in capped {
            if let (Some(mp), Some((start, end))) = (rn.node.module_path.clone(), span) {
                if let Ok(lines) = cache.lines(&mp) {
                    if !lines.is_empty() {
                        rn.snippet = Some(make_snippet(&mp, lines, start, end));
                    }
                }
            }
            nodes.push(rn);
        }

        let ids: BTreeSet<String> = nodes.iter().map(|n| n.node.id.clone()).collect();
        let edges = self.graph_store()?.edges_within(&ids)?;

        Ok(SnippetPack {
            query: q.to_string(),
            seeds: seeds.len(),
            expanded_nodes: expanded,
            returned_nodes: nodes.len(),
            hop: opts.hop,
            rels: rel_names(&opts.rels),
            model: self.config.model_name.clone(),
            nodes,
            edges,
        })
    }

    /// Store statistics. An unbuilt store reports zero counts.
    pub fn stats(&mut self) -> anyhow::Result<StoreStats> {
        if !self.config.db_path.exists() {
            return Ok(StoreStats {
                db_path: self.config.db_path.display().to_string(),
                ..StoreStats::default()
            });
        }
        Ok(self.graph_store()?.stats()?)
    }

    /// Fetch a single node by id. Absent ids are `Ok(None)`.
    pub fn node(&mut self, id: &str) -> anyhow::Result<Option<Node>> {
        if !self.config.db_path.exists() {
            return Ok(None);
        }
        Ok(self.graph_store()?.node(id)?)
    }

    fn check_query(&self, q: &str) -> anyhow::Result<()> {
        if q.trim().is_empty() {
            return Err(QueryError::EmptyQuery.into());
        }
        if !self.config.db_path.exists() {
            return Err(QueryError::StoreNotBuilt.into());
        }
        Ok(())
    }

    /// Expand seeds through the graph, fetch and filter nodes, and rank
    /// them deterministically. Returns the ranked nodes and the total
    /// expansion size.
    fn expand_and_rank(
        &mut self,
        seeds: &[SeedHit],
        hop: u32,
        rels: &[Rel],
        include_symbols: bool,
    ) -> anyhow::Result<(Vec<RankedNode>, usize)> {
        let seed_dist: BTreeMap<String, f32> =
            seeds.iter().map(|h| (h.id.clone(), h.distance)).collect();
        let seed_ids: BTreeSet<String> = seed_dist.keys().cloned().collect();

        let store = self.graph_store()?;
        let meta = store.expand(&seed_ids, hop, rels)?;
        let expanded = meta.len();

        let mut ranked: Vec<RankedNode> = Vec::new();
        for (id, prov) in &meta {
            let Some(node) = store.node(id)? else {
                continue; // stale seed from an old index
            };
            if !include_symbols && node.kind == NodeKind::Symbol {
                continue;
            }
            ranked.push(RankedNode {
                node,
                best_hop: prov.best_hop,
                via_seed: prov.via_seed.clone(),
                snippet: None,
            });
        }

        ranked.sort_by(|a, b| {
            let da = seed_dist
                .get(&a.via_seed)
                .copied()
                .unwrap_or(f32::INFINITY);
            let db = seed_dist
                .get(&b.via_seed)
                .copied()
                .unwrap_or(f32::INFINITY);
            a.best_hop
                .cmp(&b.best_hop)
                .then(da.total_cmp(&db))
                .then(a.node.kind.priority().cmp(&b.node.kind.priority()))
                .then(a.node.id.cmp(&b.node.id))
        });
        Ok((ranked, expanded))
    }
}

fn rel_names(rels: &[Rel]) -> Vec<String> {
    rels.iter().map(|r| r.as_str().to_string()).collect()
}
