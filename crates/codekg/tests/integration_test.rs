//! End-to-end tests for the CodeKG engine.
//!
//! Each test builds a small synthetic repository in a temp directory,
//! indexes it with the deterministic hash embedder, and exercises the
//! hybrid query and snippet-pack paths.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::{tempdir, TempDir};

use codekg::{
    CodeKG, CodeKgConfig, HashEmbedder, NodeKind, PackOpts, QueryOpts, Rel,
};

fn write_repo(dir: &Path, files: &[(&str, &str)]) {
    for (rel, src) in files {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, src).unwrap();
    }
}

fn make_kg(root: &TempDir, files: &[(&str, &str)]) -> CodeKG {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let repo = root.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    write_repo(&repo, files);
    let config = CodeKgConfig::new(&repo);
    CodeKG::with_embedder(config, Arc::new(HashEmbedder::new(256)))
}

async fn built_kg(root: &TempDir, files: &[(&str, &str)]) -> CodeKG {
    let mut kg = make_kg(root, files);
    kg.build(true).await.unwrap();
    kg
}

/// A repo with one function yields a module, the function, and one
/// CONTAINS edge.
#[tokio::test]
async fn single_function_repo() {
    let dir = tempdir().unwrap();
    let mut kg = built_kg(&dir, &[("pkg/a.py", "def foo(): pass\n")]).await;

    let stats = kg.stats().unwrap();
    assert_eq!(stats.total_nodes, 2);
    assert_eq!(stats.total_edges, 1);

    let node = kg.node("fn:pkg/a.py:foo").unwrap().unwrap();
    assert_eq!(node.kind, NodeKind::Function);

    let result = kg
        .query(
            "foo",
            &QueryOpts {
                k: 1,
                hop: 0,
                ..QueryOpts::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.returned_nodes, 1);
    assert_eq!(result.nodes[0].node.id, "fn:pkg/a.py:foo");
    assert_eq!(result.nodes[0].best_hop, 0);
}

/// A method calling a sibling method produces a CALLS edge with
/// call-site evidence.
#[tokio::test]
async fn method_calls_method() {
    let dir = tempdir().unwrap();
    let src = "class C:\n    def f(self):\n        self.g()\n\n    def g(self):\n        pass\n";
    let mut kg = built_kg(&dir, &[("pkg/b.py", src)]).await;

    let result = kg.query("f", &QueryOpts::default()).await.unwrap();
    let call = result
        .edges
        .iter()
        .find(|e| e.rel == Rel::Calls)
        .expect("CALLS edge in returned set");
    assert_eq!(call.src, "m:pkg/b.py:C.f");
    assert_eq!(call.dst, "m:pkg/b.py:C.g");
    let evidence = call.evidence.as_ref().unwrap();
    assert_eq!(evidence.lineno, Some(3));
    assert_eq!(evidence.expr.as_deref(), Some("self.g()"));
}

/// Inheritance between classes in the same module resolves to the
/// concrete class node.
#[tokio::test]
async fn inheritance_same_module() {
    let dir = tempdir().unwrap();
    let mut kg = built_kg(&dir, &[("pkg/c.py", "class A: pass\nclass B(A): pass\n")]).await;

    let result = kg.query("class B", &QueryOpts::default()).await.unwrap();
    let inherits = result
        .edges
        .iter()
        .find(|e| e.rel == Rel::Inherits)
        .expect("INHERITS edge in returned set");
    assert_eq!(inherits.src, "cls:pkg/c.py:B");
    assert_eq!(inherits.dst, "cls:pkg/c.py:A");
    assert_eq!(
        inherits.evidence.as_ref().unwrap().expr.as_deref(),
        Some("A")
    );
}

/// Importing an external module produces an IMPORTS edge to a symbol.
#[tokio::test]
async fn import_external_symbol() {
    let dir = tempdir().unwrap();
    let mut kg = built_kg(&dir, &[("pkg/d.py", "import os\n")]).await;

    let result = kg
        .query(
            "module d",
            &QueryOpts {
                include_symbols: true,
                ..QueryOpts::default()
            },
        )
        .await
        .unwrap();
    assert!(result
        .edges
        .iter()
        .any(|e| e.rel == Rel::Imports && e.src == "mod:pkg/d.py" && e.dst == "sym:os"));
}

const DB_PY: &str = "class DatabaseManager:\n    \"\"\"Coordinates engine sessions.\"\"\"\n\n    def connect(self):\n        \"\"\"Open the database connection.\"\"\"\n        return True\n";
const USE_PY: &str = "from pkg.db import DatabaseManager\n\n\ndef main():\n    DatabaseManager().connect()\n";

/// Hybrid retrieval: semantic seeds, hop expansion across files, and
/// snippets bracketing the definitions.
#[tokio::test]
async fn hybrid_pack_with_expansion() {
    let dir = tempdir().unwrap();
    let mut kg = built_kg(&dir, &[("pkg/db.py", DB_PY), ("pkg/use.py", USE_PY)]).await;

    let pack = kg
        .pack(
            "database connection",
            &PackOpts {
                k: 4,
                hop: 1,
                ..PackOpts::default()
            },
        )
        .await
        .unwrap();

    let connect_pos = pack
        .nodes
        .iter()
        .position(|n| n.node.id == "m:pkg/db.py:DatabaseManager.connect")
        .expect("connect method returned");
    let main_pos = pack
        .nodes
        .iter()
        .position(|n| n.node.id == "fn:pkg/use.py:main")
        .expect("main returned");

    assert!(pack.nodes[connect_pos].best_hop <= 1);
    assert!(pack.nodes[main_pos].best_hop <= 2);
    // connect ranks ahead of main (smaller distance or hop)
    assert!(connect_pos < main_pos);

    // Snippets bracket the respective `def` lines with context.
    let connect_snippet = pack.nodes[connect_pos].snippet.as_ref().unwrap();
    assert!(connect_snippet.start <= 4 && connect_snippet.end >= 6);
    assert!(connect_snippet.text.contains("def connect"));
    let main_snippet = pack.nodes[main_pos].snippet.as_ref().unwrap();
    assert!(main_snippet.start <= 4 && main_snippet.end >= 5);
    assert!(main_snippet.text.contains("def main"));
}

/// Two builds of the same repo are indistinguishable through every
/// read API.
#[tokio::test]
async fn rebuild_determinism() {
    let files = [("pkg/db.py", DB_PY), ("pkg/use.py", USE_PY)];

    let dir1 = tempdir().unwrap();
    let dir2 = tempdir().unwrap();
    let mut kg1 = built_kg(&dir1, &files).await;
    let mut kg2 = built_kg(&dir2, &files).await;

    let s1 = kg1.stats().unwrap();
    let s2 = kg2.stats().unwrap();
    assert_eq!(s1.total_nodes, s2.total_nodes);
    assert_eq!(s1.node_counts, s2.node_counts);
    assert_eq!(s1.edge_counts, s2.edge_counts);

    let opts = QueryOpts::default();
    let j1 = kg1.query("database", &opts).await.unwrap().to_json().unwrap();
    let j2 = kg2.query("database", &opts).await.unwrap().to_json().unwrap();
    assert_eq!(j1, j2);
}

/// Repeated identical queries against an unchanged store are byte-identical.
#[tokio::test]
async fn query_is_deterministic() {
    let dir = tempdir().unwrap();
    let mut kg = built_kg(&dir, &[("pkg/db.py", DB_PY), ("pkg/use.py", USE_PY)]).await;

    let opts = QueryOpts::default();
    let a = kg.query("database connection", &opts).await.unwrap();
    let b = kg.query("database connection", &opts).await.unwrap();
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
}

/// Build idempotence: building twice with wipe produces identical stats.
#[tokio::test]
async fn build_twice_is_idempotent() {
    let dir = tempdir().unwrap();
    let mut kg = make_kg(&dir, &[("pkg/db.py", DB_PY), ("pkg/use.py", USE_PY)]);
    let first = kg.build(true).await.unwrap();
    let second = kg.build(true).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn empty_repository() {
    let dir = tempdir().unwrap();
    let mut kg = built_kg(&dir, &[]).await;

    let stats = kg.stats().unwrap();
    assert_eq!(stats.total_nodes, 0);
    assert_eq!(stats.total_edges, 0);

    let result = kg.query("anything", &QueryOpts::default()).await.unwrap();
    assert_eq!(result.seeds, 0);
    assert_eq!(result.returned_nodes, 0);
    assert!(result.nodes.is_empty());
    assert!(result.edges.is_empty());
}

#[tokio::test]
async fn hop_zero_returns_only_seeds() {
    let dir = tempdir().unwrap();
    let mut kg = built_kg(&dir, &[("pkg/db.py", DB_PY), ("pkg/use.py", USE_PY)]).await;

    let result = kg
        .query(
            "database",
            &QueryOpts {
                k: 2,
                hop: 0,
                ..QueryOpts::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.expanded_nodes, 2);
    assert!(result.nodes.iter().all(|n| n.best_hop == 0));
}

#[tokio::test]
async fn k_zero_returns_nothing() {
    let dir = tempdir().unwrap();
    let mut kg = built_kg(&dir, &[("pkg/db.py", DB_PY)]).await;

    let result = kg
        .query(
            "database",
            &QueryOpts {
                k: 0,
                ..QueryOpts::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.seeds, 0);
    assert_eq!(result.returned_nodes, 0);
}

/// include_symbols toggles only the presence of symbol-kind nodes.
#[tokio::test]
async fn include_symbols_only_adds_symbols() {
    let dir = tempdir().unwrap();
    let src = "import os\n\ndef main():\n    os.getcwd()\n";
    let mut kg = built_kg(&dir, &[("pkg/e.py", src)]).await;

    let without = kg.query("main", &QueryOpts::default()).await.unwrap();
    let with = kg
        .query(
            "main",
            &QueryOpts {
                include_symbols: true,
                ..QueryOpts::default()
            },
        )
        .await
        .unwrap();

    let ids = |r: &codekg::QueryResult| -> Vec<String> {
        r.nodes.iter().map(|n| n.node.id.clone()).collect()
    };
    assert!(without
        .nodes
        .iter()
        .all(|n| n.node.kind != NodeKind::Symbol));
    let with_minus_symbols: Vec<String> = with
        .nodes
        .iter()
        .filter(|n| n.node.kind != NodeKind::Symbol)
        .map(|n| n.node.id.clone())
        .collect();
    assert_eq!(ids(&without), with_minus_symbols);
    assert!(with.nodes.iter().any(|n| n.node.kind == NodeKind::Symbol));
}

/// A populated store with an empty index yields empty, well-formed results.
#[tokio::test]
async fn graph_without_index_queries_empty() {
    let dir = tempdir().unwrap();
    let mut kg = make_kg(&dir, &[("pkg/a.py", "def foo(): pass\n")]);
    kg.build_graph(true).unwrap();

    let result = kg.query("foo", &QueryOpts::default()).await.unwrap();
    assert_eq!(result.seeds, 0);
    assert_eq!(result.returned_nodes, 0);
}

/// Module nodes snippet from a top-of-file window.
#[tokio::test]
async fn module_snippet_is_top_window() {
    let dir = tempdir().unwrap();
    let src = "\"\"\"Utility helpers.\"\"\"\n\nVALUE = 1\n";
    let mut kg = built_kg(&dir, &[("pkg/util.py", src)]).await;

    let pack = kg
        .pack("utility helpers", &PackOpts::default())
        .await
        .unwrap();
    let module = pack
        .nodes
        .iter()
        .find(|n| n.node.id == "mod:pkg/util.py")
        .expect("module returned");
    let snippet = module.snippet.as_ref().unwrap();
    assert_eq!(snippet.start, 1);
    assert!(snippet.end <= 60);
}

/// A node whose source resolves outside the repository root is dropped
/// from the pack without failing it.
#[cfg(unix)]
#[tokio::test]
async fn symlink_escape_drops_node() {
    let dir = tempdir().unwrap();
    let outside = tempdir().unwrap();
    fs::write(
        outside.path().join("secret.py"),
        "def hidden():\n    pass\n",
    )
    .unwrap();

    let repo = dir.path().join("repo");
    write_repo(&repo, &[("real.py", "def visible():\n    pass\n")]);
    std::os::unix::fs::symlink(
        outside.path().join("secret.py"),
        repo.join("leak.py"),
    )
    .unwrap();

    let config = CodeKgConfig::new(&repo);
    let mut kg = CodeKG::with_embedder(config, Arc::new(HashEmbedder::new(256)));
    kg.build(true).await.unwrap();

    // Plant a node whose module_path traverses the symlink.
    {
        use codekg::{Edge, GraphStore, Node};
        let mut store = GraphStore::open(kg.config().db_path.clone()).unwrap();
        let planted = Node {
            id: "fn:leak.py:hidden".to_string(),
            kind: NodeKind::Function,
            name: "hidden".to_string(),
            qualname: Some("hidden".to_string()),
            module_path: Some("leak.py".to_string()),
            lineno: Some(1),
            end_lineno: Some(2),
            docstring: Some("visible function twin".to_string()),
        };
        let edges: Vec<Edge> = Vec::new();
        store.write(&[planted], &edges, false).unwrap();
    }
    kg.build_index(true).await.unwrap();

    let pack = kg
        .pack("visible function", &PackOpts::default())
        .await
        .unwrap();
    assert!(pack
        .nodes
        .iter()
        .all(|n| n.node.id != "fn:leak.py:hidden"));
    assert!(pack
        .nodes
        .iter()
        .any(|n| n.node.id == "fn:real.py:visible"));
}

fn spaced_functions(count: usize) -> String {
    let mut out = String::new();
    for i in 0..count {
        out.push_str(&format!("def handler_{i}():\n    return {i}\n"));
        out.push_str(&"\n".repeat(5));
    }
    out
}

/// Tightening per-file or global caps yields a subsequence of the looser
/// result.
#[tokio::test]
async fn cap_reduction_is_monotonic() {
    let dir = tempdir().unwrap();
    let mut kg = built_kg(&dir, &[("pkg/handlers.py", &spaced_functions(6))]).await;

    let base = PackOpts {
        k: 8,
        context: 1,
        max_nodes: 15,
        per_file_cap: 5,
        ..PackOpts::default()
    };
    let loose = kg.pack("handler", &base).await.unwrap();
    assert!(loose.returned_nodes >= 3);

    for tighter in [
        PackOpts {
            per_file_cap: 2,
            ..base.clone()
        },
        PackOpts {
            max_nodes: 2,
            ..base.clone()
        },
    ] {
        let tight = kg.pack("handler", &tighter).await.unwrap();
        let loose_ids: Vec<&str> = loose.nodes.iter().map(|n| n.node.id.as_str()).collect();
        let tight_ids: Vec<&str> = tight.nodes.iter().map(|n| n.node.id.as_str()).collect();
        // tight_ids must appear in loose_ids in the same order
        let mut cursor = 0usize;
        for id in &tight_ids {
            let found = loose_ids[cursor..].iter().position(|l| l == id);
            assert!(found.is_some(), "{id} missing or out of order");
            cursor += found.unwrap() + 1;
        }
        assert!(tight_ids.len() <= loose_ids.len());
    }
}

/// Snippet spans never exceed the configured window, and files resolve
/// under the repository root.
#[tokio::test]
async fn snippet_spans_are_bounded() {
    let dir = tempdir().unwrap();
    let big: String = (0..100)
        .map(|i| format!("LINE_{i} = {i}\n"))
        .collect::<String>()
        + "def tail():\n    pass\n";
    let mut kg = built_kg(&dir, &[("pkg/big.py", &big)]).await;

    let opts = PackOpts {
        max_lines: 20,
        ..PackOpts::default()
    };
    let pack = kg.pack("tail", &opts).await.unwrap();
    for node in &pack.nodes {
        if let Some(snippet) = &node.snippet {
            assert!(snippet.start <= snippet.end);
            assert!(snippet.end - snippet.start + 1 <= 20);
        }
    }
}

/// Query results round-trip through JSON.
#[tokio::test]
async fn json_roundtrips() {
    let dir = tempdir().unwrap();
    let mut kg = built_kg(&dir, &[("pkg/db.py", DB_PY), ("pkg/use.py", USE_PY)]).await;

    let result = kg.query("database", &QueryOpts::default()).await.unwrap();
    let back: codekg::QueryResult =
        serde_json::from_str(&result.to_json().unwrap()).unwrap();
    assert_eq!(back, result);

    let pack = kg.pack("database", &PackOpts::default()).await.unwrap();
    let back: codekg::SnippetPack = serde_json::from_str(&pack.to_json().unwrap()).unwrap();
    assert_eq!(back, pack);
}

/// The markdown rendering carries the node headers and numbered snippets.
#[tokio::test]
async fn markdown_output() {
    let dir = tempdir().unwrap();
    let mut kg = built_kg(&dir, &[("pkg/db.py", DB_PY)]).await;

    let pack = kg
        .pack("database connection", &PackOpts::default())
        .await
        .unwrap();
    let md = pack.to_markdown();
    assert!(md.contains("# CodeKG Snippet Pack"));
    assert!(md.contains("database connection"));
    assert!(md.contains("```python"));
    assert!(md.contains("pkg/db.py"));
}
