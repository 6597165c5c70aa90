//! Two-pass extraction of nodes and edges from a Python repository.
//!
//! Pass 1 walks each file's definitions (modules, classes, functions,
//! methods) and records imports and base classes. After all files are seen,
//! import bindings are resolved against the repository, so that imports and
//! inheritance can point at in-repo definitions instead of opaque symbols.
//! Pass 2 re-walks each file to build the call graph.
//!
//! The resolver is conservative: anything it cannot tie to a definition in
//! the repository becomes an edge to a `sym:` node. It never invents a
//! concrete target.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use tree_sitter::{Node as TsNode, Parser};

use codekg_core::{module_qualname, node_id, symbol_id, to_repo_relative};
use codekg_core::{Edge, Evidence, Node, NodeKind, Rel};

use crate::python::{docstring, dotted_name, end_line, node_text, start_line};
use crate::walk::collect_python_files;
use crate::ExtractError;

/// Summary of one extraction run.
#[derive(Debug, Default, Clone)]
pub struct ExtractStats {
    pub files_seen: usize,
    pub files_parsed: usize,
    pub files_skipped: usize,
    pub nodes: usize,
    pub edges: usize,
}

/// Extract a code knowledge graph from a repository.
///
/// Pure with respect to the filesystem contents: the same tree yields the
/// same `(nodes, edges)` in the same order.
pub fn extract_repo(repo_root: &Path) -> Result<(Vec<Node>, Vec<Edge>), ExtractError> {
    let mut extractor = Extractor::new(repo_root)?;
    let (nodes, edges, _) = extractor.extract()?;
    Ok((nodes, edges))
}

/// A reference to a definition registered during pass 1.
#[derive(Debug, Clone)]
struct DefRef {
    id: String,
    kind: NodeKind,
    module_path: String,
    qualname: String,
}

#[derive(Debug, Clone, Default)]
struct ClassInfo {
    id: String,
    /// Method name → node id.
    methods: BTreeMap<String, String>,
}

/// What a name imported into a module resolves to.
#[derive(Debug, Clone)]
enum Binding {
    /// An in-repo module, by module path.
    Module(String),
    /// An in-repo definition.
    Def(DefRef),
    /// An external dotted name.
    External(String),
}

#[derive(Debug, Clone)]
enum RawImport {
    Plain {
        dotted: String,
        alias: Option<String>,
        lineno: u32,
    },
    From {
        module: String,
        name: String,
        alias: Option<String>,
        lineno: u32,
    },
}

#[derive(Debug, Clone)]
struct RawInherit {
    class_id: String,
    expr: String,
    dotted: Option<String>,
    lineno: u32,
}

/// Everything pass 1 learned about a single file.
#[derive(Debug, Default)]
struct FileAnalysis {
    module_path: String,
    mod_id: String,
    source: String,
    /// Module node first, then definitions in tree-traversal order.
    nodes: Vec<Node>,
    def_ids: BTreeSet<String>,
    /// Bare names and dotted qualnames → definitions in this module.
    locals: BTreeMap<String, DefRef>,
    /// Class qualname → class info.
    classes: BTreeMap<String, ClassInfo>,
    contains: Vec<Edge>,
    raw_inherits: Vec<RawInherit>,
    raw_imports: Vec<RawImport>,
    bindings: BTreeMap<String, Binding>,
    /// Symbol nodes first referenced by this file.
    symbols: Vec<Node>,
    inherit_edges: Vec<Edge>,
    import_edges: Vec<Edge>,
    call_edges: Vec<Edge>,
}

/// Repository extractor. Holds the parser and the repo root.
pub struct Extractor {
    repo_root: PathBuf,
    parser: Parser,
}

impl Extractor {
    pub fn new(repo_root: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_python::LANGUAGE.into())?;
        Ok(Self {
            repo_root: repo_root.as_ref().to_path_buf(),
            parser,
        })
    }

    /// Run both passes over the repository.
    pub fn extract(&mut self) -> Result<(Vec<Node>, Vec<Edge>, ExtractStats), ExtractError> {
        let files = collect_python_files(&self.repo_root)?;
        let mut stats = ExtractStats {
            files_seen: files.len(),
            ..Default::default()
        };

        // Dotted module name → module path, for import resolution. On a
        // collision (pkg.py vs pkg/__init__.py) the first file in sorted
        // order wins.
        let mut module_map: BTreeMap<String, String> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        for path in &files {
            let mp = to_repo_relative(path, &self.repo_root);
            module_map
                .entry(module_qualname(&mp))
                .or_insert_with(|| mp.clone());
            order.push(mp);
        }

        // Pass 1: definitions, per file.
        let mut analyses: Vec<FileAnalysis> = Vec::new();
        let mut kept_order: Vec<String> = Vec::new();
        for (path, mp) in files.iter().zip(order.iter()) {
            match self.pass1(path, mp) {
                Some(fa) => {
                    stats.files_parsed += 1;
                    kept_order.push(mp.clone());
                    analyses.push(fa);
                }
                None => stats.files_skipped += 1,
            }
        }
        let index: BTreeMap<String, usize> = kept_order
            .iter()
            .enumerate()
            .map(|(i, mp)| (mp.clone(), i))
            .collect();

        let mut symbol_seen: BTreeSet<String> = BTreeSet::new();

        // Resolve import bindings (may point across files).
        for i in 0..analyses.len() {
            let bindings = compute_bindings(&analyses[i], &analyses, &index, &module_map);
            analyses[i].bindings = bindings;
        }

        // Materialise IMPORTS and INHERITS edges.
        for i in 0..analyses.len() {
            let (edges, syms) =
                resolve_imports(&analyses[i], &module_map, &mut symbol_seen);
            analyses[i].import_edges = edges;
            analyses[i].symbols.extend(syms);
        }
        for i in 0..analyses.len() {
            let (edges, syms) =
                resolve_inherits(&analyses[i], &analyses, &index, &mut symbol_seen);
            analyses[i].inherit_edges = edges;
            analyses[i].symbols.extend(syms);
        }

        // Pass 2: call graph, per file.
        for i in 0..analyses.len() {
            let (edges, syms) = self.pass2(&analyses, &index, i, &mut symbol_seen);
            analyses[i].call_edges = edges;
            analyses[i].symbols.extend(syms);
        }

        // Emission, per file in sorted order: module node, definitions,
        // symbols first referenced here, then pass-1 edges, then calls.
        let mut nodes: Vec<Node> = Vec::new();
        let mut node_ids: BTreeSet<String> = BTreeSet::new();
        let mut edges: Vec<Edge> = Vec::new();
        let mut edge_keys: BTreeSet<(String, Rel, String)> = BTreeSet::new();
        for fa in &analyses {
            for n in fa.nodes.iter().chain(fa.symbols.iter()) {
                if node_ids.insert(n.id.clone()) {
                    nodes.push(n.clone());
                }
            }
            for e in fa
                .contains
                .iter()
                .chain(fa.inherit_edges.iter())
                .chain(fa.import_edges.iter())
                .chain(fa.call_edges.iter())
            {
                if edge_keys.insert(e.key()) {
                    edges.push(e.clone());
                }
            }
        }

        stats.nodes = nodes.len();
        stats.edges = edges.len();
        info!(
            "extracted {} nodes, {} edges from {} files ({} skipped)",
            stats.nodes, stats.edges, stats.files_parsed, stats.files_skipped
        );
        Ok((nodes, edges, stats))
    }

    /// Pass 1 over one file. Returns `None` when the file cannot be decoded
    /// or parsed; extraction continues without it.
    fn pass1(&mut self, path: &Path, module_path: &str) -> Option<FileAnalysis> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(err) => {
                warn!("skipping {module_path}: {err}");
                return None;
            }
        };
        let source = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(_) => {
                warn!("skipping {module_path}: not valid UTF-8");
                return None;
            }
        };
        let tree = match self.parser.parse(&source, None) {
            Some(t) => t,
            None => {
                warn!("skipping {module_path}: parser returned no tree");
                return None;
            }
        };
        let root = tree.root_node();
        if root.has_error() {
            warn!("skipping {module_path}: syntax errors");
            return None;
        }
        debug!("pass 1: {module_path}");

        let mod_id = node_id(NodeKind::Module, module_path, None);
        let stem = module_path
            .rsplit('/')
            .next()
            .unwrap_or(module_path)
            .trim_end_matches(".py");
        let mut fa = FileAnalysis {
            module_path: module_path.to_string(),
            mod_id: mod_id.clone(),
            nodes: vec![Node {
                id: mod_id.clone(),
                kind: NodeKind::Module,
                name: stem.to_string(),
                qualname: Some(module_qualname(module_path)),
                module_path: Some(module_path.to_string()),
                lineno: Some(1),
                end_lineno: Some(source.matches('\n').count() as u32 + 1),
                docstring: docstring(root, &source),
            }],
            ..Default::default()
        };

        self.walk_module(root, &source, &mut fa);
        fa.source = source;
        Some(fa)
    }

    fn walk_module(&self, root: TsNode<'_>, source: &str, fa: &mut FileAnalysis) {
        let mod_id = fa.mod_id.clone();
        let mut cursor = root.walk();
        let children: Vec<TsNode<'_>> = root.named_children(&mut cursor).collect();
        for stmt in children {
            let stmt = unwrap_decorated(stmt);
            match stmt.kind() {
                "class_definition" => self.collect_class(stmt, source, &mod_id, None, fa),
                "function_definition" => self.collect_function(stmt, source, fa),
                "import_statement" => collect_plain_imports(stmt, source, fa),
                "import_from_statement" => collect_from_imports(stmt, source, fa),
                _ => {}
            }
        }
    }

    fn collect_function(&self, stmt: TsNode<'_>, source: &str, fa: &mut FileAnalysis) {
        let Some(name_node) = stmt.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source).to_string();
        let id = node_id(NodeKind::Function, &fa.module_path, Some(&name));
        let body = stmt.child_by_field_name("body");

        fa.nodes.push(Node {
            id: id.clone(),
            kind: NodeKind::Function,
            name: name.clone(),
            qualname: Some(name.clone()),
            module_path: Some(fa.module_path.clone()),
            lineno: Some(start_line(stmt)),
            end_lineno: Some(end_line(stmt)),
            docstring: body.and_then(|b| docstring(b, source)),
        });
        fa.contains
            .push(Edge::new(fa.mod_id.clone(), Rel::Contains, id.clone()));
        fa.def_ids.insert(id.clone());
        fa.locals.insert(
            name.clone(),
            DefRef {
                id,
                kind: NodeKind::Function,
                module_path: fa.module_path.clone(),
                qualname: name,
            },
        );
    }

    fn collect_class(
        &self,
        stmt: TsNode<'_>,
        source: &str,
        parent_id: &str,
        enclosing: Option<&str>,
        fa: &mut FileAnalysis,
    ) {
        let Some(name_node) = stmt.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source).to_string();
        let qualname = match enclosing {
            Some(outer) => format!("{outer}.{name}"),
            None => name.clone(),
        };
        let id = node_id(NodeKind::Class, &fa.module_path, Some(&qualname));
        let body = stmt.child_by_field_name("body");

        fa.nodes.push(Node {
            id: id.clone(),
            kind: NodeKind::Class,
            name: name.clone(),
            qualname: Some(qualname.clone()),
            module_path: Some(fa.module_path.clone()),
            lineno: Some(start_line(stmt)),
            end_lineno: Some(end_line(stmt)),
            docstring: body.and_then(|b| docstring(b, source)),
        });
        fa.contains
            .push(Edge::new(parent_id.to_string(), Rel::Contains, id.clone()));
        fa.def_ids.insert(id.clone());

        let def = DefRef {
            id: id.clone(),
            kind: NodeKind::Class,
            module_path: fa.module_path.clone(),
            qualname: qualname.clone(),
        };
        if enclosing.is_none() {
            fa.locals.insert(name.clone(), def.clone());
        }
        fa.locals.insert(qualname.clone(), def);
        fa.classes.insert(
            qualname.clone(),
            ClassInfo {
                id: id.clone(),
                methods: BTreeMap::new(),
            },
        );

        // Base classes; resolution happens after all files are known.
        if let Some(bases) = stmt.child_by_field_name("superclasses") {
            let mut cursor = bases.walk();
            for base in bases.named_children(&mut cursor) {
                if matches!(base.kind(), "keyword_argument" | "comment") {
                    continue;
                }
                fa.raw_inherits.push(RawInherit {
                    class_id: id.clone(),
                    expr: node_text(base, source).to_string(),
                    dotted: dotted_name(base, source),
                    lineno: start_line(base),
                });
            }
        }

        // Methods and nested classes.
        if let Some(body) = body {
            let mut cursor = body.walk();
            let children: Vec<TsNode<'_>> = body.named_children(&mut cursor).collect();
            for cstmt in children {
                let cstmt = unwrap_decorated(cstmt);
                match cstmt.kind() {
                    "function_definition" => {
                        self.collect_method(cstmt, source, &id, &qualname, fa)
                    }
                    "class_definition" => {
                        self.collect_class(cstmt, source, &id, Some(&qualname), fa)
                    }
                    _ => {}
                }
            }
        }
    }

    fn collect_method(
        &self,
        stmt: TsNode<'_>,
        source: &str,
        class_id: &str,
        class_qualname: &str,
        fa: &mut FileAnalysis,
    ) {
        let Some(name_node) = stmt.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source).to_string();
        let qualname = format!("{class_qualname}.{name}");
        let id = node_id(NodeKind::Method, &fa.module_path, Some(&qualname));
        let body = stmt.child_by_field_name("body");

        fa.nodes.push(Node {
            id: id.clone(),
            kind: NodeKind::Method,
            name: name.clone(),
            qualname: Some(qualname.clone()),
            module_path: Some(fa.module_path.clone()),
            lineno: Some(start_line(stmt)),
            end_lineno: Some(end_line(stmt)),
            docstring: body.and_then(|b| docstring(b, source)),
        });
        fa.contains
            .push(Edge::new(class_id.to_string(), Rel::Contains, id.clone()));
        fa.def_ids.insert(id.clone());
        if let Some(info) = fa.classes.get_mut(class_qualname) {
            info.methods.insert(name, id.clone());
        }
        fa.locals.insert(
            qualname.clone(),
            DefRef {
                id,
                kind: NodeKind::Method,
                module_path: fa.module_path.clone(),
                qualname,
            },
        );
    }

    /// Pass 2 over one file: best-effort call graph.
    fn pass2(
        &mut self,
        analyses: &[FileAnalysis],
        index: &BTreeMap<String, usize>,
        i: usize,
        symbol_seen: &mut BTreeSet<String>,
    ) -> (Vec<Edge>, Vec<Node>) {
        let fa = &analyses[i];
        let Some(tree) = self.parser.parse(&fa.source, None) else {
            return (Vec::new(), Vec::new());
        };
        debug!("pass 2: {}", fa.module_path);

        let mut walker = CallWalker {
            fa,
            analyses,
            index,
            source: &fa.source,
            class_stack: Vec::new(),
            def_stack: Vec::new(),
            edges: Vec::new(),
            symbols: Vec::new(),
            symbol_seen,
        };
        walker.visit(tree.root_node());
        (walker.edges, walker.symbols)
    }
}

fn unwrap_decorated(stmt: TsNode<'_>) -> TsNode<'_> {
    if stmt.kind() == "decorated_definition" {
        stmt.child_by_field_name("definition").unwrap_or(stmt)
    } else {
        stmt
    }
}

fn collect_plain_imports(stmt: TsNode<'_>, source: &str, fa: &mut FileAnalysis) {
    let lineno = start_line(stmt);
    let mut cursor = stmt.walk();
    for child in stmt.named_children(&mut cursor) {
        match child.kind() {
            "dotted_name" => fa.raw_imports.push(RawImport::Plain {
                dotted: node_text(child, source).to_string(),
                alias: None,
                lineno,
            }),
            "aliased_import" => {
                let Some(name) = child.child_by_field_name("name") else {
                    continue;
                };
                let alias = child
                    .child_by_field_name("alias")
                    .map(|a| node_text(a, source).to_string());
                fa.raw_imports.push(RawImport::Plain {
                    dotted: node_text(name, source).to_string(),
                    alias,
                    lineno,
                });
            }
            _ => {}
        }
    }
}

fn collect_from_imports(stmt: TsNode<'_>, source: &str, fa: &mut FileAnalysis) {
    let lineno = start_line(stmt);
    let Some(module_node) = stmt.child_by_field_name("module_name") else {
        return;
    };
    let module = match module_node.kind() {
        "relative_import" => resolve_relative_module(module_node, source, &fa.module_path)
            .unwrap_or_else(|| node_text(module_node, source).to_string()),
        _ => node_text(module_node, source).to_string(),
    };

    let mut cursor = stmt.walk();
    let mut names: Vec<(String, Option<String>)> = Vec::new();
    for child in stmt.children_by_field_name("name", &mut cursor) {
        match child.kind() {
            "dotted_name" => names.push((node_text(child, source).to_string(), None)),
            "aliased_import" => {
                if let Some(name) = child.child_by_field_name("name") {
                    let alias = child
                        .child_by_field_name("alias")
                        .map(|a| node_text(a, source).to_string());
                    names.push((node_text(name, source).to_string(), alias));
                }
            }
            _ => {}
        }
    }
    drop(cursor);
    if names.is_empty() {
        // `from x import *`
        let mut cursor = stmt.walk();
        if stmt
            .named_children(&mut cursor)
            .any(|c| c.kind() == "wildcard_import")
        {
            names.push(("*".to_string(), None));
        }
    }

    for (name, alias) in names {
        fa.raw_imports.push(RawImport::From {
            module: module.clone(),
            name,
            alias,
            lineno,
        });
    }
}

/// Resolve a `from .x import y` module reference against the importing
/// module's package. Returns `None` when the dots climb above the repo root.
fn resolve_relative_module(
    node: TsNode<'_>,
    source: &str,
    module_path: &str,
) -> Option<String> {
    let text = node_text(node, source);
    let dots = text.chars().take_while(|c| *c == '.').count();
    let rest = text.trim_start_matches('.');

    let dotted = module_qualname(module_path);
    let mut parts: Vec<&str> = dotted.split('.').filter(|s| !s.is_empty()).collect();
    // The package of a plain module is its parent; __init__.py already
    // names the package itself.
    if !module_path.ends_with("__init__.py") {
        parts.pop();
    }
    for _ in 1..dots {
        parts.pop()?;
    }
    let base = parts.join(".");
    let full = match (base.is_empty(), rest.is_empty()) {
        (true, true) => return None,
        (true, false) => rest.to_string(),
        (false, true) => base,
        (false, false) => format!("{base}.{rest}"),
    };
    Some(full)
}

/// Compute the name → target bindings a file's imports establish.
fn compute_bindings(
    fa: &FileAnalysis,
    analyses: &[FileAnalysis],
    index: &BTreeMap<String, usize>,
    module_map: &BTreeMap<String, String>,
) -> BTreeMap<String, Binding> {
    let mut bindings = BTreeMap::new();
    for raw in &fa.raw_imports {
        match raw {
            RawImport::Plain { dotted, alias, .. } => {
                let bound = alias.clone().unwrap_or_else(|| dotted.clone());
                let target = match module_map.get(dotted) {
                    Some(mp) => Binding::Module(mp.clone()),
                    None => Binding::External(dotted.clone()),
                };
                bindings.insert(bound, target);
            }
            RawImport::From {
                module,
                name,
                alias,
                ..
            } => {
                if name == "*" {
                    continue;
                }
                let full = join_dotted(module, name);
                let bound = alias.clone().unwrap_or_else(|| name.clone());
                let target = if let Some(mp) = module_map.get(&full) {
                    Binding::Module(mp.clone())
                } else if let Some(mp) = module_map.get(module) {
                    match index
                        .get(mp)
                        .and_then(|&j| analyses[j].locals.get(name))
                    {
                        Some(def) => Binding::Def(def.clone()),
                        None => Binding::External(full),
                    }
                } else {
                    Binding::External(full)
                };
                bindings.insert(bound, target);
            }
        }
    }
    bindings
}

fn join_dotted(module: &str, name: &str) -> String {
    if module.is_empty() {
        name.to_string()
    } else {
        format!("{module}.{name}")
    }
}

/// Materialise IMPORTS edges. Destinations are in-repo module nodes when the
/// imported name (or the module it is imported from) lives in the
/// repository, symbol nodes otherwise.
fn resolve_imports(
    fa: &FileAnalysis,
    module_map: &BTreeMap<String, String>,
    symbol_seen: &mut BTreeSet<String>,
) -> (Vec<Edge>, Vec<Node>) {
    let mut edges = Vec::new();
    let mut symbols = Vec::new();
    let mut push = |dst: String, expr: String, lineno: u32| {
        edges.push(
            Edge::new(fa.mod_id.clone(), Rel::Imports, dst)
                .with_evidence(Evidence::new(lineno, expr)),
        );
    };

    for raw in &fa.raw_imports {
        match raw {
            RawImport::Plain { dotted, lineno, .. } => {
                let dst = match module_map.get(dotted) {
                    Some(mp) => node_id(NodeKind::Module, mp, None),
                    None => intern_symbol(dotted, symbol_seen, &mut symbols),
                };
                push(dst, dotted.clone(), *lineno);
            }
            RawImport::From {
                module,
                name,
                lineno,
                ..
            } => {
                let full = join_dotted(module, name);
                let dst = if let Some(mp) = module_map.get(&full) {
                    node_id(NodeKind::Module, mp, None)
                } else if let Some(mp) = module_map.get(module) {
                    node_id(NodeKind::Module, mp, None)
                } else {
                    intern_symbol(&full, symbol_seen, &mut symbols)
                };
                push(dst, full, *lineno);
            }
        }
    }
    (edges, symbols)
}

/// Materialise INHERITS edges, resolving base names against same-module
/// classes first, then import bindings.
fn resolve_inherits(
    fa: &FileAnalysis,
    analyses: &[FileAnalysis],
    index: &BTreeMap<String, usize>,
    symbol_seen: &mut BTreeSet<String>,
) -> (Vec<Edge>, Vec<Node>) {
    let mut edges = Vec::new();
    let mut symbols = Vec::new();

    for raw in &fa.raw_inherits {
        let resolved = raw
            .dotted
            .as_deref()
            .and_then(|dotted| resolve_class_name(dotted, fa, analyses, index));
        let dst = match resolved {
            Some(id) => id,
            None => match raw.dotted.as_deref() {
                Some(dotted) => intern_symbol(dotted, symbol_seen, &mut symbols),
                None => continue,
            },
        };
        edges.push(
            Edge::new(raw.class_id.clone(), Rel::Inherits, dst)
                .with_evidence(Evidence::new(raw.lineno, raw.expr.clone())),
        );
    }
    (edges, symbols)
}

/// Resolve a dotted name to an in-repo class id, if the syntax ties it to
/// one: a class in this module, an imported class, or `module.Class`
/// through an imported in-repo module.
fn resolve_class_name(
    dotted: &str,
    fa: &FileAnalysis,
    analyses: &[FileAnalysis],
    index: &BTreeMap<String, usize>,
) -> Option<String> {
    if let Some(info) = fa.classes.get(dotted) {
        return Some(info.id.clone());
    }

    let segments: Vec<&str> = dotted.split('.').collect();
    for cut in (1..=segments.len()).rev() {
        let prefix = segments[..cut].join(".");
        let rest = segments[cut..].join(".");
        let Some(binding) = fa.bindings.get(&prefix) else {
            continue;
        };
        return match binding {
            Binding::Def(def) if def.kind == NodeKind::Class => {
                let target = index.map_file(analyses, &def.module_path)?;
                let qualname = if rest.is_empty() {
                    def.qualname.clone()
                } else {
                    format!("{}.{rest}", def.qualname)
                };
                target.classes.get(&qualname).map(|c| c.id.clone())
            }
            Binding::Module(mp) if !rest.is_empty() => {
                let target = index.map_file(analyses, mp)?;
                target.classes.get(&rest).map(|c| c.id.clone())
            }
            _ => None,
        };
    }
    None
}

fn intern_symbol(
    dotted: &str,
    symbol_seen: &mut BTreeSet<String>,
    symbols: &mut Vec<Node>,
) -> String {
    let id = symbol_id(dotted);
    if symbol_seen.insert(id.clone()) {
        symbols.push(Node::symbol(dotted));
    }
    id
}

trait FileLookup {
    fn map_file<'a>(&self, analyses: &'a [FileAnalysis], mp: &str) -> Option<&'a FileAnalysis>;
}

impl FileLookup for BTreeMap<String, usize> {
    fn map_file<'a>(&self, analyses: &'a [FileAnalysis], mp: &str) -> Option<&'a FileAnalysis> {
        self.get(mp).map(|&i| &analyses[i])
    }
}

/// Enclosing definition while walking for calls.
struct DefEntry {
    id: Option<String>,
    /// Qualname of the class owning this method, if it is one.
    owner_class: Option<String>,
}

struct CallWalker<'a> {
    fa: &'a FileAnalysis,
    analyses: &'a [FileAnalysis],
    index: &'a BTreeMap<String, usize>,
    source: &'a str,
    class_stack: Vec<String>,
    def_stack: Vec<DefEntry>,
    edges: Vec<Edge>,
    symbols: Vec<Node>,
    symbol_seen: &'a mut BTreeSet<String>,
}

impl<'a> CallWalker<'a> {
    fn visit(&mut self, node: TsNode<'_>) {
        match node.kind() {
            "class_definition" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| node_text(n, self.source).to_string())
                    .unwrap_or_default();
                let qualname = match self.class_stack.last() {
                    Some(outer) => format!("{outer}.{name}"),
                    None => name,
                };
                self.class_stack.push(qualname);
                self.visit_children(node);
                self.class_stack.pop();
            }
            "function_definition" => {
                let entry = self.enter_def(node);
                self.def_stack.push(entry);
                self.visit_children(node);
                self.def_stack.pop();
            }
            "call" => {
                self.visit_call(node);
                self.visit_children(node);
            }
            _ => self.visit_children(node),
        }
    }

    fn visit_children(&mut self, node: TsNode<'_>) {
        let mut cursor = node.walk();
        let children: Vec<TsNode<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    fn enter_def(&self, node: TsNode<'_>) -> DefEntry {
        let name = node
            .child_by_field_name("name")
            .map(|n| node_text(n, self.source))
            .unwrap_or_default();

        // Definitions nested inside another function were not registered in
        // pass 1; calls inside them are dropped.
        if !self.def_stack.is_empty() {
            return DefEntry {
                id: None,
                owner_class: None,
            };
        }
        let (candidate, owner_class) = match self.class_stack.last() {
            Some(cls) => (
                node_id(
                    NodeKind::Method,
                    &self.fa.module_path,
                    Some(&format!("{cls}.{name}")),
                ),
                Some(cls.clone()),
            ),
            None => (
                node_id(NodeKind::Function, &self.fa.module_path, Some(name)),
                None,
            ),
        };
        if self.fa.def_ids.contains(&candidate) {
            DefEntry {
                id: Some(candidate),
                owner_class,
            }
        } else {
            DefEntry {
                id: None,
                owner_class: None,
            }
        }
    }

    fn visit_call(&mut self, node: TsNode<'_>) {
        let Some(entry) = self.def_stack.last() else {
            return; // call outside any definition
        };
        let Some(src_id) = entry.id.clone() else {
            return;
        };
        let owner_class = entry.owner_class.clone();
        let Some(func) = node.child_by_field_name("function") else {
            return;
        };
        let Some(callee) = dotted_name(func, self.source) else {
            return;
        };

        let dst = self.resolve_call(&callee, owner_class.as_deref());
        let expr = node_text(node, self.source).to_string();
        self.edges.push(
            Edge::new(src_id, Rel::Calls, dst)
                .with_evidence(Evidence::new(start_line(node), expr)),
        );
    }

    /// Resolution rules, applied in order; any miss falls through to a
    /// symbol derived from the textual callee.
    fn resolve_call(&mut self, callee: &str, owner_class: Option<&str>) -> String {
        // Full dotted name defined in this module ("C.f", "Outer.Inner.m").
        if let Some(def) = self.fa.locals.get(callee) {
            let def = def.clone();
            return self.call_target(&def, callee);
        }

        let segments: Vec<&str> = callee.split('.').collect();
        if segments.len() == 1 {
            if let Some(binding) = self.fa.bindings.get(callee).cloned() {
                return match binding {
                    Binding::Def(def) => self.call_target(&def, callee),
                    Binding::External(dotted) => self.symbol(&dotted),
                    Binding::Module(_) => self.symbol(callee),
                };
            }
            return self.symbol(callee);
        }

        // `self.y()` / `cls.y()` / `CurrentClass.y()` → method on the
        // current class.
        let head = segments[0];
        if segments.len() == 2 {
            let on_current = head == "self"
                || head == "cls"
                || owner_class
                    .map(|c| c.rsplit('.').next() == Some(head))
                    .unwrap_or(false);
            if on_current {
                if let Some(mid) = owner_class
                    .and_then(|c| self.fa.classes.get(c))
                    .and_then(|c| c.methods.get(segments[1]))
                {
                    return mid.clone();
                }
                return self.symbol(callee);
            }
        }

        // `X.y()` where X is a known class or an imported module/class.
        for cut in (1..segments.len()).rev() {
            let prefix = segments[..cut].join(".");
            let rest = segments[cut..].join(".");

            if let Some(def) = self.fa.locals.get(&prefix).cloned() {
                if def.kind == NodeKind::Class {
                    if let Some(mid) = self.method_of(&def, &rest) {
                        return mid;
                    }
                }
                return self.symbol(callee);
            }
            let Some(binding) = self.fa.bindings.get(&prefix).cloned() else {
                continue;
            };
            return match binding {
                Binding::Module(mp) => {
                    match self
                        .index
                        .map_file(self.analyses, &mp)
                        .and_then(|f| f.locals.get(&rest).cloned())
                    {
                        Some(def) => self.call_target(&def, callee),
                        None => self.symbol(callee),
                    }
                }
                Binding::Def(def) if def.kind == NodeKind::Class => {
                    match self.method_of(&def, &rest) {
                        Some(mid) => mid,
                        None => self.symbol(callee),
                    }
                }
                _ => self.symbol(callee),
            };
        }
        self.symbol(callee)
    }

    /// CALLS destinations are functions, methods, or symbols. Calling a
    /// class resolves to its `__init__` when defined.
    fn call_target(&mut self, def: &DefRef, callee: &str) -> String {
        match def.kind {
            NodeKind::Function | NodeKind::Method => def.id.clone(),
            NodeKind::Class => match self.method_of(def, "__init__") {
                Some(init) => init,
                None => self.symbol(callee),
            },
            _ => self.symbol(callee),
        }
    }

    fn method_of(&self, class: &DefRef, method: &str) -> Option<String> {
        if method.contains('.') || method.is_empty() {
            return None;
        }
        self.index
            .map_file(self.analyses, &class.module_path)?
            .classes
            .get(&class.qualname)?
            .methods
            .get(method)
            .cloned()
    }

    fn symbol(&mut self, dotted: &str) -> String {
        intern_symbol(dotted, self.symbol_seen, &mut self.symbols)
    }
}
