//! Node and edge value types.
//!
//! Nodes and edges are immutable once emitted by the extractor. The store
//! persists them verbatim; later consumers read, never mutate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Module,
    Class,
    Function,
    Method,
    /// An unresolved external name (imported module, base class, or call
    /// target that does not map to a definition in the repository).
    Symbol,
}

impl NodeKind {
    /// Stable lowercase label, as stored in the `nodes.kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Module => "module",
            NodeKind::Class => "class",
            NodeKind::Function => "function",
            NodeKind::Method => "method",
            NodeKind::Symbol => "symbol",
        }
    }

    /// Ranking priority: functions sort before methods, classes, modules,
    /// and symbols.
    pub fn priority(&self) -> u8 {
        match self {
            NodeKind::Function => 0,
            NodeKind::Method => 1,
            NodeKind::Class => 2,
            NodeKind::Module => 3,
            NodeKind::Symbol => 4,
        }
    }
}

impl FromStr for NodeKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module" => Ok(NodeKind::Module),
            "class" => Ok(NodeKind::Class),
            "function" => Ok(NodeKind::Function),
            "method" => Ok(NodeKind::Method),
            "symbol" => Ok(NodeKind::Symbol),
            other => Err(QueryError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge relation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rel {
    Contains,
    Calls,
    Imports,
    Inherits,
}

impl Rel {
    /// Every relation, in the default expansion order.
    pub const ALL: [Rel; 4] = [Rel::Contains, Rel::Calls, Rel::Imports, Rel::Inherits];

    /// Stable uppercase label, as stored in the `edges.rel` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Rel::Contains => "CONTAINS",
            Rel::Calls => "CALLS",
            Rel::Imports => "IMPORTS",
            Rel::Inherits => "INHERITS",
        }
    }
}

impl FromStr for Rel {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONTAINS" => Ok(Rel::Contains),
            "CALLS" => Ok(Rel::Calls),
            "IMPORTS" => Ok(Rel::Imports),
            "INHERITS" => Ok(Rel::Inherits),
            other => Err(QueryError::UnknownRelation(other.to_string())),
        }
    }
}

impl fmt::Display for Rel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named program element.
///
/// Identifiers are a pure function of `(kind, module_path, qualname)`, so
/// rebuilding the same source always yields the same ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable node id (e.g. `fn:pkg/util.py:parse_file`).
    pub id: String,
    pub kind: NodeKind,
    /// Short name.
    pub name: String,
    /// Dotted path within the module; for modules, the dotted module path.
    pub qualname: Option<String>,
    /// Repo-relative POSIX path; `None` for unresolved externals.
    pub module_path: Option<String>,
    /// 1-based start line; absent means "no location".
    pub lineno: Option<u32>,
    /// 1-based inclusive end line.
    pub end_lineno: Option<u32>,
    pub docstring: Option<String>,
}

impl Node {
    /// Construct a symbol node for an unresolved dotted name.
    pub fn symbol(dotted: &str) -> Self {
        let name = dotted.rsplit('.').next().unwrap_or(dotted).to_string();
        Node {
            id: crate::ids::symbol_id(dotted),
            kind: NodeKind::Symbol,
            name,
            qualname: Some(dotted.to_string()),
            module_path: None,
            lineno: None,
            end_lineno: None,
            docstring: None,
        }
    }
}

/// Optional metadata attached to an edge, used for auditability and
/// call-site snippet extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    /// Textual form of the source expression (call, import, or base name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
}

impl Evidence {
    pub fn at_line(lineno: u32) -> Self {
        Evidence {
            lineno: Some(lineno),
            expr: None,
        }
    }

    pub fn new(lineno: u32, expr: impl Into<String>) -> Self {
        Evidence {
            lineno: Some(lineno),
            expr: Some(expr.into()),
        }
    }
}

/// A directed, typed, evidence-carrying relation between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub src: String,
    pub rel: Rel,
    pub dst: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
}

impl Edge {
    pub fn new(src: impl Into<String>, rel: Rel, dst: impl Into<String>) -> Self {
        Edge {
            src: src.into(),
            rel,
            dst: dst.into(),
            evidence: None,
        }
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = Some(evidence);
        self
    }

    /// Primary key of this edge in the store.
    pub fn key(&self) -> (String, Rel, String) {
        (self.src.clone(), self.rel, self.dst.clone())
    }
}
