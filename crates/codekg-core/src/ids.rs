//! Deterministic identifier construction and path normalization.
//!
//! Ids are a pure function of `(kind, module_path, qualname)`, never of
//! enumeration order, hashes, or timestamps. This is what makes rebuilds of
//! the same source byte-identical.

use std::path::{Component, Path};

use crate::node::NodeKind;

/// Build a stable node id from its parts.
///
/// - module: `mod:<module_path>`
/// - class: `cls:<module_path>:<qualname>`
/// - function: `fn:<module_path>:<qualname>`
/// - method: `m:<module_path>:<qualname>`
/// - symbol: `sym:<qualname>`
pub fn node_id(kind: NodeKind, module_path: &str, qualname: Option<&str>) -> String {
    match kind {
        NodeKind::Module => format!("mod:{module_path}"),
        NodeKind::Symbol => symbol_id(qualname.unwrap_or_default()),
        NodeKind::Class | NodeKind::Function | NodeKind::Method => {
            let prefix = match kind {
                NodeKind::Class => "cls",
                NodeKind::Function => "fn",
                NodeKind::Method => "m",
                _ => unreachable!(),
            };
            match qualname {
                Some(q) => format!("{prefix}:{module_path}:{q}"),
                None => format!("{prefix}:{module_path}"),
            }
        }
    }
}

/// Stable id for an unresolved external name.
pub fn symbol_id(dotted: &str) -> String {
    format!("sym:{dotted}")
}

/// Normalize a filesystem path to a repo-relative POSIX string: forward
/// slashes, no leading `./`.
pub fn to_repo_relative(path: &Path, repo_root: &Path) -> String {
    let rel = path.strip_prefix(repo_root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    parts.join("/")
}

/// Dotted module path for a repo-relative `.py` file, with the suffix
/// removed: `pkg/db.py` → `pkg.db`, `pkg/__init__.py` → `pkg`.
pub fn module_qualname(module_path: &str) -> String {
    let trimmed = module_path.strip_suffix(".py").unwrap_or(module_path);
    let mut parts: Vec<&str> = trimmed.split('/').filter(|p| !p.is_empty()).collect();
    if parts.last() == Some(&"__init__") {
        parts.pop();
    }
    parts.join(".")
}
