//! Source-grounded snippet extraction.
//!
//! Spans are closed 1-based line ranges. Files are read lazily through a
//! per-invocation cache, and every path is joined under the repository root
//! with a traversal guard: a resolved path outside the root drops the node
//! rather than reading the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use codekg_core::NodeKind;

use crate::result::Snippet;

/// Two spans in the same file closer than this many lines are merged away
/// during deduplication.
pub const SPAN_GAP: u32 = 2;

/// A snippet would require reading outside the repository root.
#[derive(Debug, Error)]
#[error("path escapes repository root: {path}")]
pub struct PathEscape {
    pub path: String,
}

/// Compute the snippet span for a node.
///
/// Modules and nodes with no line info fall back to a top-of-file window.
/// The span never exceeds `max_lines` lines or the end of the file.
/// Returns `None` for an empty file.
pub fn compute_span(
    kind: NodeKind,
    lineno: Option<u32>,
    end_lineno: Option<u32>,
    context: u32,
    max_lines: u32,
    file_nlines: u32,
) -> Option<(u32, u32)> {
    if file_nlines == 0 || max_lines == 0 {
        return None;
    }
    let top_window = || (1, file_nlines.min(max_lines));

    if kind == NodeKind::Module {
        return Some(top_window());
    }
    let Some(lineno) = lineno.filter(|l| *l > 0) else {
        return Some(top_window());
    };

    let start = lineno.saturating_sub(context).max(1);
    let base_end = match end_lineno {
        Some(e) if e >= lineno => e,
        _ => lineno,
    };
    let mut end = (base_end + context).min(file_nlines);
    if end < start {
        // line info points past the end of the file (stale build)
        return None;
    }
    if end - start + 1 > max_lines {
        end = (start + max_lines - 1).min(file_nlines);
    }
    Some((start, end))
}

/// Whether two spans overlap or sit within `gap` lines of each other.
pub fn spans_overlap(a: (u32, u32), b: (u32, u32), gap: u32) -> bool {
    let (a0, a1) = a;
    let (b0, b1) = b;
    !(a1 + gap < b0 || b1 + gap < a0)
}

/// Render the line-numbered snippet text for `[start, end]` of `lines`.
///
/// Line numbers are zero-padded to the width of the file's largest line
/// number.
pub fn make_snippet(path: &str, lines: &[String], start: u32, end: u32) -> Snippet {
    let width = digits(lines.len() as u32);
    let e0 = (end as usize).min(lines.len());
    let s0 = ((start.saturating_sub(1)) as usize).min(e0);
    let text = lines[s0..e0]
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:0width$}: {line}", start as usize + i, width = width))
        .collect::<Vec<_>>()
        .join("\n");
    Snippet {
        path: path.to_string(),
        start,
        end,
        text,
    }
}

fn digits(n: u32) -> usize {
    n.max(1).to_string().len()
}

/// Lazily-read source files, keyed by repo-relative path. Private to a
/// single pack invocation and discarded on return.
pub struct FileCache {
    repo_root: PathBuf,
    canonical_root: PathBuf,
    files: BTreeMap<String, Vec<String>>,
}

impl FileCache {
    pub fn new(repo_root: &Path) -> Self {
        let canonical_root = repo_root
            .canonicalize()
            .unwrap_or_else(|_| repo_root.to_path_buf());
        Self {
            repo_root: repo_root.to_path_buf(),
            canonical_root,
            files: BTreeMap::new(),
        }
    }

    /// Lines of `rel_path`, read once and cached.
    ///
    /// A missing or unreadable file yields an empty slice (the node keeps
    /// no snippet); a path resolving outside the repository root is a
    /// [`PathEscape`] and the caller drops the node.
    pub fn lines(&mut self, rel_path: &str) -> Result<&[String], PathEscape> {
        if !self.files.contains_key(rel_path) {
            let lines = self.read(rel_path)?;
            self.files.insert(rel_path.to_string(), lines);
        }
        Ok(self
            .files
            .get(rel_path)
            .map(|v| v.as_slice())
            .unwrap_or(&[]))
    }

    fn read(&self, rel_path: &str) -> Result<Vec<String>, PathEscape> {
        let joined = self.repo_root.join(rel_path);
        let resolved = match joined.canonicalize() {
            Ok(p) => p,
            Err(err) => {
                debug!("no source for {rel_path}: {err}");
                return Ok(Vec::new());
            }
        };
        if !resolved.starts_with(&self.canonical_root) {
            return Err(PathEscape {
                path: rel_path.to_string(),
            });
        }
        match std::fs::read(&resolved) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes)
                .lines()
                .map(|l| l.to_string())
                .collect()),
            Err(err) => {
                debug!("failed to read {rel_path}: {err}");
                Ok(Vec::new())
            }
        }
    }
}
