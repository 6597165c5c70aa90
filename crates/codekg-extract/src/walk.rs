//! Deterministic repository traversal.
//!
//! Files are enumerated in sorted order so extractor output is independent
//! of filesystem iteration order. Symbolic links are not followed.

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::ExtractError;

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &[
    ".git",
    ".venv",
    "venv",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    "node_modules",
    "target",
    "build",
    "dist",
];

fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || SKIP_DIRS.contains(&name)
}

/// Collect every `.py` file under `repo_root`, sorted.
///
/// Dot-files, dot-directories, and well-known build/cache directories are
/// skipped. An error enumerating the root itself is fatal; errors on
/// individual entries are logged and skipped.
pub fn collect_python_files(repo_root: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut files = Vec::new();

    let walker = WalkDir::new(repo_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            if e.depth() == 0 {
                return true;
            }
            if e.file_type().is_dir() {
                !is_skipped_dir(&name)
            } else {
                !name.starts_with('.')
            }
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                if err.depth() == 0 {
                    return Err(ExtractError::Walk {
                        path: repo_root.display().to_string(),
                        source: err,
                    });
                }
                warn!("skipping unreadable entry under {:?}: {}", repo_root, err);
                continue;
            }
        };

        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("py")
        {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}
