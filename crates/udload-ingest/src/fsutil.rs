//! Working-tree discovery helpers

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every file under `root` whose lowercased name satisfies `accept`
///
/// Results are in a stable, name-sorted depth-first order.
pub fn find_files<F>(root: &Path, accept: F) -> std::io::Result<Vec<PathBuf>>
where
    F: Fn(&str) -> bool,
{
    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if accept(&name) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// `path` relative to `root` for log messages, falling back to the full path
pub fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
