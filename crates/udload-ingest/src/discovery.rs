//! Data directory discovery
//!
//! A data directory is the unit of table assignment. Directories named
//! after a report category (`4G`, `5G`, any case, at any depth) map to
//! `<TAG>_UD`; several directories with the same tag share one table. When
//! no tagged directory exists, each immediate child of the working tree
//! becomes its own table.

use crate::error::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Report categories recognised as data directory names
pub const DATA_TAGS: &[&str] = &["4G", "5G"];

/// Suffix appended to every destination table name
pub const TABLE_SUFFIX: &str = "_UD";

/// One destination table and the directories that feed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDirectory {
    pub table: String,
    pub dirs: Vec<PathBuf>,
}

impl DataDirectory {
    /// CSV files of this table, in discovery order
    ///
    /// Each file is taken from its nearest data directory, so a tagged
    /// directory nested in another one is not read twice.
    pub fn csv_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dir in &self.dirs {
            let walker = WalkDir::new(dir)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && is_tagged(e.path())));
            for entry in walker {
                let entry = entry.map_err(std::io::Error::from)?;
                let is_csv = entry
                    .file_name()
                    .to_string_lossy()
                    .to_lowercase()
                    .ends_with(".csv");
                if entry.file_type().is_file() && is_csv {
                    files.push(entry.into_path());
                }
            }
        }
        files.dedup();
        Ok(files)
    }
}

fn tag_of(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?.to_uppercase();
    DATA_TAGS.contains(&name.as_str()).then_some(name)
}

fn is_tagged(path: &Path) -> bool {
    tag_of(path).is_some()
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Find the data directories under `root`, ordered by table name
pub fn discover_data_directories(root: &Path) -> Result<Vec<DataDirectory>> {
    let mut tables: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some(tag) = tag_of(entry.path()) {
            tables
                .entry(format!("{tag}{TABLE_SUFFIX}"))
                .or_default()
                .push(entry.into_path());
        }
    }

    if tables.is_empty() {
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_dir() || is_hidden(entry.path()) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            tables
                .entry(format!("{name}{TABLE_SUFFIX}"))
                .or_default()
                .push(entry.into_path());
        }
    }

    Ok(tables
        .into_iter()
        .map(|(table, dirs)| DataDirectory { table, dirs })
        .collect())
}
