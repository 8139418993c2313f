//! In-place archive extraction
//!
//! Every archive in the working tree is unpacked into its own directory.
//! Zip entry names carry no reliable encoding marker, so each archive is
//! tried against a ranked list of name encodings and the first one that
//! decodes every entry of a readable archive wins. Archives found inside
//! extracted archives are picked up by the next pass.
//!
//! Supported: `.zip`, `.tar`, `.tar.gz` / `.tgz`.

use crate::error::{IngestError, Result};
use crate::fsutil::{display_relative, find_files};
use crate::report::StageReport;
use crate::run_log::RunLog;
use flate2::read::GzDecoder;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Discovery passes before nested extraction stops
pub const MAX_EXTRACTION_PASSES: usize = 8;

/// Candidate encodings for zip entry names, in the order they are tried
pub const NAME_ENCODINGS: [NameEncoding; 3] =
    [NameEncoding::Utf8, NameEncoding::Gbk, NameEncoding::Cp437];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameEncoding {
    Utf8,
    /// Simplified Chinese Windows archivers
    Gbk,
    /// DOS code page; decodes any byte sequence
    Cp437,
}

impl NameEncoding {
    /// Decode a raw entry name; `legacy` is the zip reader's own CP437 rendering
    fn decode(self, raw: &[u8], legacy: &str) -> Option<String> {
        match self {
            NameEncoding::Utf8 => std::str::from_utf8(raw).ok().map(str::to_owned),
            NameEncoding::Gbk => encoding_rs::GBK
                .decode_without_bom_handling_and_without_replacement(raw)
                .map(Cow::into_owned),
            NameEncoding::Cp437 => Some(legacy.to_owned()),
        }
    }
}

impl std::fmt::Display for NameEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameEncoding::Utf8 => f.write_str("utf-8"),
            NameEncoding::Gbk => f.write_str("gbk"),
            NameEncoding::Cp437 => f.write_str("cp437"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    fn detect(lowercase_name: &str) -> Option<Self> {
        if lowercase_name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if lowercase_name.ends_with(".tar.gz") || lowercase_name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if lowercase_name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }
}

/// What one archive produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOutcome {
    pub files: usize,
    /// Name encoding that was accepted (zip only)
    pub encoding: Option<NameEncoding>,
    /// Entries refused because they would land outside the archive's directory
    pub skipped: Vec<String>,
}

/// Why a single encoding candidate was rejected
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("entry name {0:?} is not valid in this encoding")]
    Undecodable(String),

    #[error("invalid archive: {0}")]
    Invalid(#[from] zip::result::ZipError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Extract every archive under `root`, logging each one
///
/// A failing archive is recorded and skipped; only discovery errors are
/// returned.
pub fn normalize_archives(root: &Path, log: &RunLog) -> Result<StageReport> {
    log.info("Extracting archives...");

    let mut report = StageReport::default();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for _ in 0..MAX_EXTRACTION_PASSES {
        let pending: Vec<PathBuf> = find_files(root, |name| ArchiveKind::detect(name).is_some())?
            .into_iter()
            .filter(|path| !seen.contains(path))
            .collect();

        if pending.is_empty() {
            break;
        }

        for path in pending {
            let rel = display_relative(root, &path);
            seen.insert(path.clone());
            log.info(format!("Extracting: {rel}"));

            match extract_archive(&path) {
                Ok(outcome) => {
                    for entry in &outcome.skipped {
                        log.warn(format!("Skipped unsafe entry {entry:?} in {rel}"));
                    }
                    if let Some(encoding) = outcome.encoding.filter(|e| *e != NameEncoding::Utf8) {
                        log.info(format!("{rel}: entry names decoded as {encoding}"));
                    }
                    report.record_success();
                },
                Err(e) => {
                    log.error(format!("Extraction failed {rel}: {e}"));
                    report.record_failure(rel, e);
                },
            }
        }
    }

    log.info(format!(
        "Archive extraction finished: {} extracted, {} failed",
        report.succeeded,
        report.failed()
    ));
    Ok(report)
}

/// Extract one archive next to itself
pub fn extract_archive(path: &Path) -> Result<ExtractOutcome> {
    let dest = path
        .parent()
        .ok_or_else(|| IngestError::archive(path, "archive has no parent directory"))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ArchiveKind::detect(&name) {
        Some(ArchiveKind::Zip) => extract_zip(path, dest),
        Some(ArchiveKind::TarGz) => {
            let file = File::open(path)?;
            extract_tar(path, GzDecoder::new(BufReader::new(file)), dest)
        },
        Some(ArchiveKind::Tar) => {
            let file = File::open(path)?;
            extract_tar(path, BufReader::new(file), dest)
        },
        None => Err(IngestError::archive(path, "not a supported archive")),
    }
}

fn extract_zip(path: &Path, dest: &Path) -> Result<ExtractOutcome> {
    let mut rejected = Vec::with_capacity(NAME_ENCODINGS.len());

    for encoding in NAME_ENCODINGS {
        match try_extract_zip(path, dest, encoding) {
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                tracing::debug!(archive = %path.display(), %encoding, error = %e, "Encoding rejected");
                rejected.push(format!("{encoding}: {e}"));
            },
        }
    }

    Err(IngestError::archive(
        path,
        format!("no filename encoding produced a valid archive ({})", rejected.join("; ")),
    ))
}

fn try_extract_zip(
    path: &Path,
    dest: &Path,
    encoding: NameEncoding,
) -> std::result::Result<ExtractOutcome, AttemptError> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

    // Decode every name before writing anything
    let mut plan = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        let name = encoding
            .decode(entry.name_raw(), entry.name())
            .ok_or_else(|| AttemptError::Undecodable(String::from_utf8_lossy(entry.name_raw()).into_owned()))?;
        plan.push((index, name, entry.is_dir()));
    }

    let mut outcome = ExtractOutcome {
        encoding: Some(encoding),
        ..ExtractOutcome::default()
    };

    for (index, name, is_dir) in plan {
        let Some(relative) = safe_relative_path(&name) else {
            outcome.skipped.push(name);
            continue;
        };
        let target = dest.join(relative);

        if is_dir {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut entry = archive.by_index(index)?;
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        outcome.files += 1;
    }

    Ok(outcome)
}

fn extract_tar<R: Read>(path: &Path, reader: R, dest: &Path) -> Result<ExtractOutcome> {
    let mut archive = tar::Archive::new(reader);
    let mut outcome = ExtractOutcome::default();

    let entries = archive
        .entries()
        .map_err(|e| IngestError::archive(path, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| IngestError::archive(path, e))?;
        let is_file = entry.header().entry_type().is_file();
        let name = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        // unpack_in refuses paths that escape `dest`
        if entry
            .unpack_in(dest)
            .map_err(|e| IngestError::archive(path, e))?
        {
            if is_file {
                outcome.files += 1;
            }
        } else {
            outcome.skipped.push(name);
        }
    }

    Ok(outcome)
}

/// Relative path for an entry name, or `None` if it would escape the target
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    if name.starts_with('/') || name.starts_with('\\') || name.contains(':') {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return None,
            part => relative.push(part),
        }
    }

    (!relative.as_os_str().is_empty()).then_some(relative)
}
