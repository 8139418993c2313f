//! Per-run log stream
//!
//! Every entry is appended to the run's log artifact, handed to the caller's
//! observer and mirrored into `tracing`, in that order, under one lock so
//! all three see the same sequence even when conversion workers log
//! concurrently.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Severity of a run-log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Success,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Success => "SUCCESS",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: Severity,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Callback invoked once per entry, in emission order
pub type LogObserver = Arc<dyn Fn(&LogEntry) + Send + Sync>;

struct Inner {
    file: Option<File>,
    file_failed: bool,
    entries: Vec<LogEntry>,
}

/// Append-only log shared by all stages of a run
pub struct RunLog {
    path: Option<PathBuf>,
    observer: Option<LogObserver>,
    inner: Mutex<Inner>,
}

impl RunLog {
    /// Log that writes to `path`, truncating any previous content
    pub fn to_file(path: impl AsRef<Path>, observer: Option<LogObserver>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| {
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&path)
            });

        let (file, file_failed) = match file {
            Ok(file) => (Some(file), false),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot open run log artifact");
                (None, true)
            },
        };

        Self {
            path: Some(path),
            observer,
            inner: Mutex::new(Inner {
                file,
                file_failed,
                entries: Vec::new(),
            }),
        }
    }

    /// Log without an artifact, e.g. for a script-only run
    pub fn in_memory(observer: Option<LogObserver>) -> Self {
        Self {
            path: None,
            observer,
            inner: Mutex::new(Inner {
                file: None,
                file_failed: false,
                entries: Vec::new(),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn log(&self, level: Severity, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        };

        // A poisoned lock still holds a usable log
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(file) = inner.file.as_mut() {
            if let Err(e) = writeln!(file, "{entry}") {
                tracing::warn!(error = %e, "Run log artifact write failed, continuing in memory");
                inner.file = None;
                inner.file_failed = true;
            }
        }

        if let Some(observer) = &self.observer {
            observer(&entry);
        }

        match level {
            Severity::Info => tracing::info!(target: "udload::run", "{}", entry.message),
            Severity::Success => {
                tracing::info!(target: "udload::run", outcome = "success", "{}", entry.message)
            },
            Severity::Warn => tracing::warn!(target: "udload::run", "{}", entry.message),
            Severity::Error => tracing::error!(target: "udload::run", "{}", entry.message),
        }

        inner.entries.push(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Severity::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Severity::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(Severity::Success, message);
    }

    /// Snapshot of everything logged so far
    pub fn entries(&self) -> Vec<LogEntry> {
        match self.inner.lock() {
            Ok(inner) => inner.entries.clone(),
            Err(poisoned) => poisoned.into_inner().entries.clone(),
        }
    }

    /// Whether the artifact could not be written at some point
    pub fn artifact_failed(&self) -> bool {
        match self.inner.lock() {
            Ok(inner) => inner.file_failed,
            Err(poisoned) => poisoned.into_inner().file_failed,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_reach_file_and_observer_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: LogObserver = Arc::new(move |entry: &LogEntry| {
            sink.lock().unwrap().push(entry.message.clone());
        });

        let log = RunLog::to_file(dir.path().join("log.txt"), Some(observer));
        log.info("first");
        log.warn("second");
        log.success("third");

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);

        let text = std::fs::read_to_string(dir.path().join("log.txt")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("[INFO] first"));
        assert!(lines[1].ends_with("[WARN] second"));
        assert!(lines[2].ends_with("[SUCCESS] third"));
    }

    #[test]
    fn test_artifact_is_truncated_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, "stale line\n").unwrap();

        let log = RunLog::to_file(&path, None);
        log.error("fresh");

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("stale"));
        assert_eq!(log.entries().len(), 1);
        assert_eq!(log.entries()[0].level, Severity::Error);
    }

    #[test]
    fn test_unwritable_artifact_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as the log file
        let log = RunLog::to_file(dir.path(), None);
        log.info("still recorded");
        assert!(log.artifact_failed());
        assert_eq!(log.entries().len(), 1);
    }
}
