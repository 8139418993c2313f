//! Per-stage outcome accounting

use serde::Serialize;

/// One item (archive, workbook, data file, statement) that failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub item: String,
    pub message: String,
}

/// Successes and failures accumulated while a stage walks its items
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub succeeded: usize,
    /// Items deliberately passed over (e.g. auxiliary files)
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
}

impl StageReport {
    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn record_failure(&mut self, item: impl Into<String>, message: impl std::fmt::Display) {
        self.failures.push(ItemFailure {
            item: item.into(),
            message: message.to_string(),
        });
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}
