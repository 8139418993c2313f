//! Error types for the ingestion pipeline

use std::path::PathBuf;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error types for ingestion
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Common(#[from] udload_common::UdloadError),

    #[error("Archive error in {}: {message}", .path.display())]
    Archive { path: PathBuf, message: String },

    #[error("Spreadsheet error in {}: {message}", .path.display())]
    Spreadsheet { path: PathBuf, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Too few recognised columns in {}: {matched} matched", .path.display())]
    ColumnMatch { path: PathBuf, matched: usize },

    #[error("Bulk load failed: {0}")]
    BulkLoad(String),

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IngestError {
    pub fn archive(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn spreadsheet(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Spreadsheet {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
