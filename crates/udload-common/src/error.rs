//! Error types shared by UDLoad crates

use thiserror::Error;

/// Result type alias for UDLoad operations
pub type Result<T> = std::result::Result<T, UdloadError>;

/// Main error type for UDLoad
#[derive(Error, Debug)]
pub enum UdloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown declared type '{declared}' for field '{field}'")]
    UnknownType { field: String, declared: String },

    #[error("Alias '{alias}' maps to both '{first}' and '{second}'")]
    ConflictingAlias {
        alias: String,
        first: String,
        second: String,
    },
}

impl UdloadError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
