//! Error types for Sluice

use thiserror::Error;

/// Result type alias for common Sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;

/// Main error type for the shared data model
#[derive(Error, Debug)]
pub enum SluiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid write disposition: '{0}' (expected append, replace or merge)")]
    InvalidWriteDisposition(String),

    #[error("Invalid column type: {0}")]
    InvalidColumnType(String),

    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("Not a record: expected a JSON object, got {0}")]
    NotARecord(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
