//! Error types for the ingest library
//!
//! Messages are meant to be read by whoever runs a pipeline, so they name
//! the resource, table or URL involved.

use sluice_common::{ColumnType, SluiceError};
use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error type for extraction, normalization and loading
#[derive(Error, Debug)]
pub enum IngestError {
    /// Destination or SQL source operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying the system table migrations failed
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// HTTP transport failed before a response arrived
    #[error("Network request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("Request to '{url}' failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Common(#[from] SluiceError),

    /// Two resources in one source share a name
    #[error("Resource '{0}' is defined more than once in the source")]
    DuplicateResource(String),

    /// A resource was selected that the source does not contain
    #[error("Resource '{0}' not found in source")]
    UnknownResource(String),

    /// Incoming data changes the type of an existing column
    #[error("Column '{column}' of table '{table}' has type {existing}, incoming data has type {incoming}")]
    SchemaConflict {
        table: String,
        column: String,
        existing: ColumnType,
        incoming: ColumnType,
    },

    /// Merge requires every record to carry its primary key
    #[error("Record for table '{table}' is missing primary key column '{column}'")]
    MissingPrimaryKey { table: String, column: String },

    /// Incremental cursor values could not be compared or are missing
    #[error("Incremental cursor error: {0}")]
    IncrementalCursor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A flow task failed or the flow could not be scheduled
    #[error("Flow error: {0}")]
    Flow(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an incremental cursor error
    pub fn cursor(msg: impl Into<String>) -> Self {
        Self::IncrementalCursor(msg.into())
    }

    /// Create a flow error
    pub fn flow(msg: impl Into<String>) -> Self {
        Self::Flow(msg.into())
    }

    /// Create an HTTP status error
    pub fn http_status(url: impl Into<String>, status: reqwest::StatusCode) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status: status.as_u16(),
        }
    }

    /// Create a schema conflict error
    pub fn schema_conflict(
        table: impl Into<String>,
        column: impl Into<String>,
        existing: ColumnType,
        incoming: ColumnType,
    ) -> Self {
        Self::SchemaConflict {
            table: table.into(),
            column: column.into(),
            existing,
            incoming,
        }
    }

    /// Create a missing primary key error
    pub fn missing_primary_key(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::MissingPrimaryKey {
            table: table.into(),
            column: column.into(),
        }
    }
}
