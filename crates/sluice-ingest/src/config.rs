//! Runtime configuration for pipelines
//!
//! Values come from the environment (a `.env` file is honoured) and can be
//! overridden by the CLI.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Directory holding one SQLite database file per pipeline.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Timeout applied to every HTTP request made by a record source.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Number of records per chunk for sources that chunk their own input.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Maximum number of pages an HTTP source follows in one run.
pub const DEFAULT_MAX_PAGES: usize = 100;

/// Ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestConfig {
    /// Directory where pipeline databases are created
    pub data_dir: PathBuf,

    /// HTTP request timeout in seconds
    pub http_timeout_secs: u64,

    /// Records per chunk for in-memory, file and SQL sources
    pub chunk_size: usize,

    /// Page cap for paginated HTTP sources
    pub max_pages: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables
    ///
    /// - `SLUICE_DATA_DIR`
    /// - `SLUICE_HTTP_TIMEOUT_SECS`
    /// - `SLUICE_CHUNK_SIZE`
    /// - `SLUICE_MAX_PAGES`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(dir) = std::env::var("SLUICE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(val) = std::env::var("SLUICE_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = parse_var("SLUICE_HTTP_TIMEOUT_SECS", &val)?;
        }
        if let Ok(val) = std::env::var("SLUICE_CHUNK_SIZE") {
            config.chunk_size = parse_var("SLUICE_CHUNK_SIZE", &val)?;
        }
        if let Ok(val) = std::env::var("SLUICE_MAX_PAGES") {
            config.max_pages = parse_var("SLUICE_MAX_PAGES", &val)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.http_timeout_secs == 0 {
            return Err(IngestError::config("HTTP timeout must be greater than 0"));
        }
        if self.chunk_size == 0 {
            return Err(IngestError::config("Chunk size must be greater than 0"));
        }
        if self.max_pages == 0 {
            return Err(IngestError::config("Max pages must be greater than 0"));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Path of the database file for a pipeline
    pub fn database_path(&self, pipeline_name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.db", pipeline_name))
    }

    /// Build the HTTP client shared by every source of a pipeline
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.http_timeout())
            .user_agent(concat!("sluice-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IngestError::config(format!("{} has an invalid value: '{}'", name, value)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "SLUICE_DATA_DIR",
            "SLUICE_HTTP_TIMEOUT_SECS",
            "SLUICE_CHUNK_SIZE",
            "SLUICE_MAX_PAGES",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.database_path("simple_pipeline"),
            PathBuf::from("./data/simple_pipeline.db")
        );
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("SLUICE_DATA_DIR", "/tmp/sluice-data");
        std::env::set_var("SLUICE_CHUNK_SIZE", "500");
        std::env::set_var("SLUICE_MAX_PAGES", "3");

        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/sluice-data"));
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.max_pages, 3);
        assert_eq!(config.http_timeout_secs, DEFAULT_HTTP_TIMEOUT_SECS);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage_and_zero() {
        clear_env();
        std::env::set_var("SLUICE_CHUNK_SIZE", "lots");
        assert!(matches!(IngestConfig::from_env(), Err(IngestError::Config(_))));

        std::env::set_var("SLUICE_CHUNK_SIZE", "0");
        assert!(matches!(IngestConfig::from_env(), Err(IngestError::Config(_))));

        clear_env();
    }
}
