//! Shared helpers for sluice-ingest integration tests
//!
//! Every test gets its own temporary data directory, so pipelines never
//! share a database file.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use serde_json::Value;
use sluice_common::Record;
use sluice_ingest::config::IngestConfig;
use sluice_ingest::destination::SqliteDestination;
use sluice_ingest::Pipeline;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Route library logs to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sluice_ingest=debug,sqlx=warn")
        .with_test_writer()
        .try_init();
}

pub fn records(value: Value) -> Vec<Record> {
    sluice_common::types::records_from_value(value).expect("test records must be objects")
}

/// A data directory plus helpers to open pipelines and inspect their databases
pub struct TestEnv {
    pub dir: TempDir,
    pub config: IngestConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = IngestConfig {
            data_dir: dir.path().join("data"),
            ..IngestConfig::default()
        };
        Self { dir, config }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    pub async fn pipeline(&self, name: &str) -> Pipeline {
        Pipeline::sqlite(&self.config, name, "test_data")
            .await
            .expect("Failed to open pipeline")
    }

    /// Direct connection to a pipeline's database
    pub async fn pool(&self, pipeline_name: &str) -> SqlitePool {
        let destination = SqliteDestination::open(self.config.database_path(pipeline_name))
            .await
            .expect("Failed to open database");
        destination.pool().clone()
    }

    pub async fn count(&self, pipeline_name: &str, sql: &str) -> i64 {
        sqlx::query_scalar(sql)
            .fetch_one(&self.pool(pipeline_name).await)
            .await
            .expect("Count query failed")
    }
}
