//! Destination interface
//!
//! A destination stores data tables and the pipeline's system tables
//! (loads, resource state, table schemas). Loads go through a staging table
//! so that the disposition, the new state and the schema version land in
//! one transaction.

pub mod sqlite;

pub use sqlite::SqliteDestination;

use crate::error::Result;
use crate::normalize::{Column, TableSchema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_common::naming::SYSTEM_PREFIX;
use sluice_common::{Record, WriteDisposition};

/// Tables touched by one resource load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    pub pipeline_name: String,
    pub load_id: String,
    pub table_name: String,
    /// Scratch table holding this load's rows until commit
    pub staging_table: String,
}

impl LoadTarget {
    pub fn new(
        pipeline_name: impl Into<String>,
        load_id: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        let table_name = table_name.into();
        Self {
            pipeline_name: pipeline_name.into(),
            load_id: load_id.into(),
            staging_table: format!("{}_staging__{}", SYSTEM_PREFIX, table_name),
            table_name,
        }
    }
}

/// Everything persisted when a resource load commits
#[derive(Debug, Clone)]
pub struct LoadCommit {
    pub resource_name: String,
    pub dataset_name: String,
    pub write_disposition: WriteDisposition,
    /// Normalized key columns; only used by merge
    pub primary_key: Vec<String>,
    /// Target schema after this load
    pub schema: TableSchema,
    /// Resource state replacing the persisted one
    pub state: Record,
    pub rows: u64,
    pub started_at: DateTime<Utc>,
}

/// Storage engine receiving normalized tabular writes
#[async_trait]
pub trait Destination: Send + Sync {
    /// Short description used in load reports, e.g. `sqlite (data/x.db)`
    fn describe(&self) -> String;

    /// Create the system tables if needed
    async fn initialize(&self) -> Result<()>;

    /// Columns of a data table, `None` if it does not exist
    async fn table_schema(&self, table: &str) -> Result<Option<TableSchema>>;

    /// State persisted by the last successful load of a resource
    async fn resource_state(&self, pipeline_name: &str, resource_name: &str)
        -> Result<Option<Record>>;

    /// Create an empty staging table for a load
    async fn begin_load(&self, target: &LoadTarget) -> Result<()>;

    /// Add columns to the staging table
    async fn add_columns(&self, target: &LoadTarget, columns: &[Column]) -> Result<()>;

    /// Append rows to the staging table; missing values are written as NULL
    async fn write_batch(&self, target: &LoadTarget, columns: &[Column], rows: &[Record])
        -> Result<u64>;

    /// Apply the staged rows to the target table and persist state, schema
    /// and load record atomically. Returns the table's schema version.
    async fn commit_load(&self, target: &LoadTarget, commit: &LoadCommit) -> Result<i64>;

    /// Discard the staging table
    async fn abort_load(&self, target: &LoadTarget) -> Result<()>;

    async fn row_count(&self, table: &str) -> Result<u64>;
}
