//! Load reports

use crate::error::{IngestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_common::{ColumnType, WriteDisposition};
use std::fmt;

/// Rows committed to one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub resource_name: String,
    pub table_name: String,
    pub write_disposition: WriteDisposition,
    pub rows_written: u64,
    pub schema_version: i64,
}

/// A column created or widened by the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaChange {
    pub table: String,
    pub column: String,
    pub data_type: ColumnType,
    /// The column came with a newly created table
    pub new_table: bool,
    /// An existing integer column now holds doubles
    pub widened: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Fetching or parsing source data failed
    Extract,
    /// Incoming data changes an existing column type
    SchemaConflict,
    /// The destination rejected a write; fatal to the run
    Write,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Extract => "extract",
            FailureKind::SchemaConflict => "schema_conflict",
            FailureKind::Write => "write",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceFailure {
    pub resource_name: String,
    pub table_name: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Summary of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub load_id: String,
    pub pipeline_name: String,
    pub dataset_name: String,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableReport>,
    pub schema_changes: Vec<SchemaChange>,
    pub failures: Vec<ResourceFailure>,
    /// Resources not attempted after a fatal write failure
    pub skipped: Vec<String>,
}

impl LoadReport {
    pub fn has_failed(&self) -> bool {
        !self.failures.is_empty() || !self.skipped.is_empty()
    }

    /// Rows written to a table by this run, if it was loaded
    pub fn rows_written(&self, table: &str) -> Option<u64> {
        self.tables
            .iter()
            .filter(|t| t.table_name == table)
            .map(|t| t.rows_written)
            .reduce(|a, b| a + b)
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_written).sum()
    }

    /// Turn recorded failures into an error.
    pub fn raise_on_failed(&self) -> Result<()> {
        if !self.has_failed() {
            return Ok(());
        }

        let mut problems: Vec<String> = self
            .failures
            .iter()
            .map(|f| format!("{} ({}): {}", f.resource_name, f.kind.as_str(), f.message))
            .collect();
        if !self.skipped.is_empty() {
            problems.push(format!("skipped: {}", self.skipped.join(", ")));
        }

        Err(IngestError::Other(anyhow::anyhow!(
            "Load {} of pipeline '{}' failed: {}",
            self.load_id,
            self.pipeline_name,
            problems.join("; ")
        )))
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self.finished_at - self.started_at;
        writeln!(
            f,
            "Pipeline {} load {} to {} (dataset {}) in {:.2}s",
            self.pipeline_name,
            self.load_id,
            self.destination,
            self.dataset_name,
            elapsed.num_milliseconds() as f64 / 1000.0
        )?;

        for table in &self.tables {
            writeln!(
                f,
                "  {}: {} rows ({}, schema v{})",
                table.table_name, table.rows_written, table.write_disposition, table.schema_version
            )?;
        }

        if !self.schema_changes.is_empty() {
            writeln!(f, "Schema changes:")?;
            for change in &self.schema_changes {
                let marker = if change.widened { '~' } else { '+' };
                writeln!(
                    f,
                    "  {} {}.{} {}",
                    marker, change.table, change.column, change.data_type
                )?;
            }
        }

        for failure in &self.failures {
            writeln!(
                f,
                "FAILED {} -> {} [{}]: {}",
                failure.resource_name,
                failure.table_name,
                failure.kind.as_str(),
                failure.message
            )?;
        }

        if !self.skipped.is_empty() {
            writeln!(f, "Skipped: {}", self.skipped.join(", "))?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn report() -> LoadReport {
        let now = Utc::now();
        LoadReport {
            load_id: "1700000000.123".to_string(),
            pipeline_name: "blog_demo".to_string(),
            dataset_name: "blog_data".to_string(),
            destination: "sqlite (:memory:)".to_string(),
            started_at: now,
            finished_at: now,
            tables: vec![TableReport {
                resource_name: "posts".to_string(),
                table_name: "posts".to_string(),
                write_disposition: WriteDisposition::Append,
                rows_written: 100,
                schema_version: 1,
            }],
            schema_changes: vec![],
            failures: vec![],
            skipped: vec![],
        }
    }

    #[test]
    fn test_successful_report() {
        let report = report();
        assert!(!report.has_failed());
        assert!(report.raise_on_failed().is_ok());
        assert_eq!(report.rows_written("posts"), Some(100));
        assert_eq!(report.rows_written("comments"), None);
        assert!(report.to_string().contains("posts: 100 rows (append, schema v1)"));
    }

    #[test]
    fn test_failures_raise() {
        let mut report = report();
        report.failures.push(ResourceFailure {
            resource_name: "comments".to_string(),
            table_name: "comments".to_string(),
            kind: FailureKind::Extract,
            message: "Request to 'x' failed with status 500".to_string(),
        });
        report.skipped.push("users".to_string());

        let err = report.raise_on_failed().unwrap_err().to_string();
        assert!(err.contains("comments (extract)"));
        assert!(err.contains("skipped: users"));
        assert!(report.to_string().contains("FAILED comments"));
    }

    #[test]
    fn test_schema_changes_listed() {
        let mut report = report();
        report.schema_changes.push(SchemaChange {
            table: "posts".to_string(),
            column: "title".to_string(),
            data_type: ColumnType::Text,
            new_table: true,
            widened: false,
        });
        report.schema_changes.push(SchemaChange {
            table: "posts".to_string(),
            column: "score".to_string(),
            data_type: ColumnType::Double,
            new_table: false,
            widened: true,
        });

        let shown = report.to_string();
        assert!(shown.contains("  + posts.title text"));
        assert!(shown.contains("  ~ posts.score double"));
    }
}
