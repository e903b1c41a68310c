//! Pipeline runner
//!
//! A [`Pipeline`] loads the resources of a source into a destination, one
//! resource at a time and one chunk at a time. Each resource is staged and
//! committed on its own: a failure leaves every previously committed
//! resource and its persisted state untouched.
//!
//! # Example
//!
//! ```no_run
//! use sluice_ingest::config::IngestConfig;
//! use sluice_ingest::pipeline::{Pipeline, RunOptions};
//!
//! # async fn demo() -> sluice_ingest::Result<()> {
//! let config = IngestConfig::from_env()?;
//! let pipeline = Pipeline::sqlite(&config, "simple_pipeline", "my_dataset").await?;
//!
//! let data = sluice_common::types::records_from_value(serde_json::json!([
//!     {"id": 1}, {"id": 2}, {"id": 3}
//! ]))?;
//! let report = pipeline.run(data, RunOptions::new().table_name("numbers")).await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

pub mod report;

pub use report::{FailureKind, LoadReport, ResourceFailure, SchemaChange, TableReport};

use crate::config::IngestConfig;
use crate::destination::{Destination, LoadCommit, LoadTarget, SqliteDestination};
use crate::error::{IngestError, Result};
use crate::incremental::{CursorSet, CursorTracker};
use crate::normalize::{normalize_record, Column, TableSchema, LOAD_ID_COLUMN};
use crate::resource::{Resource, ResourceConfig};
use crate::source::Source;
use crate::sources::{ExtractContext, RecordSource};
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use sluice_common::naming::normalize_identifier;
use sluice_common::{Record, WriteDisposition};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Scope under which row-level cursors are persisted
pub const RESOURCE_CURSOR_SCOPE: &str = "resource";

/// What a run loads
#[derive(Debug, Clone)]
pub enum RunInput {
    Source(Source),
    Resource(Resource),
    /// Bare records or a generator; needs a table name
    Data(RecordSource),
}

impl From<Source> for RunInput {
    fn from(source: Source) -> Self {
        RunInput::Source(source)
    }
}

impl From<Resource> for RunInput {
    fn from(resource: Resource) -> Self {
        RunInput::Resource(resource)
    }
}

impl From<RecordSource> for RunInput {
    fn from(source: RecordSource) -> Self {
        RunInput::Data(source)
    }
}

impl From<Vec<Record>> for RunInput {
    fn from(records: Vec<Record>) -> Self {
        RunInput::Data(RecordSource::records(records))
    }
}

/// Per-call overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub table_name: Option<String>,
    /// Takes precedence over resource and source dispositions
    pub write_disposition: Option<WriteDisposition>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    pub fn write_disposition(mut self, disposition: WriteDisposition) -> Self {
        self.write_disposition = Some(disposition);
        self
    }
}

/// A failed resource load
struct LoadFailure {
    kind: FailureKind,
    error: IngestError,
}

impl LoadFailure {
    fn extract(error: impl Into<IngestError>) -> Self {
        let error = error.into();
        let kind = match error {
            IngestError::SchemaConflict { .. } => FailureKind::SchemaConflict,
            _ => FailureKind::Extract,
        };
        Self { kind, error }
    }

    fn write(error: impl Into<IngestError>) -> Self {
        Self {
            kind: FailureKind::Write,
            error: error.into(),
        }
    }
}

/// A committed resource load
struct Loaded {
    table: TableReport,
    changes: Vec<SchemaChange>,
}

/// Named pipeline writing into one destination
pub struct Pipeline {
    name: String,
    dataset_name: String,
    destination: Arc<dyn Destination>,
    config: IngestConfig,
    client: reqwest::Client,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        dataset_name: impl Into<String>,
        destination: Arc<dyn Destination>,
        config: IngestConfig,
    ) -> Result<Self> {
        config.validate()?;
        let client = config.http_client()?;
        Ok(Self {
            name: name.into(),
            dataset_name: dataset_name.into(),
            destination,
            config,
            client,
        })
    }

    /// Pipeline loading into `<data_dir>/<name>.db`
    pub async fn sqlite(
        config: &IngestConfig,
        name: impl Into<String>,
        dataset_name: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let destination = SqliteDestination::open(config.database_path(&name)).await?;
        Self::new(name, dataset_name, Arc::new(destination), config.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn destination(&self) -> &Arc<dyn Destination> {
        &self.destination
    }

    /// Cursor state persisted for a resource by its last successful load
    pub async fn resource_state(&self, resource_name: &str) -> Result<Option<Record>> {
        self.destination.initialize().await?;
        self.destination
            .resource_state(&self.name, resource_name)
            .await
    }

    /// Load every resource of the input.
    ///
    /// Returns an error only when the input itself is unusable or the
    /// destination cannot be initialized. Resource failures are recorded in
    /// the report.
    #[instrument(skip(self, input, options), fields(pipeline = %self.name))]
    pub async fn run(&self, input: impl Into<RunInput>, options: RunOptions) -> Result<LoadReport> {
        let (resources, source_default) = resolve_input(input.into(), &options)?;
        self.destination.initialize().await?;

        let load_id = Uuid::new_v4().to_string();
        let mut report = LoadReport {
            load_id: load_id.clone(),
            pipeline_name: self.name.clone(),
            dataset_name: self.dataset_name.clone(),
            destination: self.destination.describe(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            tables: Vec::new(),
            schema_changes: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
        };

        info!(load_id = %load_id, resources = resources.len(), "Starting load");

        let mut fatal = false;
        for resource in &resources {
            if fatal {
                report.skipped.push(resource.name().to_string());
                continue;
            }

            let disposition = options
                .write_disposition
                .or(resource.config.write_disposition)
                .or(source_default)
                .unwrap_or_default();

            match self.load_resource(&load_id, resource, disposition).await {
                Ok(loaded) => {
                    report.tables.push(loaded.table);
                    report.schema_changes.extend(loaded.changes);
                },
                Err(failure) => {
                    error!(
                        resource = %resource.name(),
                        kind = failure.kind.as_str(),
                        error = %failure.error,
                        "Resource load failed"
                    );
                    fatal = failure.kind == FailureKind::Write;
                    report.failures.push(ResourceFailure {
                        resource_name: resource.name().to_string(),
                        table_name: resource.config.table().to_string(),
                        kind: failure.kind,
                        message: failure.error.to_string(),
                    });
                },
            }
        }

        report.finished_at = Utc::now();
        info!(
            load_id = %load_id,
            rows = report.total_rows(),
            failures = report.failures.len(),
            skipped = report.skipped.len(),
            "Load finished"
        );
        Ok(report)
    }

    async fn load_resource(
        &self,
        load_id: &str,
        resource: &Resource,
        disposition: WriteDisposition,
    ) -> std::result::Result<Loaded, LoadFailure> {
        let started_at = Utc::now();
        let table = normalize_identifier(resource.config.table()).map_err(LoadFailure::extract)?;
        let primary_key = resource
            .config
            .primary_key
            .iter()
            .map(|c| normalize_identifier(c))
            .collect::<sluice_common::Result<Vec<_>>>()
            .map_err(LoadFailure::extract)?;

        let disposition = if disposition == WriteDisposition::Merge && primary_key.is_empty() {
            warn!(
                resource = %resource.name(),
                "Merge requested without a primary key, appending instead"
            );
            WriteDisposition::Append
        } else {
            disposition
        };

        let state = self
            .destination
            .resource_state(&self.name, resource.name())
            .await
            .map_err(LoadFailure::write)?;
        let existing = self
            .destination
            .table_schema(&table)
            .await
            .map_err(LoadFailure::write)?;

        let cursors = CursorSet::new(state);
        let tracker = resource
            .config
            .incremental
            .as_ref()
            .map(|incremental| cursors.tracker(RESOURCE_CURSOR_SCOPE, incremental));
        let ctx = ExtractContext {
            client: self.client.clone(),
            chunk_size: self.config.chunk_size,
            max_pages: self.config.max_pages,
            cursors: cursors.clone(),
        };

        debug!(
            resource = %resource.name(),
            table = %table,
            source = resource.source.kind(),
            disposition = %disposition,
            "Extracting resource"
        );
        let mut stream = resource
            .source
            .open(&ctx)
            .await
            .map_err(LoadFailure::extract)?;

        let target = LoadTarget::new(&self.name, load_id, &table);
        self.destination
            .begin_load(&target)
            .await
            .map_err(LoadFailure::write)?;

        let mut stage = Stage {
            destination: self.destination.as_ref(),
            target: &target,
            table: &table,
            primary_key: (disposition == WriteDisposition::Merge).then_some(&primary_key[..]),
            tracker: tracker.as_ref(),
            schema: existing.clone().unwrap_or_default(),
            staged: vec![Column::new(LOAD_ID_COLUMN, sluice_common::ColumnType::Text)],
            changes: Vec::new(),
            new_table: existing.is_none(),
            rows: 0,
        };

        let staged = async {
            while let Some(chunk) = stream.next().await {
                stage
                    .write_chunk(chunk.map_err(LoadFailure::extract)?)
                    .await?;
            }
            Ok(())
        }
        .await;

        if let Err(failure) = staged {
            self.abort(&target).await;
            return Err(failure);
        }

        let commit = LoadCommit {
            resource_name: resource.name().to_string(),
            dataset_name: self.dataset_name.clone(),
            write_disposition: disposition,
            primary_key: primary_key.clone(),
            schema: stage.schema,
            state: cursors.to_state(),
            rows: stage.rows,
            started_at,
        };

        let schema_version = match self.destination.commit_load(&target, &commit).await {
            Ok(version) => version,
            Err(e) => {
                self.abort(&target).await;
                return Err(LoadFailure::write(e));
            },
        };

        Ok(Loaded {
            table: TableReport {
                resource_name: resource.name().to_string(),
                table_name: table.clone(),
                write_disposition: disposition,
                rows_written: commit.rows,
                schema_version,
            },
            changes: stage.changes,
        })
    }

    async fn abort(&self, target: &LoadTarget) {
        if let Err(e) = self.destination.abort_load(target).await {
            warn!(staging = %target.staging_table, error = %e, "Failed to drop staging table");
        }
    }
}

/// Per-resource staging state
struct Stage<'a> {
    destination: &'a dyn Destination,
    target: &'a LoadTarget,
    table: &'a str,
    /// Set when merging; every record must carry these columns
    primary_key: Option<&'a [String]>,
    tracker: Option<&'a CursorTracker>,
    schema: TableSchema,
    staged: Vec<Column>,
    changes: Vec<SchemaChange>,
    new_table: bool,
    rows: u64,
}

impl Stage<'_> {
    async fn write_chunk(&mut self, chunk: Vec<Record>) -> std::result::Result<(), LoadFailure> {
        let chunk = match self.tracker {
            Some(tracker) => tracker.filter(chunk).map_err(LoadFailure::extract)?,
            None => chunk,
        };
        if chunk.is_empty() {
            return Ok(());
        }

        let mut records = Vec::with_capacity(chunk.len());
        for record in chunk {
            let mut record = normalize_record(record).map_err(LoadFailure::extract)?;
            record.insert(
                LOAD_ID_COLUMN.to_string(),
                Value::String(self.target.load_id.clone()),
            );
            records.push(record);
        }

        if let Some(key) = self.primary_key {
            for record in &records {
                if let Some(column) = key
                    .iter()
                    .find(|c| record.get(c.as_str()).map_or(true, Value::is_null))
                {
                    return Err(LoadFailure::extract(IngestError::missing_primary_key(
                        self.table, column,
                    )));
                }
            }
        }

        let delta = self
            .schema
            .extend_with(self.table, &records)
            .map_err(LoadFailure::extract)?;
        if !delta.widened.is_empty() {
            info!(
                table = %self.table,
                columns = ?delta.widened.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "Widening integer columns to double"
            );
        }
        self.changes.extend(delta.added.into_iter().map(|column| SchemaChange {
            table: self.table.to_string(),
            column: column.name,
            data_type: column.data_type,
            new_table: self.new_table,
            widened: false,
        }));
        self.changes.extend(delta.widened.into_iter().map(|column| SchemaChange {
            table: self.table.to_string(),
            column: column.name,
            data_type: column.data_type,
            new_table: false,
            widened: true,
        }));

        let missing: Vec<Column> = self
            .schema
            .columns
            .iter()
            .filter(|c| !self.staged.iter().any(|s| s.name == c.name))
            .filter(|c| records.iter().any(|r| r.contains_key(&c.name)))
            .cloned()
            .collect();
        if !missing.is_empty() {
            self.destination
                .add_columns(self.target, &missing)
                .await
                .map_err(LoadFailure::write)?;
            self.staged.extend(missing);
        }

        // Staged column types follow the table schema
        let columns: Vec<Column> = self
            .staged
            .iter()
            .map(|s| self.schema.get(&s.name).cloned().unwrap_or_else(|| s.clone()))
            .collect();
        let written = self
            .destination
            .write_batch(self.target, &columns, &records)
            .await
            .map_err(LoadFailure::write)?;
        self.rows += written;

        debug!(table = %self.table, rows = written, total = self.rows, "Chunk staged");
        Ok(())
    }
}

/// Turn the run input into resources plus the source-level default disposition.
fn resolve_input(
    input: RunInput,
    options: &RunOptions,
) -> Result<(Vec<Resource>, Option<WriteDisposition>)> {
    let source = match input {
        RunInput::Source(source) => source,
        RunInput::Resource(resource) => Source::single(resource),
        RunInput::Data(data) => {
            let table = options.table_name.as_deref().ok_or_else(|| {
                IngestError::config("A table name is required when running bare records")
            })?;
            Source::single(Resource::new(ResourceConfig::new(table), data))
        },
    };

    let default = source.default_disposition();
    let mut resources = source.into_resources();

    if let Some(table) = &options.table_name {
        if resources.len() > 1 {
            return Err(IngestError::config(format!(
                "Cannot load {} resources into the single table '{}'",
                resources.len(),
                table
            )));
        }
        for resource in &mut resources {
            resource.config.table_name = Some(table.clone());
        }
    }

    Ok((resources, default))
}
