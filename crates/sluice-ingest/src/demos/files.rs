//! Demos loading from local databases and files

use crate::config::IngestConfig;
use crate::error::Result;
use crate::incremental::Incremental;
use crate::pipeline::{LoadReport, Pipeline, RunOptions};
use crate::resource::{Resource, ResourceConfig};
use crate::source::Source;
use crate::sources::{self, FileReader, FilesystemSource, RecordSource};
use sluice_common::WriteDisposition;
use std::path::Path;

/// Tables copied by the SQL demo
pub const SQL_TABLES: [&str; 2] = ["family", "genome"];

/// Files read by the filesystem demo
pub const ENCOUNTERS_GLOB: &str = "encounters*.csv";

/// Generated per-row UUID column; kept apart from the encounter's own `Id`
pub const ROW_ID_COLUMN: &str = "_sluice_row_id";

/// Copy the `family` and `genome` tables of a SQLite database.
///
/// Tables are appended on every run unless a disposition is given.
pub async fn sql_database(
    config: &IngestConfig,
    database_url: &str,
    write_disposition: Option<WriteDisposition>,
) -> Result<LoadReport> {
    let source = sources::sql_database(database_url)
        .await?
        .with_resources(&SQL_TABLES)?;

    let pipeline =
        Pipeline::sqlite(config, "sql_to_sqlite_pipeline", "sql_to_sqlite_pipeline_data").await?;
    let options = match write_disposition {
        Some(disposition) => RunOptions::new().write_disposition(disposition),
        None => RunOptions::new(),
    };
    pipeline.run(source, options).await
}

/// Encounter rows from `encounters*.csv` files.
///
/// Files are skipped once read (by modification date) and rows are only
/// loaded when their `STOP` timestamp is past the last one seen. Every row
/// gets its file name and a generated row id, and rows merge on the
/// encounter `Id`.
pub fn encounters(base_dir: impl AsRef<Path>) -> Resource {
    let files = FilesystemSource::new(base_dir.as_ref(), ENCOUNTERS_GLOB);
    let reader = FileReader::csv(files)
        .incremental_files(Incremental::new("modification_date"))
        .with_file_name("file_name")
        .with_row_id(ROW_ID_COLUMN);

    Resource::new(
        ResourceConfig::new("encounters")
            .primary_key(["id"])
            .incremental(Incremental::new("STOP")),
        RecordSource::FileReader(reader),
    )
}

pub async fn filesystem(config: &IngestConfig, base_dir: impl AsRef<Path>) -> Result<LoadReport> {
    let pipeline = Pipeline::sqlite(config, "filesystem_pipeline", "hospital_data").await?;
    pipeline
        .run(
            Source::single(encounters(base_dir)),
            RunOptions::new().write_disposition(WriteDisposition::Merge),
        )
        .await
}
