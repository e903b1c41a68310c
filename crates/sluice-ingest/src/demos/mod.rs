//! Tutorial pipelines
//!
//! Small end-to-end loads that show the resource, source and pipeline
//! contract. Each demo writes into `<data_dir>/<pipeline_name>.db` and
//! returns the load report. Network demos take their base URL as a
//! parameter so they can run against a local mock.

pub mod files;
pub mod web;

pub use files::{filesystem, sql_database, ENCOUNTERS_GLOB, ROW_ID_COLUMN, SQL_TABLES};
pub use web::{
    jsonplaceholder, pokemon_config, rest_api, spacedevs_flow, spacedevs_source,
    JSONPLACEHOLDER_URL, POKEAPI_URL, SPACEDEVS_URL,
};

use crate::config::IngestConfig;
use crate::error::Result;
use crate::pipeline::{LoadReport, Pipeline, RunOptions};
use crate::resource::{dynamic_resources, Resource};
use crate::source::Source;
use crate::sources::RecordSource;
use serde_json::{json, Value};
use sluice_common::types::records_from_value;
use sluice_common::{Record, WriteDisposition};

fn records(value: Value) -> Result<Vec<Record>> {
    Ok(records_from_value(value)?)
}

/// Load three ids into `numbers`.
pub async fn simple(config: &IngestConfig) -> Result<LoadReport> {
    let pipeline = Pipeline::sqlite(config, "simple_pipeline", "my_dataset").await?;
    let data = records(json!([{"id": 1}, {"id": 2}, {"id": 3}]))?;
    pipeline
        .run(data, RunOptions::new().table_name("numbers"))
        .await
}

/// Rows `{"id": 1}..={"id": n}`, produced lazily
pub fn generate_rows(n: i64) -> RecordSource {
    RecordSource::lazy(move || {
        (1..=n).map(|i| {
            let mut record = Record::new();
            record.insert("id".to_string(), Value::from(i));
            record
        })
    })
}

/// Append five generated rows, then replace them with three.
pub async fn generator_demo(config: &IngestConfig) -> Result<(LoadReport, LoadReport)> {
    let pipeline = Pipeline::sqlite(config, "generator_demo", "demo_data").await?;

    let first = pipeline
        .run(
            generate_rows(5),
            RunOptions::new()
                .table_name("numbers")
                .write_disposition(WriteDisposition::Append),
        )
        .await?;
    let second = pipeline
        .run(
            generate_rows(3),
            RunOptions::new()
                .table_name("numbers")
                .write_disposition(WriteDisposition::Replace),
        )
        .await?;

    Ok((first, second))
}

/// One `users` resource grouped into a source.
pub async fn users(config: &IngestConfig) -> Result<LoadReport> {
    let users = Resource::from_records(
        "users",
        records(json!([
            {"id": 1, "name": "Alice"},
            {"id": 2, "name": "Bob"}
        ]))?,
    );
    let source = Source::new("simple_source", vec![users])?;

    let pipeline = Pipeline::sqlite(config, "simple_demo", "demo_data").await?;
    pipeline.run(source, RunOptions::new()).await
}

pub fn blog_source() -> Result<Source> {
    let posts = Resource::from_records(
        "posts",
        records(json!([
            {"id": 1, "title": "First Post"},
            {"id": 2, "title": "Second Post"}
        ]))?,
    );
    let comments = Resource::from_records(
        "comments",
        records(json!([
            {"id": 101, "post_id": 1, "text": "Great post!"},
            {"id": 102, "post_id": 2, "text": "Thanks for sharing!"}
        ]))?,
    );
    Source::new("blog_source", vec![posts, comments])
}

pub async fn blog(config: &IngestConfig) -> Result<LoadReport> {
    let pipeline = Pipeline::sqlite(config, "blog_demo", "blog_data").await?;
    pipeline.run(blog_source()?, RunOptions::new()).await
}

/// Resources built at run time from a map of endpoint name to data.
pub fn dynamic_blog_source() -> Result<Source> {
    let endpoints = json!({
        "posts": [
            {"id": 1, "title": "Dynamic Post"},
            {"id": 2, "title": "Another Dynamic Post"}
        ],
        "comments": [
            {"id": 201, "post_id": 1, "text": "Dynamic Comment!"}
        ]
    });

    let mut data = Vec::new();
    if let Value::Object(map) = endpoints {
        for (name, rows) in map {
            data.push((name, records(rows)?));
        }
    }

    let names: Vec<String> = data.iter().map(|(name, _)| name.clone()).collect();
    let resources = dynamic_resources(&names, |name| {
        let rows = data
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        Resource::from_records(name, rows)
    });
    Source::new("dynamic_blog_source", resources)
}

pub async fn dynamic_blog(config: &IngestConfig) -> Result<LoadReport> {
    let pipeline = Pipeline::sqlite(config, "dynamic_blog_demo", "dynamic_blog_data").await?;
    pipeline.run(dynamic_blog_source()?, RunOptions::new()).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir) -> IngestConfig {
        IngestConfig {
            data_dir: dir.path().to_path_buf(),
            ..IngestConfig::default()
        }
    }

    #[tokio::test]
    async fn test_simple_demo_loads_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let report = simple(&config(&dir)).await.unwrap();

        assert!(!report.has_failed());
        assert_eq!(report.rows_written("numbers"), Some(3));
        assert!(dir.path().join("simple_pipeline.db").exists());
    }

    #[tokio::test]
    async fn test_generator_demo_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let (first, second) = generator_demo(&config).await.unwrap();

        assert_eq!(first.rows_written("numbers"), Some(5));
        assert_eq!(second.rows_written("numbers"), Some(3));

        let pipeline = Pipeline::sqlite(&config, "generator_demo", "demo_data").await.unwrap();
        assert_eq!(pipeline.destination().row_count("numbers").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_blog_demos_load_both_tables() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);

        let report = blog(&config).await.unwrap();
        assert_eq!(report.rows_written("posts"), Some(2));
        assert_eq!(report.rows_written("comments"), Some(2));

        let report = dynamic_blog(&config).await.unwrap();
        assert_eq!(report.rows_written("posts"), Some(2));
        assert_eq!(report.rows_written("comments"), Some(1));
    }

    #[test]
    fn test_dynamic_blog_source_keeps_endpoint_order() {
        let source = dynamic_blog_source().unwrap();
        let names: Vec<&str> = source.resources().iter().map(Resource::name).collect();
        assert_eq!(names, vec!["posts", "comments"]);
    }
}
