//! Sluice Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Extract records from REST APIs, SQLite databases, CSV/JSON Lines files
//! and in-memory data, and load them into a local SQLite database.
//!
//! # Building blocks
//!
//! - **Record sources**: lazy, chunked record streams ([`sources`])
//! - **Resources**: a record source plus table, primary key, write
//!   disposition and incremental cursor ([`resource`])
//! - **Sources**: named groups of resources run together ([`source`])
//! - **Pipelines**: load a source into a destination and report what
//!   happened ([`pipeline`])
//! - **Flows**: linear task sequences wrapping a pipeline run ([`flow`])
//!
//! # Example
//!
//! ```no_run
//! use sluice_common::WriteDisposition;
//! use sluice_ingest::config::IngestConfig;
//! use sluice_ingest::pipeline::{Pipeline, RunOptions};
//! use sluice_ingest::resource::Resource;
//! use sluice_ingest::source::Source;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let users = Resource::from_records(
//!         "users",
//!         sluice_common::types::records_from_value(serde_json::json!([
//!             {"id": 1, "name": "Alice"},
//!             {"id": 2, "name": "Bob"}
//!         ]))?,
//!     )
//!     .apply_hints(|c| c.primary_key(["id"]).write_disposition(WriteDisposition::Merge));
//!
//!     let config = IngestConfig::from_env()?;
//!     let pipeline = Pipeline::sqlite(&config, "simple_demo", "demo_data").await?;
//!     let report = pipeline.run(Source::new("simple_source", vec![users])?, RunOptions::new()).await?;
//!     println!("{}", report);
//!     report.raise_on_failed()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod demos;
pub mod destination;
pub mod error;
pub mod flow;
pub mod incremental;
pub mod normalize;
pub mod pipeline;
pub mod resource;
pub mod source;
pub mod sources;

pub use error::{IngestError, Result};
pub use pipeline::{LoadReport, Pipeline, RunOptions};
pub use resource::{Resource, ResourceConfig};
pub use source::Source;
