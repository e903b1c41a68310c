//! Record sources
//!
//! A record source produces a lazy stream of record chunks from one origin.
//! Opening a source never reads the whole origin up front: HTTP sources
//! fetch page by page, SQL sources use keyset paging and file readers stream
//! rows in chunks.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use sluice_ingest::sources::{ExtractContext, RecordSource};
//!
//! # async fn demo() -> sluice_ingest::Result<()> {
//! let source = RecordSource::lazy(|| (1..=5).map(|i| {
//!     serde_json::json!({"id": i}).as_object().cloned().unwrap_or_default()
//! }));
//! let mut stream = source.open(&ExtractContext::default()).await?;
//! while let Some(chunk) = stream.next().await {
//!     println!("{} records", chunk?.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod file_reader;
pub mod filesystem;
pub mod http;
pub mod rest_api;
pub mod sql;

pub use file_reader::{FileFormat, FileReader};
pub use filesystem::{FileItem, FilesystemSource};
pub use http::{HttpSource, Paginator};
pub use rest_api::{rest_api_source, RestApiConfig};
pub use sql::{sql_database, SqlTableSource};

use crate::config::{IngestConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PAGES};
use crate::error::Result;
use crate::incremental::CursorSet;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use sluice_common::Record;
use std::fmt;
use std::sync::Arc;

/// Stream of record chunks produced by an opened source
pub type RecordStream = BoxStream<'static, Result<Vec<Record>>>;

/// Factory producing a fresh stream each time a resource is run.
/// Receives the pipeline's chunk size.
pub type GeneratorFn = Arc<dyn Fn(usize) -> RecordStream + Send + Sync>;

/// Everything a source needs from the running pipeline
#[derive(Clone)]
pub struct ExtractContext {
    pub client: reqwest::Client,
    pub chunk_size: usize,
    pub max_pages: usize,
    /// Cursors of the resource being extracted
    pub cursors: CursorSet,
}

impl Default for ExtractContext {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            cursors: CursorSet::default(),
        }
    }
}

impl ExtractContext {
    pub fn from_config(config: &IngestConfig, cursors: CursorSet) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            chunk_size: config.chunk_size,
            max_pages: config.max_pages,
            cursors,
        })
    }
}

/// Where a resource's records come from
#[derive(Clone)]
pub enum RecordSource {
    /// Records held in memory
    Records(Arc<Vec<Record>>),
    /// A generator called once per run
    Generator(GeneratorFn),
    Http(HttpSource),
    SqlTable(SqlTableSource),
    /// File listing: one record per matched file
    Filesystem(FilesystemSource),
    /// Rows read from the files of a listing
    FileReader(FileReader),
}

impl RecordSource {
    pub fn records(records: Vec<Record>) -> Self {
        RecordSource::Records(Arc::new(records))
    }

    /// Wrap a stream factory.
    pub fn generator<F, S>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Vec<Record>>> + Send + 'static,
    {
        RecordSource::Generator(Arc::new(move |_| factory().boxed()))
    }

    /// Wrap an iterator factory; records are pulled lazily and grouped
    /// into chunks of the pipeline's chunk size.
    pub fn lazy<F, I>(factory: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Record>,
        I::IntoIter: Send + 'static,
    {
        RecordSource::Generator(Arc::new(move |chunk_size: usize| -> RecordStream {
            stream::iter(factory())
                .chunks(chunk_size.max(1))
                .map(Ok)
                .boxed()
        }))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RecordSource::Records(_) => "records",
            RecordSource::Generator(_) => "generator",
            RecordSource::Http(_) => "http",
            RecordSource::SqlTable(_) => "sql_table",
            RecordSource::Filesystem(_) => "filesystem",
            RecordSource::FileReader(_) => "file_reader",
        }
    }

    /// Open the source for one run.
    pub async fn open(&self, ctx: &ExtractContext) -> Result<RecordStream> {
        match self {
            RecordSource::Records(records) => {
                let records = Arc::clone(records);
                let chunk_size = ctx.chunk_size.max(1);
                let total = records.len();
                Ok(stream::iter((0..total).step_by(chunk_size))
                    .map(move |start| Ok(records[start..(start + chunk_size).min(total)].to_vec()))
                    .boxed())
            },
            RecordSource::Generator(factory) => Ok(factory(ctx.chunk_size)),
            RecordSource::Http(source) => source.open(ctx),
            RecordSource::SqlTable(source) => source.open(ctx).await,
            RecordSource::Filesystem(source) => source.open(ctx).await,
            RecordSource::FileReader(reader) => reader.open(ctx).await,
        }
    }
}

impl fmt::Debug for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSource::Records(records) => {
                f.debug_tuple("Records").field(&records.len()).finish()
            },
            RecordSource::Generator(_) => f.write_str("Generator"),
            RecordSource::Http(source) => source.fmt(f),
            RecordSource::SqlTable(source) => source.fmt(f),
            RecordSource::Filesystem(source) => source.fmt(f),
            RecordSource::FileReader(reader) => reader.fmt(f),
        }
    }
}

impl From<Vec<Record>> for RecordSource {
    fn from(records: Vec<Record>) -> Self {
        RecordSource::records(records)
    }
}
