//! Reads the rows of listed files
//!
//! Takes a [`FilesystemSource`] listing and streams the rows of every
//! matched CSV or JSON Lines file (optionally gzip-compressed) in chunks.
//! Parsing runs on a blocking thread; a bounded channel keeps at most a
//! couple of chunks in flight.

use super::filesystem::{FileItem, FilesystemSource};
use super::{ExtractContext, RecordStream};
use crate::error::{IngestError, Result};
use crate::incremental::Incremental;
use flate2::read::GzDecoder;
use futures::stream::{self, StreamExt};
use serde_json::{Number, Value};
use serde_jsonlines::JsonLinesReader;
use sluice_common::types::record_from_value;
use sluice_common::Record;
use std::fs::File;
use std::io::{BufReader, Read};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Scope under which the file-level cursor is persisted
pub const FILES_CURSOR_SCOPE: &str = "files";

/// Chunks buffered between the parser thread and the pipeline
const CHANNEL_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    /// Decide by extension: `.csv`, `.jsonl`/`.ndjson`, each optionally `.gz`
    #[default]
    Auto,
    Csv,
    JsonLines,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parser {
    Csv,
    JsonLines,
}

impl FileFormat {
    fn resolve(self, file_name: &str) -> Result<Parser> {
        let name = file_name.to_lowercase();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        match self {
            FileFormat::Csv => return Ok(Parser::Csv),
            FileFormat::JsonLines => return Ok(Parser::JsonLines),
            FileFormat::Auto => {},
        }
        if name.ends_with(".csv") {
            Ok(Parser::Csv)
        } else if name.ends_with(".jsonl") || name.ends_with(".ndjson") {
            Ok(Parser::JsonLines)
        } else {
            Err(IngestError::config(format!(
                "Cannot tell the format of '{}'; set it explicitly",
                file_name
            )))
        }
    }
}

/// Transformer from a file listing to file rows
#[derive(Debug, Clone)]
pub struct FileReader {
    pub files: FilesystemSource,
    pub format: FileFormat,
    /// Rows per chunk; the pipeline chunk size when unset
    pub chunk_size: Option<usize>,
    /// Only read files whose listing record passes this cursor
    pub file_incremental: Option<Incremental>,
    /// Column receiving the source file name
    pub file_name_column: Option<String>,
    /// Column receiving a generated UUID per row
    pub row_id_column: Option<String>,
}

impl FileReader {
    pub fn new(files: FilesystemSource) -> Self {
        Self {
            files,
            format: FileFormat::Auto,
            chunk_size: None,
            file_incremental: None,
            file_name_column: None,
            row_id_column: None,
        }
    }

    pub fn csv(files: FilesystemSource) -> Self {
        Self::new(files).format(FileFormat::Csv)
    }

    pub fn format(mut self, format: FileFormat) -> Self {
        self.format = format;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Skip files already read, typically by `modification_date`.
    pub fn incremental_files(mut self, incremental: Incremental) -> Self {
        self.file_incremental = Some(incremental);
        self
    }

    pub fn with_file_name(mut self, column: impl Into<String>) -> Self {
        self.file_name_column = Some(column.into());
        self
    }

    pub fn with_row_id(mut self, column: impl Into<String>) -> Self {
        self.row_id_column = Some(column.into());
        self
    }

    pub(crate) async fn open(&self, ctx: &ExtractContext) -> Result<RecordStream> {
        let mut items = self.files.list().await?;

        if let Some(incremental) = &self.file_incremental {
            let tracker = ctx.cursors.tracker(FILES_CURSOR_SCOPE, incremental);
            let mut fresh = Vec::with_capacity(items.len());
            for item in items {
                if !tracker.filter(vec![item.to_record()])?.is_empty() {
                    fresh.push(item);
                }
            }
            items = fresh;
        }

        info!(
            base_dir = %self.files.base_dir.display(),
            glob = %self.files.file_glob,
            files = items.len(),
            "Reading files"
        );

        let settings = ReadSettings {
            format: self.format,
            chunk_size: self.chunk_size.unwrap_or(ctx.chunk_size).max(1),
            file_name_column: self.file_name_column.clone(),
            row_id_column: self.row_id_column.clone(),
        };

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::task::spawn_blocking(move || {
            for item in &items {
                match read_file(item, &settings, &tx) {
                    Ok(true) => {},
                    Ok(false) => return,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        return;
                    },
                }
            }
        });

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })
        .boxed())
    }
}

struct ReadSettings {
    format: FileFormat,
    chunk_size: usize,
    file_name_column: Option<String>,
    row_id_column: Option<String>,
}

impl ReadSettings {
    fn decorate(&self, mut record: Record, item: &FileItem) -> Record {
        if let Some(column) = &self.file_name_column {
            record.insert(column.clone(), Value::from(item.file_name.clone()));
        }
        if let Some(column) = &self.row_id_column {
            record.insert(column.clone(), Value::from(Uuid::new_v4().to_string()));
        }
        record
    }
}

type ChunkSender = mpsc::Sender<Result<Vec<Record>>>;

/// Stream one file into the channel. Returns `false` once the receiving
/// side is gone.
fn read_file(item: &FileItem, settings: &ReadSettings, tx: &ChunkSender) -> Result<bool> {
    let parser = settings.format.resolve(&item.file_name)?;
    let file = File::open(&item.path)?;
    let input: Box<dyn Read + Send> = if item.file_name.to_lowercase().ends_with(".gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    debug!(file = %item.file_name, parser = ?parser, "Reading file");

    let rows: Box<dyn Iterator<Item = Result<Record>>> = match parser {
        Parser::Csv => Box::new(csv_rows(input)?),
        Parser::JsonLines => Box::new(json_lines_rows(input)),
    };

    let mut chunk = Vec::with_capacity(settings.chunk_size);
    for row in rows {
        chunk.push(settings.decorate(row?, item));
        if chunk.len() == settings.chunk_size
            && tx.blocking_send(Ok(std::mem::take(&mut chunk))).is_err()
        {
            return Ok(false);
        }
    }
    if !chunk.is_empty() && tx.blocking_send(Ok(chunk)).is_err() {
        return Ok(false);
    }
    Ok(true)
}

fn csv_rows(input: Box<dyn Read + Send>) -> Result<impl Iterator<Item = Result<Record>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input);
    let headers = reader.headers()?.clone();

    Ok(reader.into_records().map(move |row| {
        let row = row?;
        Ok(headers
            .iter()
            .zip(row.iter())
            .map(|(header, cell)| (header.to_string(), parse_cell(cell)))
            .collect())
    }))
}

fn json_lines_rows(input: Box<dyn Read + Send>) -> impl Iterator<Item = Result<Record>> {
    JsonLinesReader::new(BufReader::new(input))
        .read_all::<Value>()
        .map(|line| Ok(record_from_value(line?)?))
}

/// Type a CSV cell: empty is null, then integer, float, boolean, text.
pub fn parse_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = cell.parse::<i64>() {
        return Value::from(int);
    }
    if let Some(float) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(float);
    }
    match cell.to_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::from(cell),
    }
}
