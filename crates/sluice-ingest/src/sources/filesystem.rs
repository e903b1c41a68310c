//! Filesystem listing source
//!
//! Walks a directory and yields one record per file whose relative path
//! matches a glob.

use super::{ExtractContext, RecordStream};
use crate::error::{IngestError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use sluice_common::Record;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Compile a glob into an anchored regex over `/`-separated relative paths.
///
/// `*` and `?` stay within one path segment, `**` crosses segments.
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    let mut chars = glob.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    pattern.push_str("(?:.*/)?");
                } else {
                    pattern.push_str(".*");
                }
            },
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');

    Regex::new(&pattern)
        .map_err(|e| IngestError::config(format!("Invalid file glob '{}': {}", glob, e)))
}

/// One matched file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileItem {
    /// Path relative to the base directory, `/`-separated
    pub file_name: String,
    pub file_url: String,
    /// RFC 3339 UTC with microseconds; fixed width so it orders lexically
    pub modification_date: String,
    pub size_in_bytes: u64,
    #[serde(skip)]
    pub path: PathBuf,
}

impl FileItem {
    fn from_path(base_dir: &Path, path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let modified: DateTime<Utc> = metadata.modified()?.into();
        let relative = path.strip_prefix(base_dir).unwrap_or(path);
        let absolute = std::fs::canonicalize(path)?;

        Ok(Self {
            file_name: relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            file_url: format!("file://{}", absolute.to_string_lossy()),
            modification_date: modified.to_rfc3339_opts(SecondsFormat::Micros, true),
            size_in_bytes: metadata.len(),
            path: path.to_path_buf(),
        })
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("file_name".to_string(), Value::from(self.file_name.clone()));
        record.insert("file_url".to_string(), Value::from(self.file_url.clone()));
        record.insert(
            "modification_date".to_string(),
            Value::from(self.modification_date.clone()),
        );
        record.insert("size_in_bytes".to_string(), Value::from(self.size_in_bytes));
        record
    }
}

/// Files below `base_dir` matching `file_glob`
#[derive(Debug, Clone)]
pub struct FilesystemSource {
    pub base_dir: PathBuf,
    pub file_glob: String,
}

impl FilesystemSource {
    pub fn new(base_dir: impl Into<PathBuf>, file_glob: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            file_glob: file_glob.into(),
        }
    }

    /// List matching files, sorted by relative path.
    pub async fn list(&self) -> Result<Vec<FileItem>> {
        let base_dir = self.base_dir.clone();
        let matcher = glob_to_regex(&self.file_glob)?;

        tokio::task::spawn_blocking(move || list_blocking(&base_dir, &matcher))
            .await
            .map_err(|e| IngestError::Other(e.into()))?
    }

    pub(crate) async fn open(&self, ctx: &ExtractContext) -> Result<RecordStream> {
        let records: Vec<Record> = self.list().await?.iter().map(FileItem::to_record).collect();
        let chunk_size = ctx.chunk_size.max(1);
        let chunks: Vec<Result<Vec<Record>>> =
            records.chunks(chunk_size).map(|c| Ok(c.to_vec())).collect();
        Ok(stream::iter(chunks).boxed())
    }
}

fn list_blocking(base_dir: &Path, matcher: &Regex) -> Result<Vec<FileItem>> {
    if !base_dir.is_dir() {
        return Err(IngestError::config(format!(
            "Directory '{}' does not exist",
            base_dir.display()
        )));
    }

    let mut items = Vec::new();
    for entry in WalkDir::new(base_dir).follow_links(true) {
        let entry = entry.map_err(|e| IngestError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let item = FileItem::from_path(base_dir, entry.path())?;
        if matcher.is_match(&item.file_name) {
            items.push(item);
        }
    }
    items.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    debug!(base_dir = %base_dir.display(), files = items.len(), "Listed files");
    Ok(items)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("encounters*.csv").unwrap();
        assert!(re.is_match("encounters.csv"));
        assert!(re.is_match("encounters_2024.csv"));
        assert!(!re.is_match("sub/encounters.csv"));
        assert!(!re.is_match("patients.csv"));

        let deep = glob_to_regex("**/*.jsonl").unwrap();
        assert!(deep.is_match("a.jsonl"));
        assert!(deep.is_match("x/y/a.jsonl"));

        let single = glob_to_regex("file?.csv").unwrap();
        assert!(single.is_match("file1.csv"));
        assert!(!single.is_match("file10.csv"));
    }

    #[tokio::test]
    async fn test_list_matches_and_describes_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("encounters_a.csv"), "id\n1\n").unwrap();
        std::fs::write(dir.path().join("encounters_b.csv"), "id\n2\n3\n").unwrap();
        std::fs::write(dir.path().join("patients.csv"), "id\n").unwrap();

        let source = FilesystemSource::new(dir.path(), "encounters*.csv");
        let items = source.list().await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].file_name, "encounters_a.csv");
        assert_eq!(items[1].size_in_bytes, 7);
        assert!(items[0].file_url.starts_with("file://"));
        // 2026-01-18T10:00:00.123456Z
        assert_eq!(items[0].modification_date.len(), 27);
        assert!(items[0].modification_date.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_open_yields_file_records() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("one.csv"), "id\n1\n").unwrap();

        let source = FilesystemSource::new(dir.path(), "*.csv");
        let chunks: Vec<Vec<Record>> = source
            .open(&ExtractContext::default())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        let records = chunks.concat();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["file_name"], Value::from("one.csv"));
        assert!(records[0].contains_key("modification_date"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let source = FilesystemSource::new("/definitely/not/here", "*.csv");
        assert!(source.list().await.is_err());
    }
}
