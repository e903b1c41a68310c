//! Resources
//!
//! A resource pairs a [`RecordSource`] with loading metadata: the table it
//! fills, its primary key, its write disposition and an optional
//! incremental cursor.

use crate::incremental::Incremental;
use crate::sources::RecordSource;
use serde::{Deserialize, Serialize};
use sluice_common::{Record, WriteDisposition};

/// Loading metadata of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Unique name within a source; also the default table name
    pub name: String,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Falls back to the source default, then to append
    #[serde(default)]
    pub write_disposition: Option<WriteDisposition>,
    #[serde(default)]
    pub incremental: Option<Incremental>,
}

impl ResourceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            primary_key: Vec::new(),
            write_disposition: None,
            incremental: None,
        }
    }

    pub fn table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn write_disposition(mut self, disposition: WriteDisposition) -> Self {
        self.write_disposition = Some(disposition);
        self
    }

    pub fn incremental(mut self, incremental: Incremental) -> Self {
        self.incremental = Some(incremental);
        self
    }

    /// Table the resource loads into
    pub fn table(&self) -> &str {
        self.table_name.as_deref().unwrap_or(&self.name)
    }
}

/// A named stream of records mapped to one table
#[derive(Debug, Clone)]
pub struct Resource {
    pub config: ResourceConfig,
    pub source: RecordSource,
}

impl Resource {
    pub fn new(config: ResourceConfig, source: impl Into<RecordSource>) -> Self {
        Self {
            config,
            source: source.into(),
        }
    }

    /// Resource over in-memory records
    pub fn from_records(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self::new(ResourceConfig::new(name), RecordSource::records(records))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Adjust the metadata after construction.
    ///
    /// ```rust
    /// use sluice_common::WriteDisposition;
    /// use sluice_ingest::resource::Resource;
    ///
    /// let users = Resource::from_records("users", vec![])
    ///     .apply_hints(|c| c.primary_key(["id"]).write_disposition(WriteDisposition::Merge));
    /// assert_eq!(users.config.primary_key, vec!["id"]);
    /// ```
    pub fn apply_hints(mut self, hints: impl FnOnce(ResourceConfig) -> ResourceConfig) -> Self {
        self.config = hints(self.config);
        self
    }
}

/// Build one resource per identifier at run time.
///
/// Used when the set of endpoints or tables is only known when the source
/// is constructed.
pub fn dynamic_resources<I, S, F>(ids: I, mut factory: F) -> Vec<Resource>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
    F: FnMut(&str) -> Resource,
{
    ids.into_iter().map(|id| factory(id.as_ref())).collect()
}
