//! Record normalization and schema inference
//!
//! Records are flattened before loading: nested objects become
//! `parent__child` columns, arrays are kept whole and stored as JSON, and
//! every name is normalized to snake_case. Column types are inferred from
//! the values seen and may only grow additively.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_common::naming::{nested_identifier, normalize_identifier};
use sluice_common::{ColumnType, Record};
use tracing::warn;

/// Column added to every data row, holding the id of the load that wrote it
pub const LOAD_ID_COLUMN: &str = "_sluice_load_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered columns of one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Extend the schema with the columns of normalized records.
    ///
    /// Integers and floats unify to double, including an existing bigint
    /// column that starts receiving floats. Any other change of type is a
    /// conflict and leaves the schema untouched.
    pub fn extend_with(&mut self, table: &str, records: &[Record]) -> Result<SchemaDelta> {
        let mut delta = SchemaDelta::default();

        for record in records {
            for (name, value) in record {
                let Some(incoming) = ColumnType::infer(value) else {
                    continue;
                };

                if let Some(existing) = self.get(name) {
                    let current = delta
                        .widened
                        .iter()
                        .find(|c| &c.name == name)
                        .map_or(existing.data_type, |c| c.data_type);
                    if current.accepts(incoming) {
                        continue;
                    }
                    let unified = unify(current, incoming).ok_or_else(|| {
                        IngestError::schema_conflict(table, name, current, incoming)
                    })?;
                    delta.widened.push(Column::new(name.clone(), unified));
                } else if let Some(pending) = delta.added.iter_mut().find(|c| &c.name == name) {
                    let current = pending.data_type;
                    pending.data_type = unify(current, incoming).ok_or_else(|| {
                        IngestError::schema_conflict(table, name, current, incoming)
                    })?;
                } else {
                    delta.added.push(Column::new(name.clone(), incoming));
                }
            }
        }

        for widened in &delta.widened {
            if let Some(column) = self.columns.iter_mut().find(|c| c.name == widened.name) {
                column.data_type = widened.data_type;
            }
        }
        self.columns.extend(delta.added.iter().cloned());
        Ok(delta)
    }
}

/// Columns changed by [`TableSchema::extend_with`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDelta {
    pub added: Vec<Column>,
    /// Existing bigint columns now typed double
    pub widened: Vec<Column>,
}

impl SchemaDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.widened.is_empty()
    }
}

fn unify(current: ColumnType, incoming: ColumnType) -> Option<ColumnType> {
    match (current, incoming) {
        (a, b) if a == b => Some(a),
        (ColumnType::Bigint, ColumnType::Double) | (ColumnType::Double, ColumnType::Bigint) => {
            Some(ColumnType::Double)
        },
        _ => None,
    }
}

/// Flatten a record and normalize its field names.
pub fn normalize_record(record: Record) -> Result<Record> {
    let mut out = Record::new();
    flatten_into(&mut out, None, record)?;
    Ok(out)
}

fn flatten_into(out: &mut Record, parent: Option<&str>, record: Record) -> Result<()> {
    for (key, value) in record {
        let name = match parent {
            Some(parent) => nested_identifier(parent, &key)?,
            None => normalize_identifier(&key)?,
        };

        match value {
            Value::Object(nested) => flatten_into(out, Some(&name), nested)?,
            other => {
                if out.contains_key(&name) {
                    warn!(
                        column = %name,
                        key = %key,
                        "Field name collides with an earlier field, keeping the later value"
                    );
                }
                out.insert(name, other);
            },
        }
    }
    Ok(())
}
