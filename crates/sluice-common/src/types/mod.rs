//! Common types used across Sluice

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SluiceError};

/// A single structured record: field name to scalar or nested value.
///
/// Field order is the order in which fields were first inserted, which is
/// also the order in which new columns are created in the destination.
pub type Record = serde_json::Map<String, Value>;

/// Convert a JSON value into records.
///
/// Arrays yield one record per element and objects yield a single record.
/// Any other value (or an array element that is not an object) is rejected.
///
/// # Examples
///
/// ```rust
/// use sluice_common::types::records_from_value;
///
/// let records = records_from_value(serde_json::json!([{"id": 1}, {"id": 2}])).unwrap();
/// assert_eq!(records.len(), 2);
/// ```
pub fn records_from_value(value: Value) -> Result<Vec<Record>> {
    match value {
        Value::Array(items) => items.into_iter().map(record_from_value).collect(),
        other => Ok(vec![record_from_value(other)?]),
    }
}

/// Convert a single JSON object into a record.
pub fn record_from_value(value: Value) -> Result<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(SluiceError::NotARecord(json_kind(&other).to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Write Disposition
// ============================================================================

/// How the records of one run combine with the existing table content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteDisposition {
    /// Add every record of the run to the table
    #[default]
    Append,
    /// Discard the table content and replace it with the run's records
    Replace,
    /// Upsert records against existing rows keyed by the primary key
    Merge,
}

impl WriteDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteDisposition::Append => "append",
            WriteDisposition::Replace => "replace",
            WriteDisposition::Merge => "merge",
        }
    }
}

impl std::str::FromStr for WriteDisposition {
    type Err = SluiceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(WriteDisposition::Append),
            "replace" => Ok(WriteDisposition::Replace),
            "merge" => Ok(WriteDisposition::Merge),
            _ => Err(SluiceError::InvalidWriteDisposition(s.to_string())),
        }
    }
}

impl std::fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Column Types
// ============================================================================

/// Destination column type inferred from record values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Bigint,
    Double,
    Bool,
    Text,
    /// Arrays and other nested values that are stored as JSON text
    Json,
}

impl ColumnType {
    /// Infer the column type of a value. Nulls carry no type information.
    pub fn infer(value: &Value) -> Option<ColumnType> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Number(n) if n.is_i64() => Some(ColumnType::Bigint),
            Value::Number(_) => Some(ColumnType::Double),
            Value::String(_) => Some(ColumnType::Text),
            Value::Array(_) | Value::Object(_) => Some(ColumnType::Json),
        }
    }

    /// Whether a column of this type can store values inferred as `incoming`
    /// without changing meaning. Integers widen into doubles; nothing else
    /// is coerced.
    pub fn accepts(self, incoming: ColumnType) -> bool {
        self == incoming || (self == ColumnType::Double && incoming == ColumnType::Bigint)
    }

    /// Declared SQL type used when creating the column
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Bigint => "BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Text => "TEXT",
            ColumnType::Json => "JSON",
        }
    }

    /// Map a declared SQL type back to a column type. Unknown declarations
    /// are treated as text.
    pub fn from_sql_type(declared: &str) -> ColumnType {
        match declared.trim().to_uppercase().as_str() {
            "BIGINT" | "INTEGER" | "INT" | "SMALLINT" | "TINYINT" => ColumnType::Bigint,
            "DOUBLE" | "REAL" | "FLOAT" | "NUMERIC" | "DECIMAL" => ColumnType::Double,
            "BOOLEAN" | "BOOL" => ColumnType::Bool,
            "JSON" => ColumnType::Json,
            _ => ColumnType::Text,
        }
    }
}

impl std::str::FromStr for ColumnType {
    type Err = SluiceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bigint" => Ok(ColumnType::Bigint),
            "double" => Ok(ColumnType::Double),
            "bool" => Ok(ColumnType::Bool),
            "text" => Ok(ColumnType::Text),
            "json" => Ok(ColumnType::Json),
            _ => Err(SluiceError::InvalidColumnType(s.to_string())),
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Bigint => write!(f, "bigint"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Bool => write!(f, "bool"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Json => write!(f, "json"),
        }
    }
}
