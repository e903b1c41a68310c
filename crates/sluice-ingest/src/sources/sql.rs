//! SQL database source
//!
//! Reads tables of a SQLite database with keyset paging on `rowid`, and
//! reflects a whole database into a [`Source`] with one resource per table.

use super::{ExtractContext, RecordSource, RecordStream};
use crate::error::Result;
use crate::resource::{Resource, ResourceConfig};
use crate::source::Source;
use futures::stream::{self, StreamExt};
use serde_json::{Number, Value};
use sluice_common::naming::{quote_identifier, SYSTEM_PREFIX};
use sluice_common::Record;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::{debug, info};

/// Alias under which the paging key is selected
const ROWID_ALIAS: &str = "_sluice_rowid";

async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.read_only(true);
    Ok(SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?)
}

/// One table of a SQLite database
#[derive(Debug, Clone)]
pub struct SqlTableSource {
    /// `sqlite:` URL of the database
    pub database_url: String,
    pub table: String,
    /// Rows per page; the pipeline chunk size when unset
    pub chunk_size: Option<usize>,
}

impl SqlTableSource {
    pub fn new(database_url: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            table: table.into(),
            chunk_size: None,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub(crate) async fn open(&self, ctx: &ExtractContext) -> Result<RecordStream> {
        let pool = connect(&self.database_url).await?;
        let query = format!(
            "SELECT rowid AS {alias}, * FROM {table} WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
            alias = ROWID_ALIAS,
            table = quote_identifier(&self.table),
        );
        let page_size = self.chunk_size.unwrap_or(ctx.chunk_size).max(1) as i64;

        info!(table = %self.table, "Reading SQL table");

        let state = PageState {
            pool,
            query,
            page_size,
            after: Some(0),
        };
        Ok(stream::try_unfold(state, fetch_rows).boxed())
    }
}

struct PageState {
    pool: SqlitePool,
    query: String,
    page_size: i64,
    /// Last rowid read; `None` once the table is exhausted
    after: Option<i64>,
}

async fn fetch_rows(mut state: PageState) -> Result<Option<(Vec<Record>, PageState)>> {
    let Some(after) = state.after else {
        state.pool.close().await;
        return Ok(None);
    };

    let rows = sqlx::query(&state.query)
        .bind(after)
        .bind(state.page_size)
        .fetch_all(&state.pool)
        .await?;

    if rows.is_empty() {
        state.pool.close().await;
        return Ok(None);
    }

    let mut last = after;
    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        let (rowid, record) = row_to_record(row)?;
        last = rowid;
        records.push(record);
    }

    debug!(rows = records.len(), after = last, "Fetched SQL page");
    state.after = (records.len() as i64 == state.page_size).then_some(last);
    Ok(Some((records, state)))
}

/// Convert a row into a record by the storage class of each value.
fn row_to_record(row: &SqliteRow) -> Result<(i64, Record)> {
    let mut rowid = 0;
    let mut record = Record::new();

    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" => Number::from_f64(row.try_get_unchecked::<f64, _>(index)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BLOB" => Value::from(
                    String::from_utf8_lossy(&row.try_get_unchecked::<Vec<u8>, _>(index)?)
                        .into_owned(),
                ),
                _ => Value::from(row.try_get_unchecked::<String, _>(index)?),
            }
        };

        if column.name() == ROWID_ALIAS {
            rowid = value.as_i64().unwrap_or_default();
        } else {
            record.insert(column.name().to_string(), value);
        }
    }

    Ok((rowid, record))
}

/// Reflect every user table of a SQLite database into a source.
///
/// Each table becomes a resource of the same name with the declared
/// primary key. Use [`Source::with_resources`] to pick tables.
pub async fn sql_database(database_url: &str) -> Result<Source> {
    let pool = connect(database_url).await?;

    let tables: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT name FROM sqlite_master
        WHERE type = 'table'
          AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
          AND name NOT LIKE '\_sqlx\_%' ESCAPE '\'
          AND name NOT LIKE ?1 ESCAPE '\'
        ORDER BY name
        "#,
    )
    .bind(format!("{}%", SYSTEM_PREFIX.replace('_', "\\_")))
    .fetch_all(&pool)
    .await?;

    let mut resources = Vec::with_capacity(tables.len());
    for table in tables {
        let columns = sqlx::query(&format!("PRAGMA table_info({})", quote_identifier(&table)))
            .fetch_all(&pool)
            .await?;

        let mut key: Vec<(i64, String)> = Vec::new();
        for column in &columns {
            let position: i64 = column.try_get("pk")?;
            if position > 0 {
                key.push((position, column.try_get("name")?));
            }
        }
        key.sort();

        let config = ResourceConfig::new(&table)
            .primary_key(key.into_iter().map(|(_, name)| name).collect::<Vec<_>>());
        let source = SqlTableSource::new(database_url, &table);
        resources.push(Resource::new(config, RecordSource::SqlTable(source)));
    }

    pool.close().await;
    info!(database = %database_url, tables = resources.len(), "Reflected SQL database");

    Source::new("sql_database", resources)
}
