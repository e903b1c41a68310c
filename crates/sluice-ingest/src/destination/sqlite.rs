//! SQLite destination
//!
//! Data tables live next to the system tables in one database file per
//! pipeline.

use super::{Destination, LoadCommit, LoadTarget};
use crate::error::Result;
use crate::normalize::{Column, TableSchema, LOAD_ID_COLUMN};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sluice_common::naming::{quote_identifier, SYSTEM_PREFIX};
use sluice_common::{ColumnType, Record, WriteDisposition};
use sqlx::query_builder::Separated;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Bind parameters per statement; the SQLite default before 3.32
const MAX_BIND_PARAMS: usize = 999;

/// SQLite-backed destination
#[derive(Debug, Clone)]
pub struct SqliteDestination {
    pool: SqlitePool,
    location: String,
}

impl SqliteDestination {
    /// Open (creating if missing) the database file at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            location: path.display().to_string(),
        })
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single connection that never recycles keeps the database alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            location: ":memory:".to_string(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<Column>> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_identifier(table)))
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| {
            let name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            Ok(Column::new(name, ColumnType::from_sql_type(&declared)))
        })
        .collect()
}

fn column_definitions(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| format!("{} {}", quote_identifier(&c.name), c.data_type.sql_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_list(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_widened(existing: &[Column], column: &Column) -> bool {
    column.data_type == ColumnType::Double
        && existing
            .iter()
            .any(|e| e.name == column.name && e.data_type == ColumnType::Bigint)
}

/// Recreate a table with bigint columns retyped as double.
///
/// SQLite cannot change a column type in place, so rows are copied into a
/// new table which then takes over the original name.
async fn rebuild_widened(
    conn: &mut SqliteConnection,
    table: &str,
    existing: &[Column],
    schema: &TableSchema,
) -> Result<()> {
    let columns: Vec<Column> = existing
        .iter()
        .map(|e| match schema.get(&e.name) {
            Some(column) if is_widened(existing, column) => column.clone(),
            _ => e.clone(),
        })
        .collect();
    let rebuilt = format!("{}_rebuild__{}", SYSTEM_PREFIX, table);
    let list = column_list(existing);

    for statement in [
        format!("DROP TABLE IF EXISTS {}", quote_identifier(&rebuilt)),
        format!(
            "CREATE TABLE {} ({})",
            quote_identifier(&rebuilt),
            column_definitions(&columns)
        ),
        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            quote_identifier(&rebuilt),
            list,
            list,
            quote_identifier(table)
        ),
        format!("DROP TABLE {}", quote_identifier(table)),
        format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_identifier(&rebuilt),
            quote_identifier(table)
        ),
    ] {
        sqlx::query(&statement).execute(&mut *conn).await?;
    }

    info!(table = %table, "Widened integer columns to double");
    Ok(())
}

fn push_value(row: &mut Separated<'_, '_, Sqlite, &'static str>, column: &Column, value: Option<&Value>) {
    let value = value.filter(|v| !v.is_null());
    match column.data_type {
        ColumnType::Bigint => row.push_bind(value.and_then(Value::as_i64)),
        ColumnType::Double => row.push_bind(value.and_then(Value::as_f64)),
        ColumnType::Bool => row.push_bind(value.and_then(Value::as_bool)),
        ColumnType::Text => row.push_bind(value.and_then(Value::as_str).map(str::to_string)),
        ColumnType::Json => row.push_bind(value.map(Value::to_string)),
    };
}

#[async_trait]
impl Destination for SqliteDestination {
    fn describe(&self) -> String {
        format!("sqlite ({})", self.location)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn table_schema(&self, table: &str) -> Result<Option<TableSchema>> {
        let mut conn = self.pool.acquire().await?;
        let columns = table_columns(&mut conn, table).await?;
        Ok((!columns.is_empty()).then(|| TableSchema::new(columns)))
    }

    async fn resource_state(
        &self,
        pipeline_name: &str,
        resource_name: &str,
    ) -> Result<Option<Record>> {
        let state: Option<String> = sqlx::query_scalar(
            r#"
            SELECT state FROM _sluice_pipeline_state
            WHERE pipeline_name = ?1 AND resource_name = ?2
            "#,
        )
        .bind(pipeline_name)
        .bind(resource_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn begin_load(&self, target: &LoadTarget) -> Result<()> {
        let staging = quote_identifier(&target.staging_table);
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", staging))
            .execute(&self.pool)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE {} ({} TEXT)",
            staging,
            quote_identifier(LOAD_ID_COLUMN)
        ))
        .execute(&self.pool)
        .await?;

        debug!(table = %target.table_name, staging = %target.staging_table, "Staging table created");
        Ok(())
    }

    async fn add_columns(&self, target: &LoadTarget, columns: &[Column]) -> Result<()> {
        for column in columns {
            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_identifier(&target.staging_table),
                quote_identifier(&column.name),
                column.data_type.sql_type()
            ))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn write_batch(
        &self,
        target: &LoadTarget,
        columns: &[Column],
        rows: &[Record],
    ) -> Result<u64> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);
        let insert = format!(
            "INSERT INTO {} ({}) ",
            quote_identifier(&target.staging_table),
            column_list(columns)
        );

        let mut written = 0;
        for chunk in rows.chunks(rows_per_statement) {
            let mut builder = QueryBuilder::<Sqlite>::new(&insert);
            builder.push_values(chunk, |mut row, record| {
                for column in columns {
                    push_value(&mut row, column, record.get(&column.name));
                }
            });
            written += builder.build().execute(&self.pool).await?.rows_affected();
        }

        Ok(written)
    }

    async fn commit_load(&self, target: &LoadTarget, commit: &LoadCommit) -> Result<i64> {
        let table = quote_identifier(&target.table_name);
        let staging = quote_identifier(&target.staging_table);
        let mut tx = self.pool.begin().await?;

        let staged = table_columns(&mut tx, &target.staging_table).await?;
        let existing = table_columns(&mut tx, &target.table_name).await?;

        if existing.is_empty() {
            let mut columns = commit.schema.columns.clone();
            if !columns.iter().any(|c| c.name == LOAD_ID_COLUMN) {
                columns.push(Column::new(LOAD_ID_COLUMN, ColumnType::Text));
            }
            sqlx::query(&format!("CREATE TABLE {} ({})", table, column_definitions(&columns)))
                .execute(&mut *tx)
                .await?;
        } else {
            if commit.schema.columns.iter().any(|c| is_widened(&existing, c)) {
                rebuild_widened(&mut tx, &target.table_name, &existing, &commit.schema).await?;
            }
            for column in &commit.schema.columns {
                if !existing.iter().any(|c| c.name == column.name) {
                    sqlx::query(&format!(
                        "ALTER TABLE {} ADD COLUMN {} {}",
                        table,
                        quote_identifier(&column.name),
                        column.data_type.sql_type()
                    ))
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        match commit.write_disposition {
            WriteDisposition::Replace => {
                sqlx::query(&format!("DELETE FROM {}", table))
                    .execute(&mut *tx)
                    .await?;
            },
            WriteDisposition::Merge if !commit.primary_key.is_empty() && commit.rows > 0 => {
                let key = commit
                    .primary_key
                    .iter()
                    .map(|c| quote_identifier(c))
                    .collect::<Vec<_>>();

                // Last occurrence of a key within the load wins
                sqlx::query(&format!(
                    "DELETE FROM {staging} WHERE rowid NOT IN \
                     (SELECT MAX(rowid) FROM {staging} GROUP BY {key})",
                    staging = staging,
                    key = key.join(", ")
                ))
                .execute(&mut *tx)
                .await?;

                let matches = key
                    .iter()
                    .map(|c| format!("s.{c} IS {table}.{c}", c = c, table = table))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let replaced = sqlx::query(&format!(
                    "DELETE FROM {table} WHERE EXISTS (SELECT 1 FROM {staging} s WHERE {matches})",
                    table = table,
                    staging = staging,
                    matches = matches
                ))
                .execute(&mut *tx)
                .await?
                .rows_affected();

                debug!(table = %target.table_name, replaced, "Merged rows by primary key");
            },
            WriteDisposition::Merge | WriteDisposition::Append => {},
        }

        let staged_list = column_list(&staged);
        sqlx::query(&format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            table, staged_list, staged_list, staging
        ))
        .execute(&mut *tx)
        .await?;

        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO _sluice_pipeline_state (pipeline_name, resource_name, state, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(pipeline_name, resource_name) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&target.pipeline_name)
        .bind(&commit.resource_name)
        .bind(serde_json::to_string(&commit.state)?)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let schema_version: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO _sluice_table_schemas (pipeline_name, table_name, version, columns, updated_at)
            VALUES (?1, ?2, 1, ?3, ?4)
            ON CONFLICT(pipeline_name, table_name) DO UPDATE SET
                version = CASE
                    WHEN _sluice_table_schemas.columns = excluded.columns
                        THEN _sluice_table_schemas.version
                    ELSE _sluice_table_schemas.version + 1
                END,
                columns = excluded.columns,
                updated_at = excluded.updated_at
            RETURNING version
            "#,
        )
        .bind(&target.pipeline_name)
        .bind(&target.table_name)
        .bind(serde_json::to_string(&commit.schema.columns)?)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO _sluice_loads (
                load_id, pipeline_name, dataset_name, resource_name, table_name,
                write_disposition, row_count, schema_version, started_at, finished_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&target.load_id)
        .bind(&target.pipeline_name)
        .bind(&commit.dataset_name)
        .bind(&commit.resource_name)
        .bind(&target.table_name)
        .bind(commit.write_disposition.as_str())
        .bind(commit.rows as i64)
        .bind(schema_version)
        .bind(commit.started_at.to_rfc3339())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!("DROP TABLE {}", staging))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            table = %target.table_name,
            disposition = %commit.write_disposition,
            rows = commit.rows,
            schema_version,
            "Load committed"
        );
        Ok(schema_version)
    }

    async fn abort_load(&self, target: &LoadTarget) -> Result<()> {
        sqlx::query(&format!(
            "DROP TABLE IF EXISTS {}",
            quote_identifier(&target.staging_table)
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_identifier(table)))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Record> {
        sluice_common::types::records_from_value(value).unwrap()
    }

    fn commit(disposition: WriteDisposition, schema: &TableSchema, rows: u64) -> LoadCommit {
        LoadCommit {
            resource_name: "pokemon".to_string(),
            dataset_name: "test_data".to_string(),
            write_disposition: disposition,
            primary_key: vec!["name".to_string()],
            schema: schema.clone(),
            state: Record::new(),
            rows,
            started_at: Utc::now(),
        }
    }

    async fn load(
        dest: &SqliteDestination,
        load_id: &str,
        disposition: WriteDisposition,
        data: Value,
    ) -> i64 {
        let target = LoadTarget::new("test_pipeline", load_id, "pokemon");
        let mut records = rows(data);
        for record in &mut records {
            record.insert(LOAD_ID_COLUMN.to_string(), json!(load_id));
        }
        let schema = TableSchema::new(vec![
            Column::new("name", ColumnType::Text),
            Column::new("weight", ColumnType::Bigint),
            Column::new(LOAD_ID_COLUMN, ColumnType::Text),
        ]);

        dest.begin_load(&target).await.unwrap();
        dest.add_columns(&target, &schema.columns[..2]).await.unwrap();
        let written = dest
            .write_batch(&target, &schema.columns, &records)
            .await
            .unwrap();
        dest.commit_load(&target, &commit(disposition, &schema, written))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dest = SqliteDestination::in_memory().await.unwrap();
        dest.initialize().await.unwrap();
        dest.initialize().await.unwrap();
        assert!(dest.table_schema("_sluice_loads").await.unwrap().is_some());
        assert!(dest.table_schema("numbers").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_keeps_one_row_per_key() {
        let dest = SqliteDestination::in_memory().await.unwrap();
        dest.initialize().await.unwrap();

        load(&dest, "l1", WriteDisposition::Merge, json!([
            {"name": "bulbasaur", "weight": 69},
            {"name": "ivysaur", "weight": 130}
        ]))
        .await;
        load(&dest, "l2", WriteDisposition::Merge, json!([
            {"name": "ivysaur", "weight": 131},
            {"name": "venusaur", "weight": 1000},
            {"name": "venusaur", "weight": 1001}
        ]))
        .await;

        assert_eq!(dest.row_count("pokemon").await.unwrap(), 3);
        let weight: i64 = sqlx::query_scalar("SELECT weight FROM pokemon WHERE name = 'venusaur'")
            .fetch_one(dest.pool())
            .await
            .unwrap();
        assert_eq!(weight, 1001);
    }

    #[tokio::test]
    async fn test_replace_and_schema_version() {
        let dest = SqliteDestination::in_memory().await.unwrap();
        dest.initialize().await.unwrap();

        let v1 = load(&dest, "l1", WriteDisposition::Append, json!([{"name": "a", "weight": 1}])).await;
        let v2 = load(&dest, "l2", WriteDisposition::Replace, json!([{"name": "b", "weight": 2}])).await;

        assert_eq!(v1, 1);
        assert_eq!(v2, 1);
        assert_eq!(dest.row_count("pokemon").await.unwrap(), 1);

        let loads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sluice_loads")
            .fetch_one(dest.pool())
            .await
            .unwrap();
        assert_eq!(loads, 2);
    }

    #[tokio::test]
    async fn test_abort_leaves_target_untouched() {
        let dest = SqliteDestination::in_memory().await.unwrap();
        dest.initialize().await.unwrap();
        load(&dest, "l1", WriteDisposition::Append, json!([{"name": "a", "weight": 1}])).await;

        let target = LoadTarget::new("test_pipeline", "l2", "pokemon");
        dest.begin_load(&target).await.unwrap();
        dest.abort_load(&target).await.unwrap();

        assert_eq!(dest.row_count("pokemon").await.unwrap(), 1);
        assert!(dest.table_schema(&target.staging_table).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wide_batches_respect_parameter_limit() {
        let dest = SqliteDestination::in_memory().await.unwrap();
        let target = LoadTarget::new("p", "l1", "wide");
        let columns: Vec<Column> = (0..50)
            .map(|i| Column::new(format!("c{}", i), ColumnType::Bigint))
            .collect();
        let records: Vec<Record> = (0..100)
            .map(|r| {
                columns
                    .iter()
                    .map(|c| (c.name.clone(), json!(r)))
                    .collect::<Record>()
            })
            .collect();

        dest.begin_load(&target).await.unwrap();
        dest.add_columns(&target, &columns).await.unwrap();
        let written = dest.write_batch(&target, &columns, &records).await.unwrap();
        assert_eq!(written, 100);
    }

    #[tokio::test]
    async fn test_commit_widens_bigint_column() {
        let dest = SqliteDestination::in_memory().await.unwrap();
        dest.initialize().await.unwrap();
        load(&dest, "l1", WriteDisposition::Append, json!([{"name": "pikachu", "weight": 60}])).await;

        let target = LoadTarget::new("test_pipeline", "l2", "pokemon");
        let schema = TableSchema::new(vec![
            Column::new("name", ColumnType::Text),
            Column::new("weight", ColumnType::Double),
            Column::new(LOAD_ID_COLUMN, ColumnType::Text),
        ]);
        let records = rows(json!([{"name": "raichu", "weight": 30.5, "_sluice_load_id": "l2"}]));
        dest.begin_load(&target).await.unwrap();
        dest.add_columns(&target, &schema.columns[..2]).await.unwrap();
        let written = dest.write_batch(&target, &schema.columns, &records).await.unwrap();
        let version = dest
            .commit_load(&target, &commit(WriteDisposition::Append, &schema, written))
            .await
            .unwrap();

        assert_eq!(version, 2);
        let columns = dest.table_schema("pokemon").await.unwrap().unwrap();
        assert_eq!(columns.get("weight").unwrap().data_type, ColumnType::Double);
        assert!(dest.table_schema("_sluice_rebuild__pokemon").await.unwrap().is_none());

        let total: f64 = sqlx::query_scalar("SELECT SUM(weight) FROM pokemon")
            .fetch_one(dest.pool())
            .await
            .unwrap();
        assert_eq!(total, 90.5);
    }
}
