//! SQLite-backed warehouse
//!
//! Each dataset is a database file attached to one connection under the
//! dataset name (`{data_dir}/{dataset}.db`, or a private in-memory database).
//! Partitioning is emulated with a per-day expression index on the partition
//! column and recorded in the main database's `archive_partitions` catalog.

use crate::app::ports::{Row, Warehouse};
use crate::error::{ArchiveError, Result};
use crate::pipeline::schema::{FieldMode, FieldSchema, FieldType};
use crate::pipeline::sql::{quote_ident, validate_identifier};
use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde_json::{Number, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Statements run on the blocking pool; the connection is shared behind a mutex.
pub struct SqliteWarehouse {
    conn: Arc<Mutex<Connection>>,
    data_dir: Option<PathBuf>,
}

impl SqliteWarehouse {
    /// Open a warehouse persisted under `data_dir`
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        let conn = Connection::open(data_dir.join("catalog.db"))?;
        Self::init(conn, Some(data_dir))
    }

    /// Warehouse whose datasets live only as long as this value
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, data_dir: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS archive_partitions (
                dataset     TEXT NOT NULL,
                table_name  TEXT NOT NULL,
                field       TEXT NOT NULL,
                granularity TEXT NOT NULL,
                PRIMARY KEY (dataset, table_name)
            );
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            data_dir,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ArchiveError::Warehouse("sqlite connection lock poisoned".to_string()))
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| {
                ArchiveError::Warehouse("sqlite connection lock poisoned".to_string())
            })?;
            f(&mut guard)
        })
        .await
        .map_err(|e| ArchiveError::Warehouse(format!("sqlite task failed: {}", e)))?
    }

    fn dataset_file(&self, dataset: &str) -> String {
        match &self.data_dir {
            Some(dir) => dir.join(format!("{}.db", dataset)).to_string_lossy().into_owned(),
            None => ":memory:".to_string(),
        }
    }

    fn attach(conn: &Connection, dataset: &str, file: &str) -> Result<()> {
        let sql = format!("ATTACH DATABASE ?1 AS {}", quote_ident(dataset)?);
        conn.execute(&sql, params![file])?;
        Ok(())
    }

    fn is_attached(conn: &Connection, dataset: &str) -> Result<bool> {
        let mut stmt = conn.prepare("PRAGMA database_list")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names.iter().any(|n| n == dataset))
    }

    /// Partition column recorded when the table was created
    pub fn partition_field(&self, dataset: &str, table: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT field FROM archive_partitions WHERE dataset = ?1 AND table_name = ?2",
        )?;
        let mut rows = stmt.query(params![dataset, table])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

fn column_type(field: &FieldSchema) -> &'static str {
    if field.mode == Some(FieldMode::Repeated) {
        return "TEXT";
    }
    match field.field_type {
        FieldType::String | FieldType::Timestamp | FieldType::Json => "TEXT",
        FieldType::Integer | FieldType::Boolean => "INTEGER",
        FieldType::Float => "REAL",
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        validate_identifier(dataset)?;
        let dataset = dataset.to_string();
        // A dataset file left by an earlier process counts as existing
        let leftover = self
            .data_dir
            .as_ref()
            .filter(|dir| dir.join(format!("{}.db", dataset)).exists())
            .map(|_| self.dataset_file(&dataset));
        self.with_conn(move |conn| {
            if Self::is_attached(conn, &dataset)? {
                return Ok(true);
            }
            match leftover {
                Some(file) => {
                    Self::attach(conn, &dataset, &file)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
        .await
    }

    async fn create_dataset(&self, dataset: &str) -> Result<()> {
        validate_identifier(dataset)?;
        let dataset = dataset.to_string();
        let file = self.dataset_file(&dataset);
        self.with_conn(move |conn| {
            if Self::is_attached(conn, &dataset)? {
                return Ok(());
            }
            Self::attach(conn, &dataset, &file)?;
            info!("Created dataset {}", dataset);
            Ok(())
        })
        .await
    }

    async fn table_exists(&self, dataset: &str, table: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
            quote_ident(dataset)?
        );
        let table = table.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(&sql, params![table], |row| row.get(0))?;
            Ok(count > 0)
        })
        .await
    }

    async fn create_table(
        &self,
        dataset: &str,
        table: &str,
        schema: &[FieldSchema],
        partition_field: Option<&str>,
    ) -> Result<()> {
        let columns = schema
            .iter()
            .map(|field| {
                let not_null = if field.is_required() { " NOT NULL" } else { "" };
                Ok(format!("{} {}{}", quote_ident(&field.name)?, column_type(field), not_null))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {}.{} ({});",
            quote_ident(dataset)?,
            quote_ident(table)?,
            columns.join(", ")
        );
        if let Some(field) = partition_field {
            if !schema.iter().any(|f| f.name == field) {
                return Err(ArchiveError::Warehouse(format!(
                    "partition field '{}' is not a column of {}",
                    field, table
                )));
            }
            let index = format!("{}_{}_day", table, field);
            ddl.push_str(&format!(
                "\nCREATE INDEX IF NOT EXISTS {}.{} ON {} (substr({}, 1, 10));",
                quote_ident(dataset)?,
                quote_ident(&index)?,
                quote_ident(table)?,
                quote_ident(field)?
            ));
        }

        let catalog_entry = partition_field
            .map(|field| (dataset.to_string(), table.to_string(), field.to_string()));
        self.with_conn(move |conn| {
            conn.execute_batch(&ddl)?;
            if let Some((dataset, table, field)) = catalog_entry {
                conn.execute(
                    "INSERT OR REPLACE INTO archive_partitions (dataset, table_name, field, granularity) VALUES (?1, ?2, ?3, 'DAY')",
                    params![dataset, table, field],
                )?;
            }
            debug!("sqlite DDL: {}", ddl);
            Ok(())
        })
        .await
    }

    async fn table_columns(&self, dataset: &str, table: &str) -> Result<Vec<String>> {
        let sql = format!(
            "PRAGMA {}.table_info({})",
            quote_ident(dataset)?,
            quote_ident(table)?
        );
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(columns)
        })
        .await
    }

    async fn run_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        let bound: Vec<SqlValue> = params.iter().map(to_sql).collect();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            if stmt.column_count() == 0 {
                let changed = stmt.execute(params_from_iter(bound))?;
                debug!("sqlite statement changed {} rows", changed);
                return Ok(Vec::new());
            }

            let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
            let mut rows = stmt.query(params_from_iter(bound))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Row::new();
                for (i, name) in names.iter().enumerate() {
                    record.insert(name.clone(), from_sql(row.get_ref(i)?));
                }
                out.push(record);
            }
            Ok(out)
        })
        .await
    }

    async fn insert_batch(&self, dataset: &str, table: &str, rows: &[Row]) -> Result<()> {
        let Some(first) = rows.first() else {
            return Ok(());
        };
        let columns: Vec<String> = first.keys().cloned().collect();
        let quoted = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?;
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {}.{} ({}) VALUES ({})",
            quote_ident(dataset)?,
            quote_ident(table)?,
            quoted.join(", "),
            placeholders
        );
        let values: Vec<Vec<SqlValue>> = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c.as_str()).map(to_sql).unwrap_or(SqlValue::Null))
                    .collect()
            })
            .collect();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for row in values {
                    stmt.execute(params_from_iter(row))?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn create_view(&self, dataset: &str, view: &str, select_sql: &str) -> Result<()> {
        let sql = format!(
            "CREATE VIEW IF NOT EXISTS {}.{} AS {}",
            quote_ident(dataset)?,
            quote_ident(view)?,
            select_sql
        );
        self.with_conn(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    fn qualified_table(&self, dataset: &str, table: &str) -> String {
        format!("\"{}\".\"{}\"", dataset, table)
    }

    /// Views in an attached database may only reference their own schema, unqualified
    fn view_source(&self, _dataset: &str, table: &str) -> String {
        format!("\"{}\"", table)
    }
}
