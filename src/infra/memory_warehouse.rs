use crate::app::ports::{Row, Warehouse};
use crate::error::{ArchiveError, Result};
use crate::pipeline::schema::FieldSchema;
use crate::pipeline::sql::validate_identifier;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

static COUNT_QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^SELECT COUNT\(\*\) AS row_count FROM "(\w+)"\."(\w+)"$"#)
        .expect("count pattern is valid")
});

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: Vec<FieldSchema>,
    partition_field: Option<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct Inner {
    datasets: BTreeSet<String>,
    tables: HashMap<(String, String), MemoryTable>,
    views: HashMap<(String, String), String>,
}

/// Warehouse kept in process memory.
///
/// Understands only the row-count statement the sink uses for verification;
/// any other SQL is rejected.
#[derive(Clone, Default)]
pub struct MemoryWarehouse {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows appended to a table so far, in insertion order
    pub async fn rows(&self, dataset: &str, table: &str) -> Vec<Row> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(&(dataset.to_string(), table.to_string()))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub async fn partition_field(&self, dataset: &str, table: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(&(dataset.to_string(), table.to_string()))
            .and_then(|t| t.partition_field.clone())
    }

    /// Select statement a view was created with
    pub async fn view_definition(&self, dataset: &str, view: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .views
            .get(&(dataset.to_string(), view.to_string()))
            .cloned()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        Ok(self.inner.lock().await.datasets.contains(dataset))
    }

    async fn create_dataset(&self, dataset: &str) -> Result<()> {
        validate_identifier(dataset)?;
        self.inner.lock().await.datasets.insert(dataset.to_string());
        Ok(())
    }

    async fn table_exists(&self, dataset: &str, table: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .contains_key(&(dataset.to_string(), table.to_string())))
    }

    async fn create_table(
        &self,
        dataset: &str,
        table: &str,
        schema: &[FieldSchema],
        partition_field: Option<&str>,
    ) -> Result<()> {
        validate_identifier(table)?;
        let mut inner = self.inner.lock().await;
        if !inner.datasets.contains(dataset) {
            return Err(ArchiveError::Warehouse(format!(
                "dataset '{}' does not exist",
                dataset
            )));
        }
        inner
            .tables
            .entry((dataset.to_string(), table.to_string()))
            .or_insert_with(|| MemoryTable {
                schema: schema.to_vec(),
                partition_field: partition_field.map(str::to_string),
                rows: Vec::new(),
            });
        Ok(())
    }

    async fn table_columns(&self, dataset: &str, table: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(&(dataset.to_string(), table.to_string()))
            .map(|t| t.schema.iter().map(|f| f.name.clone()).collect())
            .ok_or_else(|| ArchiveError::Warehouse(format!("table '{}.{}' not found", dataset, table)))
    }

    async fn run_query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        let Some(caps) = COUNT_QUERY.captures(sql.trim()) else {
            return Err(ArchiveError::Warehouse(
                "in-memory warehouse does not execute SQL".to_string(),
            ));
        };
        let key = (caps[1].to_string(), caps[2].to_string());
        let inner = self.inner.lock().await;
        let table = inner
            .tables
            .get(&key)
            .ok_or_else(|| ArchiveError::Warehouse(format!("table '{}.{}' not found", key.0, key.1)))?;
        let mut row = Row::new();
        row.insert("row_count".to_string(), json!(table.rows.len()));
        Ok(vec![row])
    }

    async fn insert_batch(&self, dataset: &str, table: &str, rows: &[Row]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let target = inner
            .tables
            .get_mut(&(dataset.to_string(), table.to_string()))
            .ok_or_else(|| ArchiveError::Warehouse(format!("table '{}.{}' not found", dataset, table)))?;
        for row in rows {
            if let Some(column) = row
                .keys()
                .find(|k| !target.schema.iter().any(|f| &f.name == *k))
            {
                return Err(ArchiveError::Warehouse(format!(
                    "no such column '{}' in {}.{}",
                    column, dataset, table
                )));
            }
            if let Some(field) = target
                .schema
                .iter()
                .find(|f| f.is_required() && row.get(&f.name).map_or(true, Value::is_null))
            {
                return Err(ArchiveError::Warehouse(format!(
                    "required column '{}' is null",
                    field.name
                )));
            }
        }
        target.rows.extend(rows.iter().cloned());
        debug!("memory warehouse appended {} rows to {}.{}", rows.len(), dataset, table);
        Ok(())
    }

    async fn create_view(&self, dataset: &str, view: &str, select_sql: &str) -> Result<()> {
        validate_identifier(view)?;
        self.inner
            .lock()
            .await
            .views
            .insert((dataset.to_string(), view.to_string()), select_sql.to_string());
        Ok(())
    }

    fn qualified_table(&self, dataset: &str, table: &str) -> String {
        format!("\"{}\".\"{}\"", dataset, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schema::get_schema;

    #[tokio::test]
    async fn test_count_query_reports_rows() {
        let warehouse = MemoryWarehouse::new();
        warehouse.create_dataset("ds").await.unwrap();
        warehouse
            .create_table("ds", "t", get_schema("metrics").unwrap(), Some("timestamp"))
            .await
            .unwrap();
        let mut row = Row::new();
        row.insert("id".to_string(), json!("1"));
        warehouse.insert_batch("ds", "t", &[row]).await.unwrap();

        let sql = format!(
            "SELECT COUNT(*) AS row_count FROM {}",
            warehouse.qualified_table("ds", "t")
        );
        let rows = warehouse.run_query(&sql, &[]).await.unwrap();
        assert_eq!(rows[0]["row_count"], json!(1));
        assert!(warehouse.run_query("DELETE FROM t", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_rejects_null_required_column() {
        let warehouse = MemoryWarehouse::new();
        warehouse.create_dataset("ds").await.unwrap();
        warehouse
            .create_table("ds", "t", get_schema("metrics_strict").unwrap(), None)
            .await
            .unwrap();
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Null);
        assert!(warehouse.insert_batch("ds", "t", &[row]).await.is_err());
        assert!(warehouse.rows("ds", "t").await.is_empty());
    }
}
