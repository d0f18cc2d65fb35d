use crate::error::Result;
use crate::pipeline::schema::FieldSchema;
use async_trait::async_trait;
use serde_json::Value;

/// A warehouse row: column name to value, `Value::Null` for SQL NULL
pub type Row = serde_json::Map<String, Value>;

/// Key-value tree the extension writes telemetry into.
///
/// Paths are `/`-joined segments relative to the store root.
#[async_trait]
pub trait HierarchicalStore: Send + Sync {
    /// Subtree at `path`, `None` when nothing is stored there
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Children of `path` whose `order_field` is at or after `start_value`.
    ///
    /// `$key` orders by child key; numeric keys compare as numbers.
    async fn get_range(
        &self,
        path: &str,
        order_field: &str,
        start_value: &Value,
    ) -> Result<Option<Value>>;

    /// Remove the node at `path`. Removing an absent node succeeds.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Keys directly under `path`
    async fn child_keys(&self, path: &str) -> Result<Vec<String>> {
        match self.get(path).await? {
            Some(Value::Object(children)) => Ok(children.keys().cloned().collect()),
            _ => Ok(Vec::new()),
        }
    }
}

/// Columnar analytic sink the archive is appended to
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool>;

    async fn create_dataset(&self, dataset: &str) -> Result<()>;

    async fn table_exists(&self, dataset: &str, table: &str) -> Result<bool>;

    async fn create_table(
        &self,
        dataset: &str,
        table: &str,
        schema: &[FieldSchema],
        partition_field: Option<&str>,
    ) -> Result<()>;

    /// Column names of an existing table
    async fn table_columns(&self, dataset: &str, table: &str) -> Result<Vec<String>>;

    async fn run_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Streaming append of already sanitized rows
    async fn insert_batch(&self, dataset: &str, table: &str, rows: &[Row]) -> Result<()>;

    async fn create_view(&self, dataset: &str, view: &str, select_sql: &str) -> Result<()>;

    /// Table reference usable in statements passed to `run_query`
    fn qualified_table(&self, dataset: &str, table: &str) -> String;

    /// Table reference usable inside a view body created in the same dataset
    fn view_source(&self, dataset: &str, table: &str) -> String {
        self.qualified_table(dataset, table)
    }
}
