mod common;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common::{archiver, DATASET, TABLE};
use serde_json::{json, Value};
use std::sync::Arc;
use telemetry_archiver::app::{Row, Warehouse};
use telemetry_archiver::infra::{MemoryTreeStore, SqliteWarehouse};
use telemetry_archiver::pipeline::schema::{get_schema, FieldSchema, FieldType};
use telemetry_archiver::pipeline::{ArchiveRequest, Cutoff, SinkAdapter};
use telemetry_archiver::types::MetricRecord;
use telemetry_archiver::{ArchiveError, Result as ArchiveResult};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn record(id: i64, raw: &str) -> MetricRecord {
    MetricRecord {
        id: id.to_string(),
        company_id: "c1".to_string(),
        user_id: "u1".to_string(),
        metrics_type: "urls".to_string(),
        timestamp: Utc.timestamp_millis_opt(id).unwrap(),
        raw_data: Some(raw.to_string()),
    }
}

/// SQLite warehouse whose streaming insert is unavailable
struct StatementOnly(Arc<SqliteWarehouse>);

#[async_trait]
impl Warehouse for StatementOnly {
    async fn dataset_exists(&self, dataset: &str) -> ArchiveResult<bool> {
        self.0.dataset_exists(dataset).await
    }

    async fn create_dataset(&self, dataset: &str) -> ArchiveResult<()> {
        self.0.create_dataset(dataset).await
    }

    async fn table_exists(&self, dataset: &str, table: &str) -> ArchiveResult<bool> {
        self.0.table_exists(dataset, table).await
    }

    async fn create_table(
        &self,
        dataset: &str,
        table: &str,
        schema: &[FieldSchema],
        partition_field: Option<&str>,
    ) -> ArchiveResult<()> {
        self.0.create_table(dataset, table, schema, partition_field).await
    }

    async fn table_columns(&self, dataset: &str, table: &str) -> ArchiveResult<Vec<String>> {
        self.0.table_columns(dataset, table).await
    }

    async fn run_query(&self, sql: &str, params: &[Value]) -> ArchiveResult<Vec<Row>> {
        self.0.run_query(sql, params).await
    }

    async fn insert_batch(&self, _dataset: &str, _table: &str, _rows: &[Row]) -> ArchiveResult<()> {
        Err(ArchiveError::Warehouse("streaming insert unavailable".to_string()))
    }

    async fn create_view(&self, dataset: &str, view: &str, select_sql: &str) -> ArchiveResult<()> {
        self.0.create_view(dataset, view, select_sql).await
    }

    fn qualified_table(&self, dataset: &str, table: &str) -> String {
        self.0.qualified_table(dataset, table)
    }

    fn view_source(&self, dataset: &str, table: &str) -> String {
        self.0.view_source(dataset, table)
    }
}

#[tokio::test]
async fn test_ensure_table_is_idempotent_and_persists() -> Result<()> {
    let dir = tempdir()?;
    let schema = get_schema("metrics")?;
    {
        let warehouse = Arc::new(SqliteWarehouse::open(dir.path())?);
        let sink = SinkAdapter::new(warehouse.clone(), DATASET);
        sink.ensure_table(TABLE, schema).await?;
        sink.ensure_table(TABLE, schema).await?;
        assert_eq!(
            warehouse.partition_field(DATASET, TABLE)?,
            Some("timestamp".to_string())
        );
    }
    assert!(dir.path().join(format!("{}.db", DATASET)).exists());

    // A new process finds the dataset file and the existing table
    let reopened = SqliteWarehouse::open(dir.path())?;
    assert!(reopened.dataset_exists(DATASET).await?);
    assert!(reopened.table_exists(DATASET, TABLE).await?);
    assert_eq!(reopened.table_columns(DATASET, TABLE).await?.len(), schema.len());
    Ok(())
}

#[tokio::test]
async fn test_ensure_table_leaves_existing_table_alone() -> Result<()> {
    let sqlite = Arc::new(SqliteWarehouse::open_in_memory()?);
    let legacy = vec![
        FieldSchema::new("id", FieldType::String),
        FieldSchema::new("payload", FieldType::Json),
        FieldSchema::new("archivedAt", FieldType::Timestamp),
    ];
    sqlite.create_dataset(DATASET).await?;
    sqlite.create_table(DATASET, TABLE, &legacy, None).await?;
    let before = sqlite.table_columns(DATASET, TABLE).await?;

    let sink = SinkAdapter::new(sqlite.clone(), DATASET);
    sink.ensure_table(TABLE, get_schema("metrics")?).await?;

    let after = sqlite.table_columns(DATASET, TABLE).await?;
    assert_eq!(after, before);
    assert_eq!(after, vec!["id", "payload", "archivedAt"]);
    assert_eq!(sqlite.partition_field(DATASET, TABLE)?, None);
    Ok(())
}

#[tokio::test]
async fn test_statement_fallback_preserves_quotes() -> Result<()> {
    let sqlite = Arc::new(SqliteWarehouse::open_in_memory()?);
    let sink = SinkAdapter::new(Arc::new(StatementOnly(sqlite.clone())), DATASET);
    let schema = get_schema("metrics")?;
    sink.ensure_table(TABLE, schema).await?;

    let payload = r#"{"title":"it's Bob''s"}"#;
    let records = vec![record(1000, payload), record(2000, "{}")];
    let outcome = sink
        .insert_records(TABLE, schema, &records, &CancellationToken::new())
        .await?;

    assert_eq!(outcome.accepted, vec![0, 1]);
    assert_eq!(outcome.fallback_batches, 1);
    let rows = sqlite
        .run_query(
            &format!("SELECT rawData FROM \"{}\".\"{}\" WHERE id = ?1", DATASET, TABLE),
            &[json!("1000")],
        )
        .await?;
    assert_eq!(rows[0]["rawData"], json!(payload));
    Ok(())
}

#[tokio::test]
async fn test_strict_schema_enforces_not_null() -> Result<()> {
    let sqlite = Arc::new(SqliteWarehouse::open_in_memory()?);
    let sink = SinkAdapter::new(sqlite.clone(), DATASET);
    let schema = get_schema("metrics_strict")?;
    sink.ensure_table(TABLE, schema).await?;

    let mut partial = Row::new();
    partial.insert("id".to_string(), json!("1000"));
    let err = sqlite
        .insert_batch(DATASET, TABLE, &[partial])
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Sqlite(_)));

    let outcome = sink
        .insert_records(TABLE, schema, &[record(1000, "{}")], &CancellationToken::new())
        .await?;
    assert_eq!(outcome.accepted, vec![0]);
    Ok(())
}

#[tokio::test]
async fn test_dedup_view_collapses_rearchived_rows() -> Result<()> {
    let sqlite = Arc::new(SqliteWarehouse::open_in_memory()?);
    let store = Arc::new(MemoryTreeStore::new());
    let archiver = archiver(store.clone(), sqlite.clone());
    let request = ArchiveRequest::new(Cutoff::All, TABLE).keep_source(true);

    store.set("metrics/c1/u1/urls/1000", json!({"domain": "x.com"})).await;
    archiver.run(&request, &CancellationToken::new()).await?;
    archiver.run(&request, &CancellationToken::new()).await?;

    let base = sqlite
        .run_query(
            &format!("SELECT COUNT(*) AS n FROM \"{}\".\"{}\"", DATASET, TABLE),
            &[],
        )
        .await?;
    assert_eq!(base[0]["n"], json!(2));

    let latest = sqlite
        .run_query(
            &format!("SELECT * FROM \"{}\".\"{}_latest\"", DATASET, TABLE),
            &[],
        )
        .await?;
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0]["id"], json!("1000"));
    assert_eq!(latest[0]["timestamp"], json!("1970-01-01 00:00:01.000 UTC"));
    Ok(())
}
