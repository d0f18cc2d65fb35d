//! Test doubles shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_archiver::app::{HierarchicalStore, Row, Warehouse};
use telemetry_archiver::infra::{MemoryTreeStore, MemoryWarehouse};
use telemetry_archiver::pipeline::schema::FieldSchema;
use telemetry_archiver::pipeline::{Archiver, PathLayouts, SinkAdapter, TreeReader};
use telemetry_archiver::{ArchiveError, Result};

pub const DATASET: &str = "telemetry_archive";
pub const TABLE: &str = "metrics_archive";

pub fn archiver(store: Arc<dyn HierarchicalStore>, warehouse: Arc<dyn Warehouse>) -> Archiver {
    archiver_with(store, warehouse, 100, Duration::from_secs(30))
}

pub fn archiver_with(
    store: Arc<dyn HierarchicalStore>,
    warehouse: Arc<dyn Warehouse>,
    batch_size: usize,
    stage_timeout: Duration,
) -> Archiver {
    let reader = TreeReader::new(store, PathLayouts::default());
    let sink = SinkAdapter::new(warehouse, DATASET).with_batch_size(batch_size);
    Archiver::new(reader, sink, stage_timeout)
}

/// `count` url leaves for c1/u1 keyed 1000, 1001, ...
pub fn url_leaves(count: usize) -> MemoryTreeStore {
    let mut urls = serde_json::Map::new();
    for i in 0..count {
        urls.insert((1000 + i).to_string(), json!({ "domain": format!("site{}.com", i) }));
    }
    MemoryTreeStore::from_value(json!({ "metrics": { "c1": { "u1": { "urls": urls } } } }))
}

pub async fn leaf_count(store: &MemoryTreeStore) -> usize {
    fn count(value: &Value, depth: usize) -> usize {
        match value {
            Value::Object(map) if depth < 4 => map.values().map(|v| count(v, depth + 1)).sum(),
            Value::Object(map) => map.len(),
            _ => 0,
        }
    }
    store
        .snapshot()
        .await
        .get("metrics")
        .map(|m| count(m, 1))
        .unwrap_or(0)
}

/// Memory warehouse whose insert paths fail on demand.
///
/// Batch calls are numbered from zero; listed batches fail on the streaming
/// path, and every `INSERT` statement fails on the SQL path.
pub struct RejectingWarehouse {
    pub inner: MemoryWarehouse,
    failing_batches: Option<HashSet<usize>>,
    calls: AtomicUsize,
    pub insert_attempts: AtomicUsize,
}

impl RejectingWarehouse {
    pub fn always() -> Self {
        Self {
            inner: MemoryWarehouse::new(),
            failing_batches: None,
            calls: AtomicUsize::new(0),
            insert_attempts: AtomicUsize::new(0),
        }
    }

    pub fn batches(failing: &[usize]) -> Self {
        Self {
            failing_batches: Some(failing.iter().copied().collect()),
            ..Self::always()
        }
    }
}

#[async_trait]
impl Warehouse for RejectingWarehouse {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        self.inner.dataset_exists(dataset).await
    }

    async fn create_dataset(&self, dataset: &str) -> Result<()> {
        self.inner.create_dataset(dataset).await
    }

    async fn table_exists(&self, dataset: &str, table: &str) -> Result<bool> {
        self.inner.table_exists(dataset, table).await
    }

    async fn create_table(
        &self,
        dataset: &str,
        table: &str,
        schema: &[FieldSchema],
        partition_field: Option<&str>,
    ) -> Result<()> {
        self.inner
            .create_table(dataset, table, schema, partition_field)
            .await
    }

    async fn table_columns(&self, dataset: &str, table: &str) -> Result<Vec<String>> {
        self.inner.table_columns(dataset, table).await
    }

    async fn run_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        if sql.starts_with("INSERT") {
            self.insert_attempts.fetch_add(1, Ordering::SeqCst);
            return Err(ArchiveError::Warehouse("statement rejected".to_string()));
        }
        self.inner.run_query(sql, params).await
    }

    async fn insert_batch(&self, dataset: &str, table: &str, rows: &[Row]) -> Result<()> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let fails = match &self.failing_batches {
            None => true,
            Some(batches) => batches.contains(&call),
        };
        if fails {
            return Err(ArchiveError::Warehouse(format!("batch {} rejected", call)));
        }
        self.inner.insert_batch(dataset, table, rows).await
    }

    async fn create_view(&self, dataset: &str, view: &str, select_sql: &str) -> Result<()> {
        self.inner.create_view(dataset, view, select_sql).await
    }

    fn qualified_table(&self, dataset: &str, table: &str) -> String {
        self.inner.qualified_table(dataset, table)
    }
}

/// Memory tree that counts deletes, fails the first `failures` of them and
/// can stall reads
pub struct InstrumentedStore {
    pub inner: MemoryTreeStore,
    failures_left: AtomicUsize,
    pub delete_calls: AtomicUsize,
    read_delay: Duration,
}

impl InstrumentedStore {
    pub fn new(inner: MemoryTreeStore) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            read_delay: Duration::ZERO,
        }
    }

    pub fn failing_deletes(mut self, failures: usize) -> Self {
        self.failures_left = AtomicUsize::new(failures);
        self
    }

    pub fn slow_reads(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn deletes(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HierarchicalStore for InstrumentedStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.inner.get(path).await
    }

    async fn get_range(
        &self,
        path: &str,
        order_field: &str,
        start_value: &Value,
    ) -> Result<Option<Value>> {
        self.inner.get_range(path, order_field, start_value).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(ArchiveError::store(path, "permission denied"));
        }
        self.inner.delete(path).await
    }
}
