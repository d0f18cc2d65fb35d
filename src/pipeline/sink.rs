//! Warehouse sink
//!
//! Ensures the archive table exists, then appends sanitized records in
//! batches. A batch the streaming insert rejects is retried once as a
//! multi-row `INSERT` statement; a batch that fails both ways is reported
//! and its records are never marked archived.

use crate::app::ports::{Row, Warehouse};
use crate::constants;
use crate::error::{ArchiveError, Result};
use crate::metrics::ArchiveMetrics;
use crate::pipeline::schema::{field_names, FieldSchema};
use crate::pipeline::sql::{quote_ident, render_literal, validate_identifier};
use crate::types::MetricRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Columns of the dedup view's grouping key, in output order
const DEDUP_KEY: [&str; 4] = ["companyId", "userId", "metricsType", "id"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub batch: usize,
    pub records: usize,
    pub error: String,
}

/// What a load accomplished, batch by batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    /// Indexes into the input slice of records the warehouse accepted
    pub accepted: Vec<usize>,
    pub failed_batches: Vec<BatchFailure>,
    /// Batches that landed through the SQL statement path
    pub fallback_batches: usize,
    /// Stopped early because the run was cancelled
    pub cancelled: bool,
}

impl InsertOutcome {
    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }
}

pub struct SinkAdapter {
    warehouse: Arc<dyn Warehouse>,
    dataset: String,
    batch_size: usize,
    verify_counts: bool,
}

impl SinkAdapter {
    pub fn new(warehouse: Arc<dyn Warehouse>, dataset: &str) -> Self {
        Self {
            warehouse,
            dataset: dataset.to_string(),
            batch_size: constants::DEFAULT_BATCH_SIZE,
            verify_counts: true,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_verification(mut self, verify_counts: bool) -> Self {
        self.verify_counts = verify_counts;
        self
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Create the dataset, table and dedup view when absent.
    ///
    /// An existing table is never altered; column differences are logged.
    #[instrument(skip(self, schema), fields(dataset = %self.dataset))]
    pub async fn ensure_table(&self, table: &str, schema: &[FieldSchema]) -> Result<()> {
        validate_identifier(&self.dataset)?;
        validate_identifier(table)?;

        if !self.warehouse.dataset_exists(&self.dataset).await? {
            info!("Dataset {} not found, creating it", self.dataset);
            self.warehouse.create_dataset(&self.dataset).await?;
        }

        if self.warehouse.table_exists(&self.dataset, table).await? {
            let existing = self.warehouse.table_columns(&self.dataset, table).await?;
            let declared = field_names(schema);
            let missing: Vec<&str> = declared
                .iter()
                .copied()
                .filter(|name| !existing.iter().any(|c| c.as_str() == *name))
                .collect();
            let extra: Vec<&String> = existing
                .iter()
                .filter(|c| !declared.contains(&c.as_str()))
                .collect();
            if !missing.is_empty() || !extra.is_empty() {
                warn!(
                    "Table {}.{} differs from schema: missing columns {:?}, undeclared columns {:?}",
                    self.dataset, table, missing, extra
                );
            }
        } else {
            let partition = schema
                .iter()
                .any(|f| f.name == constants::PARTITION_FIELD)
                .then_some(constants::PARTITION_FIELD);
            self.warehouse
                .create_table(&self.dataset, table, schema, partition)
                .await?;
            info!(
                "Created table {}.{} partitioned by {:?}",
                self.dataset, table, partition
            );
        }

        self.ensure_dedup_view(table, schema).await;
        Ok(())
    }

    async fn ensure_dedup_view(&self, table: &str, schema: &[FieldSchema]) {
        let Some(select) = dedup_view_sql(&self.warehouse.view_source(&self.dataset, table), schema)
        else {
            debug!("Schema for {} lacks the dedup key, skipping view", table);
            return;
        };
        let view = format!("{}{}", table, constants::DEDUP_VIEW_SUFFIX);
        if let Err(e) = self.warehouse.create_view(&self.dataset, &view, &select).await {
            warn!("Could not create dedup view {}.{}: {}", self.dataset, view, e);
        }
    }

    /// Append `records` to `table` in batches.
    ///
    /// Fails outright only for invalid input; per-batch failures are
    /// returned in the outcome.
    #[instrument(skip(self, schema, records, cancel), fields(dataset = %self.dataset, records = records.len()))]
    pub async fn insert_records(
        &self,
        table: &str,
        schema: &[FieldSchema],
        records: &[MetricRecord],
        cancel: &CancellationToken,
    ) -> Result<InsertOutcome> {
        validate_identifier(table)?;
        if records.is_empty() {
            return Err(ArchiveError::Load("no records to insert".to_string()));
        }

        let qualified = self.warehouse.qualified_table(&self.dataset, table);
        let before = if self.verify_counts {
            self.count_rows(&qualified).await
        } else {
            None
        };

        let mut outcome = InsertOutcome::default();
        for (batch, chunk) in records.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                warn!("Load cancelled before batch {}", batch);
                outcome.cancelled = true;
                break;
            }
            let first = batch * self.batch_size;
            let rows: Vec<Row> = chunk.iter().map(|r| sanitize_record(r, schema)).collect();

            match self.warehouse.insert_batch(&self.dataset, table, &rows).await {
                Ok(()) => {
                    debug!("Batch {} inserted ({} rows)", batch, rows.len());
                }
                Err(stream_err) => {
                    warn!(
                        "Streaming insert of batch {} failed: {}. Retrying as SQL",
                        batch, stream_err
                    );
                    let sql = fallback_insert_sql(&qualified, schema, &rows)?;
                    if let Err(sql_err) = self.warehouse.run_query(&sql, &[]).await {
                        error!("Batch {} failed on both insert paths: {}", batch, sql_err);
                        ArchiveMetrics::record_batch_failed();
                        outcome.failed_batches.push(BatchFailure {
                            batch,
                            records: rows.len(),
                            error: sql_err.to_string(),
                        });
                        continue;
                    }
                    outcome.fallback_batches += 1;
                }
            }
            ArchiveMetrics::record_rows_loaded(rows.len());
            outcome.accepted.extend(first..first + chunk.len());
        }

        if self.verify_counts {
            self.verify(&qualified, before, outcome.accepted_count()).await;
        }
        info!(
            "Loaded {}/{} records into {} ({} batches failed, {} via SQL)",
            outcome.accepted_count(),
            records.len(),
            qualified,
            outcome.failed_batches.len(),
            outcome.fallback_batches
        );
        Ok(outcome)
    }

    async fn count_rows(&self, qualified: &str) -> Option<i64> {
        let sql = format!("SELECT COUNT(*) AS row_count FROM {}", qualified);
        match self.warehouse.run_query(&sql, &[]).await {
            Ok(rows) => rows
                .first()
                .and_then(|row| row.get("row_count"))
                .and_then(Value::as_i64),
            Err(e) => {
                warn!("Row count on {} unavailable: {}", qualified, e);
                None
            }
        }
    }

    async fn verify(&self, qualified: &str, before: Option<i64>, accepted: usize) {
        let Some(before) = before else {
            return;
        };
        let Some(after) = self.count_rows(qualified).await else {
            return;
        };
        let added = after - before;
        if added < accepted as i64 {
            warn!(
                "Row count on {} grew by {} but {} records were accepted",
                qualified, added, accepted
            );
        } else {
            debug!("Row count on {} grew by {}", qualified, added);
        }
    }
}

/// Timestamp literal the warehouse parses as UTC
pub fn timestamp_literal(instant: &DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string()
}

/// Project a record onto the schema's columns.
///
/// Only the six record fields can appear; absent values become explicit nulls.
pub fn sanitize_record(record: &MetricRecord, schema: &[FieldSchema]) -> Row {
    let mut row = Row::new();
    for field in schema {
        let value = match field.name.as_str() {
            "id" => Value::String(record.id.clone()),
            "companyId" => Value::String(record.company_id.clone()),
            "userId" => Value::String(record.user_id.clone()),
            "metricsType" => Value::String(record.metrics_type.clone()),
            "timestamp" => Value::String(timestamp_literal(&record.timestamp)),
            "rawData" => record
                .raw_data
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            _ => continue,
        };
        row.insert(field.name.clone(), value);
    }
    row
}

/// Multi-row `INSERT ... VALUES` with every value inlined as a literal
pub fn fallback_insert_sql(qualified: &str, schema: &[FieldSchema], rows: &[Row]) -> Result<String> {
    let columns: Vec<&str> = schema
        .iter()
        .map(|f| f.name.as_str())
        .filter(|name| MetricRecord::FIELDS.iter().any(|f| f == name))
        .collect();
    let quoted = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Result<Vec<_>>>()?;
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = columns
                .iter()
                .map(|c| render_literal(row.get(*c).unwrap_or(&Value::Null)))
                .collect();
            format!("({})", values.join(", "))
        })
        .collect();
    Ok(format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified,
        quoted.join(", "),
        tuples.join(", ")
    ))
}

/// Latest row per record identity; duplicates from re-archived leaves collapse here
pub fn dedup_view_sql(source: &str, schema: &[FieldSchema]) -> Option<String> {
    let names = field_names(schema);
    if !DEDUP_KEY.iter().all(|k| names.contains(k)) {
        return None;
    }
    let mut columns: Vec<String> = DEDUP_KEY.iter().map(|k| k.to_string()).collect();
    columns.extend(
        names
            .iter()
            .filter(|n| !DEDUP_KEY.iter().any(|k| k == *n))
            .map(|n| format!("MAX({0}) AS {0}", n)),
    );
    Some(format!(
        "SELECT {} FROM {} GROUP BY {}",
        columns.join(", "),
        source,
        DEDUP_KEY.join(", ")
    ))
}
