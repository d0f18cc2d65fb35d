//! Archive run orchestration
//!
//! One run moves through `Idle -> Scanning -> Validating -> Loading -> Deleting`.
//! Source leaves are deleted only after the warehouse accepted their batch,
//! and any failure before the delete stage leaves the source untouched.

use crate::error::{ArchiveError, Result};
use crate::metrics::ArchiveMetrics;
use crate::pipeline::cutoff::{compute_cutoff, Cutoff, CutoffUnit};
use crate::pipeline::reader::TreeReader;
use crate::pipeline::run_lock::RunLocks;
use crate::pipeline::schema::{detect_drift, get_schema, FieldSchema, SchemaDrift};
use crate::pipeline::sink::SinkAdapter;
use crate::pipeline::sql::validate_identifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Idle,
    Scanning,
    Validating,
    Loading,
    Deleting,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Idle => "idle",
            RunStage::Scanning => "scanning",
            RunStage::Validating => "validating",
            RunStage::Loading => "loading",
            RunStage::Deleting => "deleting",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub cutoff: Cutoff,
    pub table: String,
    pub schema: String,
    pub delete_after_archive: bool,
    pub dry_run: bool,
}

impl ArchiveRequest {
    pub fn new(cutoff: Cutoff, table: &str) -> Self {
        Self {
            cutoff,
            table: table.to_string(),
            schema: crate::constants::DEFAULT_SCHEMA.to_string(),
            delete_after_archive: true,
            dry_run: false,
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    pub fn keep_source(mut self, keep: bool) -> Self {
        self.delete_after_archive = !keep;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Standing settings a scheduled or triggered run starts from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivePolicy {
    pub older_than: u32,
    pub unit: CutoffUnit,
    pub table: String,
    pub schema: String,
    pub delete_after_archive: bool,
}

impl ArchivePolicy {
    /// Request with the cutoff evaluated at `now`
    pub fn request_at(&self, now: DateTime<Utc>) -> ArchiveRequest {
        ArchiveRequest::new(compute_cutoff(self.older_than, self.unit, now), &self.table)
            .schema(&self.schema)
            .keep_source(!self.delete_after_archive)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    NothingToArchive,
    DryRun,
    Complete,
    SourceRetained,
    CleanupIncomplete,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::NothingToArchive => "nothing_to_archive",
            RunOutcome::DryRun => "dry_run",
            RunOutcome::Complete => "complete",
            RunOutcome::SourceRetained => "source_retained",
            RunOutcome::CleanupIncomplete => "cleanup_incomplete",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReport {
    pub run_id: Uuid,
    pub table: String,
    pub schema: String,
    pub cutoff: Option<DateTime<Utc>>,
    pub selected: usize,
    pub archived: usize,
    pub deleted: usize,
    pub failed_batches: Vec<usize>,
    pub failed_deletes: usize,
    /// Cleanup stopped early on cancellation or timeout
    pub interrupted: bool,
    pub dry_run: bool,
    pub delete_after_archive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_drift: Option<SchemaDrift>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ArchiveReport {
    fn start(request: &ArchiveRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            table: request.table.clone(),
            schema: request.schema.clone(),
            cutoff: request.cutoff.instant(),
            selected: 0,
            archived: 0,
            deleted: 0,
            failed_batches: Vec::new(),
            failed_deletes: 0,
            interrupted: false,
            dry_run: request.dry_run,
            delete_after_archive: request.delete_after_archive,
            schema_drift: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.dry_run {
            RunOutcome::DryRun
        } else if self.archived == 0 {
            RunOutcome::NothingToArchive
        } else if !self.delete_after_archive {
            RunOutcome::SourceRetained
        } else if self.deleted < self.archived {
            RunOutcome::CleanupIncomplete
        } else {
            RunOutcome::Complete
        }
    }

    /// Human-readable status line for logs and the trigger response
    pub fn message(&self) -> String {
        let mut message = match self.outcome() {
            RunOutcome::DryRun => format!(
                "Dry run: {} records would be archived to {}",
                self.selected, self.table
            ),
            RunOutcome::NothingToArchive => "No records matched the cutoff; nothing to archive".to_string(),
            RunOutcome::SourceRetained => format!(
                "Archived {} records to {}; source data kept because cleanup is disabled",
                self.archived, self.table
            ),
            RunOutcome::CleanupIncomplete if self.interrupted => format!(
                "Archived {} records to {}, but cleanup was interrupted after removing {}",
                self.archived, self.table, self.deleted
            ),
            RunOutcome::CleanupIncomplete => format!(
                "Archived {} records to {}, but {} could not be removed from the source store",
                self.archived,
                self.table,
                self.archived - self.deleted
            ),
            RunOutcome::Complete => format!(
                "Archived {} records to {} and removed them from the source store",
                self.archived, self.table
            ),
        };
        if !self.failed_batches.is_empty() {
            message.push_str(&format!(
                " ({} of the selected records were not loaded and remain in the source store)",
                self.selected - self.archived
            ));
        }
        message
    }
}

/// Runs the read, load, delete sequence for one table at a time
pub struct Archiver {
    reader: TreeReader,
    sink: SinkAdapter,
    locks: RunLocks,
    stage_timeout: Duration,
}

impl Archiver {
    pub fn new(reader: TreeReader, sink: SinkAdapter, stage_timeout: Duration) -> Self {
        Self {
            reader,
            sink,
            locks: RunLocks::new(),
            stage_timeout,
        }
    }

    pub fn is_running(&self, table: &str) -> bool {
        self.locks.is_held(table)
    }

    #[instrument(skip(self, request, cancel), fields(table = %request.table, schema = %request.schema))]
    pub async fn run(&self, request: &ArchiveRequest, cancel: &CancellationToken) -> Result<ArchiveReport> {
        validate_identifier(&request.table)?;
        let schema = get_schema(&request.schema)?;
        let _guard = self.locks.try_acquire(&request.table)?;

        let mut report = ArchiveReport::start(request);
        let mut stage = RunStage::Idle;
        info!(
            "🚀 Archive run {} starting: table={} schema={} cutoff={} dry_run={}",
            report.run_id, request.table, request.schema, request.cutoff, request.dry_run
        );
        ArchiveMetrics::record_run_started();
        let started = Instant::now();

        let result = self
            .execute(request, schema, cancel, &mut report, &mut stage)
            .await;
        report.finished_at = Some(Utc::now());
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                let outcome = report.outcome();
                ArchiveMetrics::record_run_finished(outcome.as_str(), elapsed);
                info!("✅ Archive run {} finished: {}", report.run_id, report.message());
                Ok(report)
            }
            Err(e) => {
                ArchiveMetrics::record_run_finished("failed", elapsed);
                error!(
                    "❌ Archive run {} failed during {}: {}",
                    report.run_id,
                    stage.as_str(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        request: &ArchiveRequest,
        schema: &'static [FieldSchema],
        cancel: &CancellationToken,
        report: &mut ArchiveReport,
        stage: &mut RunStage,
    ) -> Result<()> {
        *stage = RunStage::Scanning;
        let (records, stats) = self
            .guarded("scanning", cancel, self.reader.scan_with_stats(&request.cutoff))
            .await?;
        report.selected = records.len();
        ArchiveMetrics::record_scan(records.len(), stats.skipped_keys);
        info!(
            "Scan selected {} of {} leaves across {} companies ({} malformed keys skipped)",
            stats.selected, stats.leaves_seen, stats.companies, stats.skipped_keys
        );
        if records.is_empty() {
            return Ok(());
        }

        *stage = RunStage::Validating;
        let drift = detect_drift(schema, &records[0].present_fields());
        if !drift.is_empty() {
            warn!(
                "Schema drift against '{}': missing in data {:?}, not in schema {:?}",
                request.schema, drift.missing_in_data, drift.extra_in_data
            );
            report.schema_drift = Some(drift);
        }
        if request.dry_run {
            info!("Dry run: skipping load and cleanup for {} records", records.len());
            return Ok(());
        }

        *stage = RunStage::Loading;
        let outcome = self
            .guarded("loading", cancel, async {
                self.sink.ensure_table(&request.table, schema).await?;
                self.sink
                    .insert_records(&request.table, schema, &records, cancel)
                    .await
            })
            .await?;
        if outcome.cancelled {
            return Err(ArchiveError::Cancelled { stage: "loading" });
        }
        report.failed_batches = outcome.failed_batches.iter().map(|f| f.batch).collect();
        if outcome.accepted.is_empty() {
            let first = outcome
                .failed_batches
                .first()
                .map(|f| f.error.clone())
                .unwrap_or_default();
            return Err(ArchiveError::Load(format!(
                "all {} batches failed: {}",
                outcome.failed_batches.len(),
                first
            )));
        }
        report.archived = outcome.accepted_count();

        if !request.delete_after_archive {
            info!("Cleanup disabled, keeping {} archived leaves", report.archived);
            return Ok(());
        }

        *stage = RunStage::Deleting;
        let deadline = Instant::now() + self.stage_timeout;
        for index in outcome.accepted {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                warn!(
                    "Cleanup interrupted after {} of {} deletions",
                    report.deleted, report.archived
                );
                report.interrupted = true;
                break;
            }
            let record = &records[index];
            let delete = self.reader.delete_record(
                &record.company_id,
                &record.user_id,
                &record.metrics_type,
                &record.id,
            );
            match tokio::time::timeout_at(deadline, delete).await {
                Ok(Ok(())) => report.deleted += 1,
                Ok(Err(e)) => {
                    warn!("Failed to delete archived leaf: {}", e);
                    report.failed_deletes += 1;
                }
                Err(_) => {
                    warn!("Cleanup deadline reached while deleting {}", record.store_path());
                    report.interrupted = true;
                    break;
                }
            }
        }
        ArchiveMetrics::record_leaves_deleted(report.deleted, report.failed_deletes);
        Ok(())
    }

    /// Await `fut` unless the run is cancelled or the stage deadline passes first
    async fn guarded<T, F>(&self, stage: &'static str, cancel: &CancellationToken, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ArchiveError::Cancelled { stage }),
            res = tokio::time::timeout(self.stage_timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(ArchiveError::Timeout { stage, secs: self.stage_timeout.as_secs() }),
            },
        }
    }
}
