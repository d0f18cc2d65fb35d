//! Run, load and cleanup metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct ArchiveMetrics;

impl ArchiveMetrics {
    pub fn record_run_started() {
        ::metrics::counter!(phase_metric!(counter, "runs", "started")).increment(1);
    }

    /// `outcome` is a run outcome label or `failed`
    pub fn record_run_finished(outcome: &'static str, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "runs", "finished"), "outcome" => outcome)
            .increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "runs", "duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_scan(selected: usize, skipped_keys: usize) {
        ::metrics::counter!(phase_metric!(counter, "scan", "records_selected"))
            .increment(selected as u64);
        ::metrics::counter!(phase_metric!(counter, "scan", "keys_skipped"))
            .increment(skipped_keys as u64);
    }

    pub fn record_rows_loaded(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "load", "rows_loaded")).increment(count as u64);
    }

    pub fn record_batch_failed() {
        ::metrics::counter!(phase_metric!(counter, "load", "batches_failed")).increment(1);
    }

    pub fn record_leaves_deleted(deleted: usize, failed: usize) {
        ::metrics::counter!(phase_metric!(counter, "cleanup", "leaves_deleted"))
            .increment(deleted as u64);
        ::metrics::counter!(phase_metric!(counter, "cleanup", "delete_failures"))
            .increment(failed as u64);
    }
}

impl PhaseMetrics for ArchiveMetrics {
    fn register_metrics() {
        for doc in Self::metrics_documentation() {
            match doc.metric_type {
                MetricType::Counter => ::metrics::describe_counter!(doc.name, doc.help),
                MetricType::Histogram => ::metrics::describe_histogram!(doc.name, doc.help),
                MetricType::Gauge => ::metrics::describe_gauge!(doc.name, doc.help),
            }
        }
    }

    fn phase_name() -> &'static str {
        "archive"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "runs", "started"),
                metric_type: MetricType::Counter,
                help: "Archive runs started",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "runs", "finished"),
                metric_type: MetricType::Counter,
                help: "Archive runs finished, by outcome",
                labels: vec!["outcome"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "runs", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of an archive run",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "scan", "records_selected"),
                metric_type: MetricType::Counter,
                help: "Leaves selected by the cutoff",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "scan", "keys_skipped"),
                metric_type: MetricType::Counter,
                help: "Leaf keys that were not numeric timestamps",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "load", "rows_loaded"),
                metric_type: MetricType::Counter,
                help: "Rows accepted by the warehouse",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "load", "batches_failed"),
                metric_type: MetricType::Counter,
                help: "Batches rejected by both insert paths",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "cleanup", "leaves_deleted"),
                metric_type: MetricType::Counter,
                help: "Archived leaves removed from the source store",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "cleanup", "delete_failures"),
                metric_type: MetricType::Counter,
                help: "Archived leaves that could not be removed",
                labels: vec![],
            },
        ]
    }
}
