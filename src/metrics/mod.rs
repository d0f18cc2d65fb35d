//! Metrics for archive runs
//!
//! Names follow `archiver_{phase}_{metric}[_total]`. Each phase describes its
//! metrics in its own submodule and registers them at startup.

pub mod archive;
pub mod registry;

pub use archive::ArchiveMetrics;

use std::net::SocketAddr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Install the Prometheus recorder and register all metrics.
///
/// Idempotent. With `listen` set, the exporter also serves `/metrics` on that
/// address; without it the recorder still collects but nothing is exposed.
pub fn init_metrics(listen: Option<&str>) {
    INIT.call_once(|| {
        let mut builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        if let Some(addr) = listen {
            match addr.parse::<SocketAddr>() {
                Ok(addr) => {
                    builder = builder.with_http_listener(addr);
                    info!("Prometheus exporter listening on http://{}/metrics", addr);
                }
                Err(e) => warn!("Invalid metrics listen address '{}': {}", addr, e),
            }
        }

        let installed = if listen.is_some() {
            builder.install()
        } else {
            builder.install_recorder().map(|_| ())
        };
        match installed {
            Ok(()) => registry::register_all_metrics(),
            Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
        }
    });
}

pub trait PhaseMetrics {
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Build a metric name with the crate prefix and type suffix
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("archiver_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("archiver_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("archiver_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_naming_convention() {
        assert_eq!(
            phase_metric!(counter, "runs", "started"),
            "archiver_runs_started_total"
        );
        assert_eq!(
            phase_metric!(histogram, "runs", "duration_seconds"),
            "archiver_runs_duration_seconds"
        );
    }
}
