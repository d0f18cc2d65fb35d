use crate::metrics::{MetricDoc, PhaseMetrics};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Register every phase's metrics, warning on duplicate names
pub fn register_all_metrics() {
    let mut all_metrics = HashMap::new();
    register_phase_metrics::<super::archive::ArchiveMetrics>(&mut all_metrics);
    info!("Registered {} metrics", all_metrics.len());
}

fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<&'static str, MetricDoc>) {
    T::register_metrics();
    for doc in T::metrics_documentation() {
        debug!(
            "metric {} ({:?}, labels {:?}): {}",
            doc.name, doc.metric_type, doc.labels, doc.help
        );
        if all_metrics.contains_key(doc.name) {
            warn!(
                "Metric '{}' registered twice (phase '{}')",
                doc.name,
                T::phase_name()
            );
        } else {
            all_metrics.insert(doc.name, doc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ArchiveMetrics;

    #[test]
    fn test_duplicate_registration_keeps_first_doc() {
        let mut all_metrics = HashMap::new();
        register_phase_metrics::<ArchiveMetrics>(&mut all_metrics);
        let registered = all_metrics.len();
        register_phase_metrics::<ArchiveMetrics>(&mut all_metrics);

        assert_eq!(all_metrics.len(), registered);
        assert!(all_metrics.keys().all(|name| name.starts_with("archiver_")));
    }
}
