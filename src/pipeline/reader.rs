//! Hierarchical store reader
//!
//! Walks `metrics/{companyId}/{userId}/{metricsType}[/{subType}]/{timestamp}`
//! and flattens the selected leaves into [`MetricRecord`]s. The depth below a
//! metrics type is resolved per node: an explicit [`PathLayout`] when one is
//! known, otherwise by probing the child keys.

use crate::app::ports::HierarchicalStore;
use crate::constants;
use crate::error::{ArchiveError, Result};
use crate::infra::memory_tree::compare_keys;
use crate::pipeline::cutoff::Cutoff;
use crate::types::{leaf_path, MetricRecord, MetricsType};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// How the level below a metrics type node is shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathLayout {
    /// Children are timestamp leaves
    Flat,
    /// Children are sub-types whose children are timestamp leaves
    Nested,
    /// Decide from the child keys
    Infer,
}

/// Layout lookup keyed by metrics type.
///
/// Known categories default to [`PathLayout::Flat`]; anything else is inferred.
#[derive(Debug, Clone, Default)]
pub struct PathLayouts {
    overrides: HashMap<String, PathLayout>,
}

impl PathLayouts {
    pub fn new(overrides: HashMap<String, PathLayout>) -> Self {
        Self { overrides }
    }

    pub fn layout_for(&self, metrics_type: &str) -> PathLayout {
        if let Some(layout) = self.overrides.get(metrics_type) {
            return *layout;
        }
        match MetricsType::from_segment(metrics_type) {
            Some(_) => PathLayout::Flat,
            None => PathLayout::Infer,
        }
    }
}

/// A timestamp-keyed leaf under a metrics type
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub key: String,
    pub timestamp_ms: i64,
    pub value: Value,
}

/// Children of a metrics type node after depth resolution
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// One more level of sub-types
    Branch(Map<String, Value>),
    /// Timestamp leaves; `skipped_keys` counts non-numeric keys left out
    TimestampLeaf { leaves: Vec<Leaf>, skipped_keys: usize },
}

impl Node {
    pub fn classify(metrics_type: &str, children: Map<String, Value>, layout: PathLayout) -> Node {
        match layout {
            PathLayout::Nested => Node::Branch(children),
            PathLayout::Infer => {
                if probe_for_timestamps(&children) {
                    Node::timestamp_level(children)
                } else {
                    Node::Branch(children)
                }
            }
            PathLayout::Flat => {
                let any_timestamp = children.keys().any(|k| k.parse::<i64>().is_ok());
                let any_object = children.values().any(|v| v.is_object());
                if !any_timestamp && any_object {
                    warn!(
                        "metrics type '{}' is configured flat but holds no timestamp keys; inferring depth",
                        metrics_type
                    );
                    Node::classify(metrics_type, children, PathLayout::Infer)
                } else {
                    Node::timestamp_level(children)
                }
            }
        }
    }

    /// Treat every child as a leaf candidate; non-numeric keys are skipped
    pub fn timestamp_level(children: Map<String, Value>) -> Node {
        let mut leaves = Vec::with_capacity(children.len());
        let mut skipped_keys = 0;
        for (key, value) in children {
            match key.parse::<i64>() {
                Ok(timestamp_ms) => leaves.push(Leaf {
                    key,
                    timestamp_ms,
                    value,
                }),
                Err(_) => {
                    debug!("Skipping non-timestamp key '{}'", key);
                    skipped_keys += 1;
                }
            }
        }
        Node::TimestampLeaf {
            leaves,
            skipped_keys,
        }
    }
}

/// Probe the first keys in store order; any integer key marks the timestamp level
fn probe_for_timestamps(children: &Map<String, Value>) -> bool {
    let mut keys: Vec<&String> = children.keys().collect();
    keys.sort_by(|a, b| compare_keys(a, b));
    keys.iter()
        .take(constants::DEPTH_PROBE_SAMPLE)
        .any(|k| k.parse::<i64>().is_ok())
}

/// Counters collected during one scan
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub companies: usize,
    pub users: usize,
    pub leaves_seen: usize,
    pub selected: usize,
    pub skipped_keys: usize,
    pub dropped_leaves: usize,
    pub failed_companies: usize,
}

/// Reads archivable records from the store and deletes archived leaves
pub struct TreeReader {
    store: Arc<dyn HierarchicalStore>,
    layouts: PathLayouts,
    root: String,
}

impl TreeReader {
    pub fn new(store: Arc<dyn HierarchicalStore>, layouts: PathLayouts) -> Self {
        Self::with_root(store, layouts, constants::METRICS_ROOT)
    }

    pub fn with_root(store: Arc<dyn HierarchicalStore>, layouts: PathLayouts, root: &str) -> Self {
        Self {
            store,
            layouts,
            root: root.trim_matches('/').to_string(),
        }
    }

    /// Every leaf at or before `cutoff` (or every leaf for [`Cutoff::All`])
    pub async fn scan_for_archivable(&self, cutoff: &Cutoff) -> Result<Vec<MetricRecord>> {
        let (records, _) = self.scan_with_stats(cutoff).await?;
        Ok(records)
    }

    #[instrument(skip(self, cutoff), fields(root = %self.root, cutoff = %cutoff))]
    pub async fn scan_with_stats(&self, cutoff: &Cutoff) -> Result<(Vec<MetricRecord>, ScanStats)> {
        let mut stats = ScanStats::default();
        let mut records = Vec::new();

        let company_ids = self.store.child_keys(&self.root).await?;
        for company_id in company_ids {
            if company_id.is_empty() {
                continue;
            }
            let path = format!("{}/{}", self.root, company_id);
            let subtree = match self.store.get(&path).await {
                Ok(Some(subtree)) => subtree,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping company '{}': {}", company_id, e);
                    stats.failed_companies += 1;
                    continue;
                }
            };
            stats.companies += 1;
            self.walk_company(&company_id, subtree, cutoff, &mut records, &mut stats);
        }

        stats.selected = records.len();
        info!(
            "Scan found {} archivable records across {} companies ({} leaves seen, {} non-timestamp keys skipped, {} dropped)",
            stats.selected, stats.companies, stats.leaves_seen, stats.skipped_keys, stats.dropped_leaves
        );
        Ok((records, stats))
    }

    fn walk_company(
        &self,
        company_id: &str,
        subtree: Value,
        cutoff: &Cutoff,
        records: &mut Vec<MetricRecord>,
        stats: &mut ScanStats,
    ) {
        let Value::Object(users) = subtree else {
            warn!("Company node '{}' is not an object; skipping", company_id);
            return;
        };
        for (user_id, user_node) in users {
            let Value::Object(types) = user_node else {
                continue;
            };
            if user_id.is_empty() {
                warn!("Empty user key under company '{}'; skipping", company_id);
                continue;
            }
            stats.users += 1;
            for (metrics_type, type_node) in types {
                let Value::Object(children) = type_node else {
                    continue;
                };
                let layout = self.layouts.layout_for(&metrics_type);
                match Node::classify(&metrics_type, children, layout) {
                    Node::TimestampLeaf {
                        leaves,
                        skipped_keys,
                    } => {
                        stats.skipped_keys += skipped_keys;
                        collect(company_id, &user_id, &metrics_type, leaves, cutoff, records, stats);
                    }
                    Node::Branch(sub_types) => {
                        for (sub_type, sub_node) in sub_types {
                            let Value::Object(grandchildren) = sub_node else {
                                continue;
                            };
                            let compound = format!("{}/{}", metrics_type, sub_type);
                            if let Node::TimestampLeaf {
                                leaves,
                                skipped_keys,
                            } = Node::timestamp_level(grandchildren)
                            {
                                stats.skipped_keys += skipped_keys;
                                collect(company_id, &user_id, &compound, leaves, cutoff, records, stats);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Remove one leaf. Removing an already absent leaf succeeds.
    pub async fn delete_record(
        &self,
        company_id: &str,
        user_id: &str,
        metrics_type: &str,
        id: &str,
    ) -> Result<()> {
        let path = format!(
            "{}/{}",
            self.root,
            leaf_path(company_id, user_id, metrics_type, id)
        );
        self.store.delete(&path).await.map_err(|e| match e {
            ArchiveError::Store { .. } => e,
            other => ArchiveError::store(path, other),
        })
    }
}

fn collect(
    company_id: &str,
    user_id: &str,
    metrics_type: &str,
    leaves: Vec<Leaf>,
    cutoff: &Cutoff,
    records: &mut Vec<MetricRecord>,
    stats: &mut ScanStats,
) {
    for leaf in leaves {
        stats.leaves_seen += 1;
        if !cutoff.admits(leaf.timestamp_ms) {
            continue;
        }
        match build_record(company_id, user_id, metrics_type, leaf) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("Dropping leaf: {}", e);
                stats.dropped_leaves += 1;
            }
        }
    }
}

fn build_record(company_id: &str, user_id: &str, metrics_type: &str, leaf: Leaf) -> Result<MetricRecord> {
    let path = leaf_path(company_id, user_id, metrics_type, &leaf.key);
    let timestamp = DateTime::from_timestamp_millis(leaf.timestamp_ms)
        .ok_or_else(|| ArchiveError::store(&path, "timestamp key is not a valid instant"))?;
    let raw_data = if leaf.value.is_null() {
        None
    } else {
        Some(serde_json::to_string(&leaf.value)?)
    };
    Ok(MetricRecord {
        id: leaf.key,
        company_id: company_id.to_string(),
        user_id: user_id.to_string(),
        metrics_type: metrics_type.to_string(),
        timestamp,
        raw_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn children(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_infer_recurses_only_without_numeric_keys() {
        let flat = children(json!({"1000": {"a": 1}, "note": "x"}));
        let nested = children(json!({"variantA": {"1000": {}}, "variantB": {"2000": {}}}));

        assert!(matches!(
            Node::classify("screenshots", flat, PathLayout::Infer),
            Node::TimestampLeaf { skipped_keys: 1, .. }
        ));
        assert!(matches!(
            Node::classify("screenshots", nested, PathLayout::Infer),
            Node::Branch(_)
        ));
    }

    #[test]
    fn test_flat_layout_falls_back_on_drift() {
        let nested = children(json!({"variantA": {"1000": {}}}));
        assert!(matches!(
            Node::classify("fileDownloads", nested, PathLayout::Flat),
            Node::Branch(_)
        ));
    }

    #[test]
    fn test_nested_layout_always_branches() {
        let flat = children(json!({"1000": {}}));
        assert!(matches!(
            Node::classify("urls", flat, PathLayout::Nested),
            Node::Branch(_)
        ));
    }

    #[test]
    fn test_layouts_default_by_known_type() {
        let mut overrides = HashMap::new();
        overrides.insert("urls".to_string(), PathLayout::Nested);
        let layouts = PathLayouts::new(overrides);
        assert_eq!(layouts.layout_for("urls"), PathLayout::Nested);
        assert_eq!(layouts.layout_for("fileUploads"), PathLayout::Flat);
        assert_eq!(layouts.layout_for("screenshots"), PathLayout::Infer);
    }

    #[test]
    fn test_build_record_rejects_out_of_range_timestamp() {
        let leaf = Leaf {
            key: i64::MAX.to_string(),
            timestamp_ms: i64::MAX,
            value: json!({}),
        };
        assert!(build_record("c1", "u1", "urls", leaf).is_err());
    }

    #[test]
    fn test_build_record_keeps_null_payload_as_none() {
        let leaf = Leaf {
            key: "1000".to_string(),
            timestamp_ms: 1000,
            value: Value::Null,
        };
        let record = build_record("c1", "u1", "urls", leaf).unwrap();
        assert_eq!(record.raw_data, None);
        assert_eq!(record.timestamp.timestamp_millis(), 1000);
    }
}
