use crate::constants;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event categories the browser extension writes under each user node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricsType {
    ClipboardEvents,
    FileDownloads,
    FileUploads,
    Urls,
}

impl MetricsType {
    pub const ALL: [MetricsType; 4] = [
        MetricsType::ClipboardEvents,
        MetricsType::FileDownloads,
        MetricsType::FileUploads,
        MetricsType::Urls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricsType::ClipboardEvents => constants::CLIPBOARD_EVENTS,
            MetricsType::FileDownloads => constants::FILE_DOWNLOADS,
            MetricsType::FileUploads => constants::FILE_UPLOADS,
            MetricsType::Urls => constants::URLS,
        }
    }

    /// Resolve a store path segment to a known category.
    ///
    /// Compound types (`fileDownloads/variantA`) resolve by their first segment.
    pub fn from_segment(segment: &str) -> Option<Self> {
        let base = segment.split('/').next().unwrap_or(segment);
        Self::ALL.iter().copied().find(|t| t.as_str() == base)
    }
}

impl std::fmt::Display for MetricsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One archived telemetry leaf, flattened out of the store tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    /// Original leaf key (a stringified millisecond timestamp)
    pub id: String,
    pub company_id: String,
    pub user_id: String,
    /// Category, possibly compound (`type/subType`)
    pub metrics_type: String,
    pub timestamp: DateTime<Utc>,
    /// Leaf value as JSON text; `None` when the leaf held JSON null
    pub raw_data: Option<String>,
}

impl MetricRecord {
    /// Column names a record can populate, in warehouse order
    pub const FIELDS: [&'static str; 6] = [
        "id",
        "companyId",
        "userId",
        "metricsType",
        "timestamp",
        "rawData",
    ];

    /// Fields that carry a value on this record
    pub fn present_fields(&self) -> Vec<&'static str> {
        Self::FIELDS
            .iter()
            .copied()
            .filter(|f| match *f {
                "id" => !self.id.is_empty(),
                "companyId" => !self.company_id.is_empty(),
                "userId" => !self.user_id.is_empty(),
                "metricsType" => !self.metrics_type.is_empty(),
                "rawData" => self.raw_data.is_some(),
                _ => true,
            })
            .collect()
    }

    /// Path of the leaf this record was read from, relative to the metrics root
    pub fn store_path(&self) -> String {
        leaf_path(&self.company_id, &self.user_id, &self.metrics_type, &self.id)
    }
}

/// Build `{companyId}/{userId}/{metricsType}/{id}` below the metrics root.
///
/// A compound metrics type contributes two segments.
pub fn leaf_path(company_id: &str, user_id: &str, metrics_type: &str, id: &str) -> String {
    format!("{}/{}/{}/{}", company_id, user_id, metrics_type, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> MetricRecord {
        MetricRecord {
            id: "1000".to_string(),
            company_id: "c1".to_string(),
            user_id: "u1".to_string(),
            metrics_type: "fileDownloads/variantA".to_string(),
            timestamp: Utc.timestamp_millis_opt(1000).unwrap(),
            raw_data: None,
        }
    }

    #[test]
    fn test_metrics_type_from_compound_segment() {
        assert_eq!(
            MetricsType::from_segment("fileDownloads/variantA"),
            Some(MetricsType::FileDownloads)
        );
        assert_eq!(MetricsType::from_segment("urls"), Some(MetricsType::Urls));
        assert_eq!(MetricsType::from_segment("screenshots"), None);
    }

    #[test]
    fn test_present_fields_skips_null_payload() {
        let record = sample();
        let fields = record.present_fields();
        assert!(!fields.contains(&"rawData"));
        assert_eq!(fields.len(), 5);
    }

    #[test]
    fn test_store_path_expands_compound_type() {
        assert_eq!(
            sample().store_path(),
            "c1/u1/fileDownloads/variantA/1000"
        );
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["companyId"], "c1");
        assert_eq!(value["metricsType"], "fileDownloads/variantA");
        assert!(value["rawData"].is_null());
    }
}
