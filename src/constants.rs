//! Names shared across the store walker, the warehouse adapter and the trigger surface.

// Root collection in the hierarchical store
pub const METRICS_ROOT: &str = "metrics";

// Event categories written by the browser extension
pub const CLIPBOARD_EVENTS: &str = "clipboardEvents";
pub const FILE_DOWNLOADS: &str = "fileDownloads";
pub const FILE_UPLOADS: &str = "fileUploads";
pub const URLS: &str = "urls";

// Warehouse defaults
pub const DEFAULT_DATASET: &str = "telemetry_archive";
pub const DEFAULT_TABLE: &str = "metrics_archive";
pub const DEFAULT_SCHEMA: &str = "metrics";
pub const PARTITION_FIELD: &str = "timestamp";
pub const DEFAULT_BATCH_SIZE: usize = 100;

// Suffix of the view that collapses duplicate rows left by retried runs
pub const DEDUP_VIEW_SUFFIX: &str = "_latest";

// How many child keys the depth probe inspects before deciding
pub const DEPTH_PROBE_SAMPLE: usize = 10;

/// Get all event categories the extension is known to write
pub fn get_archive_types() -> Vec<&'static str> {
    vec![CLIPBOARD_EVENTS, FILE_DOWNLOADS, FILE_UPLOADS, URLS]
}
