//! Application configuration
//!
//! Loaded from a TOML file (every section optional), then overlaid with
//! environment variables. Secrets come from the environment only.

use crate::constants;
use crate::error::{ArchiveError, Result};
use crate::pipeline::cutoff::CutoffUnit;
use crate::pipeline::reader::PathLayout;
use crate::pipeline::sql::validate_identifier;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub warehouse: WarehouseConfig,
    pub archive: ArchiveConfig,
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Firebase,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: String,
    /// Root node holding the company subtrees
    pub root: String,
    /// JSON export used to seed the memory backend
    pub seed_file: Option<PathBuf>,
    pub timeout_secs: u64,
    /// Per metrics type path shape; unlisted types use the built-in default
    pub layouts: HashMap<String, PathLayout>,
    #[serde(skip)]
    pub auth_token: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Firebase,
            database_url: String::new(),
            root: constants::METRICS_ROOT.to_string(),
            seed_file: None,
            timeout_secs: 30,
            layouts: HashMap::new(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub backend: WarehouseBackend,
    pub dataset: String,
    pub data_dir: PathBuf,
    pub batch_size: usize,
    /// Compare row counts before and after a load
    pub verify_counts: bool,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            backend: WarehouseBackend::Sqlite,
            dataset: constants::DEFAULT_DATASET.to_string(),
            data_dir: PathBuf::from("data/warehouse"),
            batch_size: constants::DEFAULT_BATCH_SIZE,
            verify_counts: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub table: String,
    pub schema: String,
    /// Age threshold; zero archives everything
    pub older_than: u32,
    pub unit: CutoffUnit,
    pub delete_after_archive: bool,
    pub stage_timeout_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            table: constants::DEFAULT_TABLE.to_string(),
            schema: constants::DEFAULT_SCHEMA.to_string(),
            older_than: 30,
            unit: CutoffUnit::Days,
            delete_after_archive: true,
            stage_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub run_on_init: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 60,
            run_on_init: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind: String,
    /// Also require the API key for `GET /api/archive`
    pub require_key_for_info: bool,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8080".to_string(),
            require_key_for_info: false,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address for the Prometheus exporter; unset keeps metrics in-process
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: String,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "telemetry_archiver=info".to_string(),
            dir: "logs".to_string(),
            file_name: "archiver.log".to_string(),
        }
    }
}

impl Config {
    /// Load `path` (or `config.toml` when present), then the environment.
    ///
    /// An explicitly named file must exist; the default one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ArchiveError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay secrets and deployment overrides
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(token) = non_empty("FIREBASE_AUTH_TOKEN") {
            self.store.auth_token = Some(token);
        }
        if let Some(url) = non_empty("FIREBASE_DATABASE_URL") {
            self.store.database_url = url;
        }
        if let Some(key) = non_empty("ARCHIVE_API_KEY") {
            self.server.api_key = Some(key);
        }
        if let Some(bind) = non_empty("ARCHIVE_BIND") {
            self.server.bind = bind;
        }
        if let Some(listen) = non_empty("ARCHIVE_METRICS_ADDR") {
            self.metrics.listen = Some(listen);
        }
    }

    /// Structural checks; adapter-specific requirements such as the store
    /// URL are checked when the adapter is built
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.warehouse.dataset)
            .map_err(|_| invalid("warehouse.dataset", &self.warehouse.dataset))?;
        validate_identifier(&self.archive.table)
            .map_err(|_| invalid("archive.table", &self.archive.table))?;
        crate::pipeline::schema::get_schema(&self.archive.schema)?;
        if self.warehouse.batch_size == 0 {
            return Err(ArchiveError::Config(
                "warehouse.batch_size must be at least 1".to_string(),
            ));
        }
        if self.scheduler.interval_minutes == 0 {
            return Err(ArchiveError::Config(
                "scheduler.interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.archive.stage_timeout_secs == 0 {
            return Err(ArchiveError::Config(
                "archive.stage_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.store.root.trim_matches('/').is_empty() {
            return Err(ArchiveError::Config("store.root must not be empty".to_string()));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> ArchiveError {
    ArchiveError::Config(format!(
        "{} '{}' must match ^[A-Za-z_][A-Za-z0-9_]*$",
        key, value
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.archive.table, "metrics_archive");
        assert_eq!(config.warehouse.batch_size, 100);
        assert_eq!(config.archive.unit, CutoffUnit::Days);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [store]
            backend = "memory"

            [store.layouts]
            fileDownloads = "nested"

            [archive]
            older_than = 0
            unit = "hours"
            "#,
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.layouts["fileDownloads"], PathLayout::Nested);
        assert_eq!(config.archive.older_than, 0);
        assert_eq!(config.archive.unit, CutoffUnit::Hours);
        assert_eq!(config.scheduler.interval_minutes, 60);
    }

    #[test]
    fn test_env_supplies_secrets() {
        let mut config = Config::default();
        let env: HashMap<&str, &str> = [
            ("FIREBASE_AUTH_TOKEN", "secret-token"),
            ("ARCHIVE_API_KEY", "k1"),
            ("ARCHIVE_BIND", "127.0.0.1:9000"),
            ("FIREBASE_DATABASE_URL", "  "),
        ]
        .into_iter()
        .collect();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.store.auth_token.as_deref(), Some("secret-token"));
        assert_eq!(config.server.api_key.as_deref(), Some("k1"));
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert!(config.store.database_url.is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.archive.table = "metrics-archive".to_string();
        assert!(matches!(config.validate(), Err(ArchiveError::Config(_))));

        let mut config = Config::default();
        config.archive.schema = "events".to_string();
        assert!(matches!(config.validate(), Err(ArchiveError::UnknownSchema(_))));
    }

    #[test]
    fn test_from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nrequire_key_for_info = true").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert!(config.server.require_key_for_info);
        assert!(Config::from_file(Path::new("/nonexistent/archiver.toml")).is_err());
    }
}
