use crate::app::ports::{HierarchicalStore, Warehouse};
use crate::config::{Config, StoreBackend, WarehouseBackend};
use crate::error::Result;
use crate::infra::{FirebaseRestStore, MemoryTreeStore, MemoryWarehouse, SqliteWarehouse};
use crate::pipeline::orchestrator::{ArchivePolicy, Archiver};
use crate::pipeline::reader::{PathLayouts, TreeReader};
use crate::pipeline::sink::SinkAdapter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

/// Process-wide handles shared by the scheduler, the trigger and the CLI.
///
/// The archiver is built on first use and kept once built; a failed build
/// (missing store URL, unreadable warehouse directory) is retried next time.
pub struct AppContext {
    config: Config,
    archiver: OnceCell<Arc<Archiver>>,
}

impl AppContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            archiver: OnceCell::new(),
        }
    }

    /// Context around an already wired archiver
    pub fn with_archiver(config: Config, archiver: Arc<Archiver>) -> Self {
        Self {
            config,
            archiver: OnceCell::new_with(Some(archiver)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn archiver(&self) -> Result<Arc<Archiver>> {
        self.archiver
            .get_or_try_init(|| async { build_archiver(&self.config).map(Arc::new) })
            .await
            .cloned()
    }

    /// Defaults for runs that do not override them
    pub fn policy(&self) -> ArchivePolicy {
        let archive = &self.config.archive;
        ArchivePolicy {
            older_than: archive.older_than,
            unit: archive.unit,
            table: archive.table.clone(),
            schema: archive.schema.clone(),
            delete_after_archive: archive.delete_after_archive,
        }
    }
}

pub fn build_store(config: &Config) -> Result<Arc<dyn HierarchicalStore>> {
    let store = &config.store;
    Ok(match store.backend {
        StoreBackend::Firebase => Arc::new(FirebaseRestStore::new(
            &store.database_url,
            store.auth_token.clone(),
            store.timeout_secs,
        )?),
        StoreBackend::Memory => match &store.seed_file {
            Some(path) => Arc::new(MemoryTreeStore::from_json_file(path)?),
            None => Arc::new(MemoryTreeStore::new()),
        },
    })
}

pub fn build_warehouse(config: &Config) -> Result<Arc<dyn Warehouse>> {
    let warehouse = &config.warehouse;
    Ok(match warehouse.backend {
        WarehouseBackend::Sqlite => Arc::new(SqliteWarehouse::open(&warehouse.data_dir)?),
        WarehouseBackend::Memory => Arc::new(MemoryWarehouse::new()),
    })
}

/// Wire the reader, the sink and the orchestrator from configuration
pub fn build_archiver(config: &Config) -> Result<Archiver> {
    let store = build_store(config)?;
    let warehouse = build_warehouse(config)?;
    info!(
        "Archiver wired: store={:?} root={} warehouse={:?} dataset={}",
        config.store.backend, config.store.root, config.warehouse.backend, config.warehouse.dataset
    );

    let reader = TreeReader::with_root(
        store,
        PathLayouts::new(config.store.layouts.clone()),
        &config.store.root,
    );
    let sink = SinkAdapter::new(warehouse, &config.warehouse.dataset)
        .with_batch_size(config.warehouse.batch_size)
        .with_verification(config.warehouse.verify_counts);
    Ok(Archiver::new(
        reader,
        sink,
        Duration::from_secs(config.archive.stage_timeout_secs),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArchiveError;

    #[tokio::test]
    async fn test_missing_store_url_is_config_error() {
        let ctx = AppContext::new(Config::default());
        assert!(matches!(ctx.archiver().await, Err(ArchiveError::Config(_))));
    }

    #[tokio::test]
    async fn test_memory_backends_build_once() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Memory;
        config.warehouse.backend = WarehouseBackend::Memory;
        let ctx = AppContext::new(config);
        let first = ctx.archiver().await.unwrap();
        let second = ctx.archiver().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
