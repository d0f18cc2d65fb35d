use crate::error::{ArchiveError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Tables with an archive run in flight.
///
/// A second run against the same table is rejected rather than queued.
#[derive(Debug, Clone, Default)]
pub struct RunLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

/// Releases its table when dropped
#[derive(Debug)]
pub struct RunGuard {
    table: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, table: &str) -> Result<RunGuard> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        if !held.insert(table.to_string()) {
            return Err(ArchiveError::RunInProgress(table.to_string()));
        }
        debug!("Acquired run lock for {}", table);
        Ok(RunGuard {
            table: table.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, table: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(table)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        held.remove(&self.table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected_until_release() {
        let locks = RunLocks::new();
        let guard = locks.try_acquire("metrics_archive").unwrap();
        assert!(matches!(
            locks.try_acquire("metrics_archive"),
            Err(ArchiveError::RunInProgress(_))
        ));
        assert!(locks.try_acquire("other_table").is_ok());
        drop(guard);
        assert!(!locks.is_held("metrics_archive"));
        assert!(locks.try_acquire("metrics_archive").is_ok());
    }
}
