//! Application state shared across handlers.

use crate::hasher::HashWorker;
use crate::inspect::{ArchiveTool, SevenZipTool};
use crate::jobs::JobQueue;
use crate::notify::{LogNotifier, Notifier};
use crate::scan::{ClamScanner, MalwareScanner};
use crate::spool::Spool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use stowage_core::config::AppConfig;
use stowage_metadata::MetadataStore;
use stowage_storage::ObjectStore;
use uuid::Uuid;

/// Shared application state. Cheap to clone: everything is behind an Arc.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub hasher: Arc<HashWorker>,
    pub jobs: JobQueue,
    pub spool: Spool,
    pub inspector: Arc<dyn ArchiveTool>,
    pub scanner: Arc<dyn MalwareScanner>,
    pub notifier: Arc<dyn Notifier>,
    /// Per-session write locks serializing spool mutations.
    session_locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl AppState {
    /// Create state with the configured external tools.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        hasher: Arc<HashWorker>,
        jobs: JobQueue,
    ) -> Self {
        let inspector: Arc<dyn ArchiveTool> =
            Arc::new(SevenZipTool::new(config.vetting.sevenzip_path.clone()));
        let scanner: Arc<dyn MalwareScanner> =
            Arc::new(ClamScanner::new(config.vetting.clamscan_path.clone()));
        Self::with_vetting(
            config,
            storage,
            metadata,
            hasher,
            jobs,
            inspector,
            scanner,
            Arc::new(LogNotifier),
        )
    }

    /// Create state with explicit vetting components (tests inject
    /// mock tools here).
    #[allow(clippy::too_many_arguments)]
    pub fn with_vetting(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        hasher: Arc<HashWorker>,
        jobs: JobQueue,
        inspector: Arc<dyn ArchiveTool>,
        scanner: Arc<dyn MalwareScanner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let spool = Spool::new(config.upload.spool_dir.clone());
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            hasher,
            jobs,
            spool,
            inspector,
            scanner,
            notifier,
            session_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get (or create) the write lock for a session.
    pub fn session_lock(&self, upload_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(upload_id).or_default().clone()
    }

    /// Drop the write lock entry once a session is terminal.
    pub fn release_session_lock(&self, upload_id: Uuid) {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.remove(&upload_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lock_is_shared_per_session() {
        let locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let id = Uuid::new_v4();

        let a = locks.lock().unwrap().entry(id).or_default().clone();
        let b = locks.lock().unwrap().entry(id).or_default().clone();
        assert!(Arc::ptr_eq(&a, &b));

        let other = locks.lock().unwrap().entry(Uuid::new_v4()).or_default().clone();
        assert!(!Arc::ptr_eq(&a, &other));
    }
}
