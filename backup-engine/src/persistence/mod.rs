//! Durable record keeping consumed by the core.
//!
//! The core never assumes a schema. Implementations are synchronous (the
//! SQLite store in the daemon blocks on a pooled connection), so async callers
//! go through [`run_blocking`], which moves the call onto the blocking pool.
//! Failures are logged by [`record`] and never abort monitoring.

pub mod memory;

use crate::config::MonitorPathConfig;
use crate::models::{BackupJob, BackupStats, ChangeEvent, VersionRecord};
use crate::utils::errors::PersistenceError;
use std::sync::Arc;

pub use memory::InMemoryStore;

pub trait PersistenceStore: Send + Sync {
    fn add_or_update_path(&self, config: &MonitorPathConfig) -> Result<(), PersistenceError>;

    fn log_event(&self, event: &ChangeEvent) -> Result<(), PersistenceError>;

    fn log_version(&self, version: &VersionRecord) -> Result<(), PersistenceError>;

    fn record_job(&self, job: &BackupJob) -> Result<(), PersistenceError>;

    /// Newest first.
    fn recent_events(&self, limit: usize) -> Result<Vec<ChangeEvent>, PersistenceError>;

    fn stats_since(&self, window: chrono::Duration) -> Result<BackupStats, PersistenceError>;

    /// All versions, including logically deleted ones, oldest first.
    fn list_versions(&self, path_id: Option<&str>) -> Result<Vec<VersionRecord>, PersistenceError>;

    fn find_version(&self, id: &str) -> Result<Option<VersionRecord>, PersistenceError>;

    /// Logical delete. Returns how many records changed.
    fn mark_versions_deleted(&self, ids: &[String]) -> Result<usize, PersistenceError>;
}

pub type SharedStore = Arc<dyn PersistenceStore>;

/// Run a store call on the blocking pool.
pub async fn run_blocking<T, F>(store: &SharedStore, op: F) -> Result<T, PersistenceError>
where
    T: Send + 'static,
    F: FnOnce(&dyn PersistenceStore) -> Result<T, PersistenceError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| PersistenceError::Backend(format!("store task failed: {e}")))?
}

/// Run a store write and log, rather than propagate, any failure.
pub async fn record<F>(store: &SharedStore, what: &'static str, op: F) -> bool
where
    F: FnOnce(&dyn PersistenceStore) -> Result<(), PersistenceError> + Send + 'static,
{
    match run_blocking(store, op).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(operation = what, error = %e, "Persistence call failed");
            false
        }
    }
}
