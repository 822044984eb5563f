//! Utility modules for the backup engine.

pub mod errors;
pub mod format;
pub mod logger;

pub use errors::{BackupError, MonitorError, PersistenceError, RestoreError, WatchError};
