//! Backup Engine Library
//!
//! Hybrid file monitoring and content-addressed backup: watch backends,
//! the monitor orchestrator, the event pipeline and the backup engine.

pub mod config;
pub mod engine;
pub mod fs;
pub mod models;
pub mod monitor;
pub mod notification;
pub mod persistence;
pub mod pipeline;
pub mod utils;
pub mod watch;

// Re-export commonly used types
pub use config::{EngineSettings, MonitorPathConfig, MonitorSettings, PathClass, RetentionPolicy, WatchMethod};
pub use engine::BackupEngine;
pub use monitor::{MonitorOrchestrator, TaskInfo, TaskState};
pub use notification::{BackupNotification, NotificationHub};
pub use persistence::{PersistenceStore, SharedStore};
pub use pipeline::EventPipeline;
pub use utils::errors::{BackupError, MonitorError, PersistenceError, RestoreError, WatchError};
