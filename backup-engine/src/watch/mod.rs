//! Change detection backends.
//!
//! Every backend turns filesystem activity under one root into
//! [`ChangeEvent`]s on a bounded channel. The orchestrator owns the receiving
//! end; a backend signals that it has fully stopped by dropping its sender.

pub mod cloud;
pub mod native;
pub mod polling;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{MonitorPathConfig, MonitorSettings, WatchMethod};
use crate::models::{ChangeEvent, EventSource};
use crate::utils::errors::WatchError;

pub use cloud::CloudPollWatch;
pub use native::NativeWatch;
pub use polling::PollingWatch;

/// What a backend watches.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub path_id: String,
    pub root: PathBuf,
    pub recursive: bool,
    /// Subtree that never produces events; the path's backup location
    pub exclude: Option<PathBuf>,
}

impl WatchTarget {
    pub fn new(path_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            path_id: path_id.into(),
            root: root.into(),
            recursive: false,
            exclude: None,
        }
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.as_deref().is_some_and(|ex| path.starts_with(ex))
    }
}

impl From<&MonitorPathConfig> for WatchTarget {
    fn from(config: &MonitorPathConfig) -> Self {
        Self {
            path_id: config.id.clone(),
            root: config.location.clone(),
            recursive: config.recursive,
            exclude: Some(config.backup_location.clone()),
        }
    }
}

pub trait WatchBackend: Send + Sync {
    /// Source tag stamped on every event this backend emits.
    fn source(&self) -> EventSource;

    /// Start emitting events for `target` into `tx`. Must be called from
    /// within a Tokio runtime. Fails with `BackendUnavailable` when the
    /// underlying facility cannot be bound.
    fn watch(&self, target: WatchTarget, tx: mpsc::Sender<ChangeEvent>) -> Result<(), WatchError>;

    /// Request shutdown. Idempotent; the backend drops its sender once its
    /// loop has observed the request.
    fn stop(&self);

    fn is_running(&self) -> bool;
}

/// Builds a backend for a resolved method.
pub trait BackendFactory: Send + Sync {
    fn create(
        &self,
        method: WatchMethod,
        config: &MonitorPathConfig,
    ) -> Result<Arc<dyn WatchBackend>, WatchError>;
}

/// Factory for the real backends, using the cadences from [`MonitorSettings`].
#[derive(Debug, Clone)]
pub struct SystemBackendFactory {
    cooperative_interval: Duration,
    polling_interval: Duration,
    cloud_interval: Duration,
}

impl SystemBackendFactory {
    pub fn new(settings: &MonitorSettings) -> Self {
        Self {
            cooperative_interval: settings.cooperative_interval(),
            polling_interval: settings.polling_interval(),
            cloud_interval: settings.cloud_interval(),
        }
    }
}

impl BackendFactory for SystemBackendFactory {
    fn create(
        &self,
        method: WatchMethod,
        _config: &MonitorPathConfig,
    ) -> Result<Arc<dyn WatchBackend>, WatchError> {
        let backend: Arc<dyn WatchBackend> = match method {
            WatchMethod::Native => Arc::new(NativeWatch::new()),
            WatchMethod::CooperativeWatch => Arc::new(PollingWatch::new(
                EventSource::CooperativeWatch,
                self.cooperative_interval,
            )),
            WatchMethod::Polling => {
                Arc::new(PollingWatch::new(EventSource::Polling, self.polling_interval))
            }
            WatchMethod::CloudPoll => Arc::new(CloudPollWatch::new(self.cloud_interval)),
            WatchMethod::Default => {
                return Err(WatchError::BackendUnavailable(
                    "DEFAULT must be resolved before creating a backend".into(),
                ))
            }
        };
        Ok(backend)
    }
}
