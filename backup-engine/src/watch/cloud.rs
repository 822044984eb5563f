//! Low-frequency poller for provider sync folders.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use super::polling::{MissingRoot, PollingWatch};
use super::{WatchBackend, WatchTarget};
use crate::models::{ChangeEvent, EventSource};
use crate::utils::errors::WatchError;

pub struct CloudPollWatch {
    inner: PollingWatch,
}

impl CloudPollWatch {
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: PollingWatch::new(EventSource::CloudPoll, interval),
        }
    }

    /// Whether the sync folder is currently reachable.
    pub fn is_available(root: &Path) -> bool {
        root.is_dir()
    }
}

impl WatchBackend for CloudPollWatch {
    fn source(&self) -> EventSource {
        EventSource::CloudPoll
    }

    fn watch(&self, target: WatchTarget, tx: mpsc::Sender<ChangeEvent>) -> Result<(), WatchError> {
        if !Self::is_available(&target.root) {
            info!(
                path_id = %target.path_id,
                root = %target.root.display(),
                "Sync folder not available yet, polling until it appears"
            );
        }
        self.inner.start(target, tx, MissingRoot::Unavailable)
    }

    fn stop(&self) {
        self.inner.stop();
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

/// Default OneDrive folder under `home`. On macOS the File Provider location
/// wins when it exists.
pub fn default_sync_folder(home: &Path) -> PathBuf {
    if cfg!(target_os = "macos") {
        let provider = home.join("Library").join("CloudStorage").join("OneDrive");
        if provider.is_dir() {
            return provider;
        }
    }
    home.join("OneDrive")
}
