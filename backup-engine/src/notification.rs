//! Live notification stream for the UI and other collaborators.
//!
//! Every stored version, forwarded change and dropped/failed path or event is
//! published here. A bounded per-path queue lets late subscribers replay what
//! they missed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{ChangeEvent, VersionRecord};

const BROADCAST_CAPACITY: usize = 1000;
const MAX_QUEUE_PER_PATH: usize = 100;

/// Category of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    PathInvalid,
    PathDisabled,
    BackendUnavailable,
    BackendFailure,
    BackupFailed,
    PersistenceFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub path_id: Option<String>,
    pub file: Option<PathBuf>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(kind: ErrorKind, path_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            path_id: path_id.map(str::to_string),
            file: None,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BackupNotification {
    #[serde(rename = "backup:version")]
    Version(VersionRecord),

    #[serde(rename = "monitor:change")]
    Change(ChangeEvent),

    #[serde(rename = "monitor:error")]
    Error(ErrorEvent),
}

impl BackupNotification {
    pub fn path_id(&self) -> Option<&str> {
        match self {
            BackupNotification::Version(v) => Some(&v.path_id),
            BackupNotification::Change(e) => Some(&e.path_id),
            BackupNotification::Error(e) => e.path_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedNotification {
    notification: BackupNotification,
    timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<BackupNotification>,
    queue: Arc<DashMap<String, VecDeque<QueuedNotification>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            queue: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackupNotification> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notification: BackupNotification) {
        if let Some(path_id) = notification.path_id() {
            let mut entry = self.queue.entry(path_id.to_string()).or_default();
            entry.push_back(QueuedNotification {
                notification: notification.clone(),
                timestamp: Utc::now(),
            });
            if entry.len() > MAX_QUEUE_PER_PATH {
                entry.pop_front();
            }
        }

        // No subscribers is normal for a headless daemon
        if let Ok(count) = self.tx.send(notification) {
            debug!("Published notification to {} subscriber(s)", count);
        }
    }

    pub fn error(&self, event: ErrorEvent) {
        self.publish(BackupNotification::Error(event));
    }

    /// Notifications queued for `path_id` strictly after `since`.
    pub fn replay(&self, path_id: &str, since: DateTime<Utc>) -> Vec<BackupNotification> {
        self.queue
            .get(path_id)
            .map(|q| {
                q.iter()
                    .filter(|m| m.timestamp > since)
                    .map(|m| m.notification.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
