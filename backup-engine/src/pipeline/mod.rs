//! Per-event filtering and dispatch to the backup engine.

pub mod filter;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::config::{MonitorPathConfig, MonitorSettings};
use crate::engine::BackupEngine;
use crate::models::{ChangeEvent, FileAction, VersionRecord};
use crate::notification::{BackupNotification, ErrorEvent, ErrorKind, NotificationHub};

pub use filter::NoiseFilter;

/// What happened to one event.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Arrived inside the startup grace window
    DroppedGrace,
    DroppedNoise,
    /// Audit only; no backup attempted
    Recorded,
    Stored(VersionRecord),
    Failed(String),
}

pub struct EventPipeline {
    grace: Duration,
    filter: NoiseFilter,
    engine: Arc<BackupEngine>,
    notifier: NotificationHub,
    started: DashMap<String, DateTime<Utc>>,
}

impl EventPipeline {
    pub fn new(settings: &MonitorSettings, engine: Arc<BackupEngine>, notifier: NotificationHub) -> Self {
        Self {
            grace: Duration::from_std(settings.startup_grace()).unwrap_or_else(|_| Duration::zero()),
            filter: NoiseFilter::new(settings.ignored_names.iter().cloned()),
            engine,
            notifier,
            started: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<BackupEngine> {
        &self.engine
    }

    /// Open the startup grace window for `path_id`.
    pub fn mark_started(&self, path_id: &str) {
        self.mark_started_at(path_id, Utc::now());
    }

    pub fn mark_started_at(&self, path_id: &str, at: DateTime<Utc>) {
        self.started.insert(path_id.to_string(), at);
    }

    fn in_grace(&self, event: &ChangeEvent) -> bool {
        self.started
            .get(&event.path_id)
            .map_or(false, |start| event.timestamp - *start < self.grace)
    }

    /// Filter and dispatch one event. Never fails; failures are reported on
    /// the notification stream and in the job log.
    pub async fn handle(&self, config: &MonitorPathConfig, event: &ChangeEvent) -> PipelineOutcome {
        if self.in_grace(event) {
            debug!(path_id = %event.path_id, file = %event.file_name, "dropped inside startup grace");
            return PipelineOutcome::DroppedGrace;
        }
        if self.filter.is_noise(&event.file_name) {
            debug!(path_id = %event.path_id, file = %event.file_name, "dropped noise");
            return PipelineOutcome::DroppedNoise;
        }

        if event.action == FileAction::Delete {
            info!(path_id = %event.path_id, file = %event.file_name, "File deleted");
            return PipelineOutcome::Recorded;
        }
        if event.action == FileAction::Rename
            && !tokio::fs::try_exists(&event.full_path).await.unwrap_or(false)
        {
            // Old name whose new name lies outside the watched tree
            info!(path_id = %event.path_id, file = %event.file_name, "File moved away");
            return PipelineOutcome::Recorded;
        }

        match self.engine.process(config, &event.full_path, event.action).await {
            Ok(version) => {
                self.notifier.publish(BackupNotification::Version(version.clone()));
                PipelineOutcome::Stored(version)
            }
            Err(e) => {
                let reason = e.to_string();
                self.notifier.error(
                    ErrorEvent::new(ErrorKind::BackupFailed, Some(&event.path_id), reason.clone())
                        .with_file(event.full_path.clone()),
                );
                PipelineOutcome::Failed(reason)
            }
        }
    }
}
