use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::WatchMethod;

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileAction {
    Create,
    Modify,
    Delete,
    Rename,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Create => "CREATE",
            FileAction::Modify => "MODIFY",
            FileAction::Delete => "DELETE",
            FileAction::Rename => "RENAME",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATE" => Some(FileAction::Create),
            "MODIFY" => Some(FileAction::Modify),
            "DELETE" => Some(FileAction::Delete),
            "RENAME" => Some(FileAction::Rename),
            _ => None,
        }
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The backend that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    Native,
    CooperativeWatch,
    Polling,
    CloudPoll,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Native => "NATIVE",
            EventSource::CooperativeWatch => "COOPERATIVE_WATCH",
            EventSource::Polling => "POLLING",
            EventSource::CloudPoll => "CLOUD_POLL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NATIVE" => Some(EventSource::Native),
            "COOPERATIVE_WATCH" => Some(EventSource::CooperativeWatch),
            "POLLING" => Some(EventSource::Polling),
            "CLOUD_POLL" => Some(EventSource::CloudPoll),
            _ => None,
        }
    }

    /// Source a resolved (non-`Default`) method reports its events under.
    pub fn for_method(method: WatchMethod) -> Option<Self> {
        match method {
            WatchMethod::Native => Some(EventSource::Native),
            WatchMethod::CooperativeWatch => Some(EventSource::CooperativeWatch),
            WatchMethod::Polling => Some(EventSource::Polling),
            WatchMethod::CloudPoll => Some(EventSource::CloudPoll),
            WatchMethod::Default => None,
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single detected change. Produced once by a backend, consumed once by the
/// pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path_id: String,
    pub full_path: PathBuf,
    pub file_name: String,
    pub action: FileAction,
    pub size: u64,
    pub source: EventSource,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Build an event stamped with the current time.
    pub fn now(
        path_id: &str,
        full_path: &Path,
        action: FileAction,
        size: u64,
        source: EventSource,
    ) -> Self {
        Self {
            path_id: path_id.to_string(),
            full_path: full_path.to_path_buf(),
            file_name: full_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            action,
            size,
            source,
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
