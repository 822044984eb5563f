//! Error types for the monitoring and backup engine.
//!
//! Every failure here is local to a path or an event. Only
//! [`MonitorError::NoPathsStarted`] is meant to reach the caller of a
//! start-all operation as a hard failure.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while registering, starting or stopping monitored paths.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Invalid monitor path '{path_id}': {reason}")]
    PathInvalid { path_id: String, reason: String },

    #[error("Monitor path '{0}' is disabled")]
    PathDisabled(String),

    #[error("Backup location {location:?} cannot be created: {source}")]
    BackupLocation {
        location: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No monitor path could be started ({0} attempted)")]
    NoPathsStarted(usize),

    #[error("Unknown monitor path: {0}")]
    UnknownPath(String),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Failures raised by a watch backend.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watch backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while turning a change event into a stored version.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Invalid source {path:?}: {reason}")]
    InvalidSource { path: PathBuf, reason: String },

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while materialising a stored version back onto disk.
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Stored artifact is missing: {0:?}")]
    ArtifactMissing(PathBuf),

    #[error("Unrecognized artifact format: {0:?}")]
    UnrecognizedFormat(PathBuf),

    #[error("Destination {path:?} is not writable: {reason}")]
    DestinationUnwritable { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by a [`crate::persistence::PersistenceStore`].
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Persistence backend error: {0}")]
    Backend(String),
}

impl From<anyhow::Error> for PersistenceError {
    fn from(err: anyhow::Error) -> Self {
        PersistenceError::Backend(format!("{err:#}"))
    }
}

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;
