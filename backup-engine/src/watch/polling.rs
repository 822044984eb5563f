//! Snapshot-diff polling backend.
//!
//! Serves both the cooperative watch (5 s) and the lightweight polling
//! variant (3 s); only the cadence and source tag differ. The cloud poller
//! reuses [`poll_loop`] with a different missing-root policy.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{WatchBackend, WatchTarget};
use crate::fs::{snapshot_directory, Snapshot};
use crate::models::{ChangeEvent, EventSource, FileAction};
use crate::utils::errors::WatchError;

/// What to do when the root cannot be scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MissingRoot {
    /// Log a warning each tick.
    Warn,
    /// Treat as temporarily unavailable; log once per outage.
    Unavailable,
}

pub struct PollingWatch {
    source: EventSource,
    interval: Duration,
    token: CancellationToken,
    running: Arc<AtomicBool>,
}

impl PollingWatch {
    pub fn new(source: EventSource, interval: Duration) -> Self {
        Self {
            source,
            interval: interval.max(Duration::from_millis(1)),
            token: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn start(
        &self,
        target: WatchTarget,
        tx: mpsc::Sender<ChangeEvent>,
        missing: MissingRoot,
    ) -> Result<(), WatchError> {
        if self.token.is_cancelled() {
            return Err(WatchError::BackendUnavailable("backend already stopped".into()));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WatchError::BackendUnavailable("backend already running".into()));
        }

        info!(
            path_id = %target.path_id,
            root = %target.root.display(),
            source = %self.source,
            "Polling every {:?}",
            self.interval
        );

        tokio::spawn(poll_loop(
            target,
            tx,
            self.source,
            self.interval,
            missing,
            self.token.clone(),
            Arc::clone(&self.running),
        ));
        Ok(())
    }
}

impl WatchBackend for PollingWatch {
    fn source(&self) -> EventSource {
        self.source
    }

    fn watch(&self, target: WatchTarget, tx: mpsc::Sender<ChangeEvent>) -> Result<(), WatchError> {
        self.start(target, tx, MissingRoot::Warn)
    }

    fn stop(&self) {
        self.token.cancel();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Tick, snapshot, diff, emit. The first successful scan only seeds the
/// snapshot so pre-existing files never produce CREATE events.
pub(crate) async fn poll_loop(
    target: WatchTarget,
    tx: mpsc::Sender<ChangeEvent>,
    source: EventSource,
    interval: Duration,
    missing: MissingRoot,
    token: CancellationToken,
    running: Arc<AtomicBool>,
) {
    let mut previous: Option<Snapshot> = None;
    let mut unavailable = false;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'ticks: loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let root = target.root.clone();
        let recursive = target.recursive;
        let scan = tokio::task::spawn_blocking(move || snapshot_directory(&root, recursive)).await;

        let current = match scan {
            Ok(Ok(current)) => current,
            Ok(Err(e)) => {
                match missing {
                    MissingRoot::Warn => {
                        warn!(path_id = %target.path_id, root = %target.root.display(), "Scan failed: {}", e)
                    }
                    MissingRoot::Unavailable if !unavailable => {
                        info!(path_id = %target.path_id, root = %target.root.display(), "Sync folder unavailable: {}", e)
                    }
                    MissingRoot::Unavailable => {}
                }
                unavailable = true;
                continue;
            }
            Err(e) => {
                warn!(path_id = %target.path_id, "Scan task failed: {}", e);
                continue;
            }
        };

        if unavailable {
            info!(path_id = %target.path_id, "Root available again");
            unavailable = false;
        }

        match previous.as_ref() {
            None => debug!(path_id = %target.path_id, files = current.len(), "seeded snapshot"),
            Some(prev) => {
                let changes = diff_snapshots(prev, &current)
                    .into_iter()
                    .filter(|(path, _, _)| !target.is_excluded(path));
                for (path, action, size) in changes {
                    let event = ChangeEvent::now(&target.path_id, &path, action, size, source);
                    tokio::select! {
                        _ = token.cancelled() => break 'ticks,
                        sent = tx.send(event) => {
                            if sent.is_err() {
                                debug!(path_id = %target.path_id, "receiver closed");
                                break 'ticks;
                            }
                        }
                    }
                }
            }
        }
        previous = Some(current);
    }

    running.store(false, Ordering::SeqCst);
    debug!(path_id = %target.path_id, source = %source, "poll loop ended");
}

/// Changes between two snapshots, ordered by path.
pub fn diff_snapshots(previous: &Snapshot, current: &Snapshot) -> Vec<(PathBuf, FileAction, u64)> {
    let mut changes = Vec::new();

    for (path, stamp) in current {
        match previous.get(path) {
            None => changes.push((path.clone(), FileAction::Create, stamp.size)),
            Some(old) if old != stamp => changes.push((path.clone(), FileAction::Modify, stamp.size)),
            Some(_) => {}
        }
    }
    for (path, stamp) in previous {
        if !current.contains_key(path) {
            changes.push((path.clone(), FileAction::Delete, stamp.size));
        }
    }

    changes.sort_by(|a, b| a.0.cmp(&b.0));
    changes
}
