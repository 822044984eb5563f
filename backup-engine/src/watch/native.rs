//! OS change notification backend built on `notify`.
//!
//! `notify` blocks on the OS facility in its own thread and hands raw events
//! to a callback. The callback forwards them over an unbounded channel to an
//! async task that translates them into [`ChangeEvent`]s and pairs renames.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{WatchBackend, WatchTarget};
use crate::models::{ChangeEvent, EventSource, FileAction};
use crate::utils::errors::WatchError;

/// How long an old-name notification waits for its new name.
const RENAME_PAIR_WINDOW: Duration = Duration::from_millis(500);

pub struct NativeWatch {
    watcher: Mutex<Option<RecommendedWatcher>>,
    token: CancellationToken,
    running: Arc<AtomicBool>,
}

impl NativeWatch {
    pub fn new() -> Self {
        Self {
            watcher: Mutex::new(None),
            token: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for NativeWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchBackend for NativeWatch {
    fn source(&self) -> EventSource {
        EventSource::Native
    }

    fn watch(&self, target: WatchTarget, tx: mpsc::Sender<ChangeEvent>) -> Result<(), WatchError> {
        if self.token.is_cancelled() {
            return Err(WatchError::BackendUnavailable("backend already stopped".into()));
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Receiver gone means the backend stopped
            let _ = raw_tx.send(res);
        })
        .map_err(|e| WatchError::BackendUnavailable(e.to_string()))?;

        let mode = if target.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&target.root, mode)
            .map_err(|e| WatchError::BackendUnavailable(e.to_string()))?;

        {
            let mut slot = self
                .watcher
                .lock()
                .map_err(|_| WatchError::BackendUnavailable("watcher lock poisoned".into()))?;
            if slot.is_some() {
                return Err(WatchError::BackendUnavailable("backend already running".into()));
            }
            *slot = Some(watcher);
        }

        info!(path_id = %target.path_id, root = %target.root.display(), "Native watch started");
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(translate_loop(
            target,
            raw_rx,
            tx,
            self.token.clone(),
            Arc::clone(&self.running),
        ));
        Ok(())
    }

    fn stop(&self) {
        self.token.cancel();
        // Dropping the watcher releases the OS handle and ends its thread
        if let Ok(mut slot) = self.watcher.lock() {
            slot.take();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn translate_loop(
    target: WatchTarget,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    tx: mpsc::Sender<ChangeEvent>,
    token: CancellationToken,
    running: Arc<AtomicBool>,
) {
    let mut pairer = RenamePairer::new(RENAME_PAIR_WINDOW);

    loop {
        let mut changes = Vec::new();
        tokio::select! {
            _ = token.cancelled() => break,
            msg = raw_rx.recv() => match msg {
                None => break,
                Some(Ok(event)) => {
                    debug!(path_id = %target.path_id, "notify event: {:?}", event);
                    changes = translate(&event, &mut pairer, Instant::now());
                }
                Some(Err(e)) => warn!(path_id = %target.path_id, "Native watch error: {}", e),
            },
            _ = tokio::time::sleep(RENAME_PAIR_WINDOW), if pairer.has_pending() => {}
        }

        // Old names that never met a new name are reported on their own
        changes.extend(
            pairer
                .expire(Instant::now())
                .into_iter()
                .map(|p| (p, FileAction::Rename)),
        );

        for (path, action) in changes {
            if target.is_excluded(&path) {
                continue;
            }
            let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            let event = ChangeEvent::now(&target.path_id, &path, action, size, EventSource::Native);
            if tx.send(event).await.is_err() {
                debug!(path_id = %target.path_id, "receiver closed");
                running.store(false, Ordering::SeqCst);
                return;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    debug!(path_id = %target.path_id, "native translate loop ended");
}

/// Map one raw notification to zero or more semantic changes.
fn translate(event: &Event, pairer: &mut RenamePairer, now: Instant) -> Vec<(PathBuf, FileAction)> {
    let mut out = Vec::new();
    match event.kind {
        EventKind::Create(_) => {
            out.extend(files(&event.paths).map(|p| (p, FileAction::Create)));
        }
        EventKind::Remove(_) => {
            out.extend(event.paths.iter().cloned().map(|p| (p, FileAction::Delete)));
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match (mode, event.paths.as_slice()) {
            (RenameMode::From, [from, ..]) => pairer.hold(from.clone(), now),
            (RenameMode::To, [to, ..]) => out.push((pairer.to(to.clone()), FileAction::Rename)),
            (RenameMode::Both, [from, to, ..]) => {
                if let Some(to) = pairer.both(from, to.clone()) {
                    out.push((to, FileAction::Rename));
                }
            }
            (_, [path, ..]) => {
                // Platforms that cannot tell old from new report both sides
                // alike; only the side that exists is the new name
                if path.exists() {
                    out.push((pairer.to(path.clone()), FileAction::Rename));
                } else {
                    pairer.hold(path.clone(), now);
                }
            }
            _ => {}
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => {}
        EventKind::Modify(_) => {
            out.extend(files(&event.paths).map(|p| (p, FileAction::Modify)));
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }
    out
}

fn files(paths: &[PathBuf]) -> impl Iterator<Item = PathBuf> + '_ {
    paths.iter().filter(|p| !p.is_dir()).cloned()
}

/// Folds old-name/new-name notification pairs into a single rename.
///
/// An old name is held until a new name arrives or the window expires. A
/// combined notification that repeats an already reported new name is
/// swallowed.
#[derive(Debug)]
pub(crate) struct RenamePairer {
    pending: VecDeque<(PathBuf, Instant)>,
    last_target: Option<PathBuf>,
    window: Duration,
}

impl RenamePairer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            last_target: None,
            window,
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn hold(&mut self, from: PathBuf, now: Instant) {
        self.pending.push_back((from, now));
    }

    pub(crate) fn to(&mut self, to: PathBuf) -> PathBuf {
        self.pending.pop_front();
        self.last_target = Some(to.clone());
        to
    }

    pub(crate) fn both(&mut self, from: &Path, to: PathBuf) -> Option<PathBuf> {
        self.pending.retain(|(p, _)| p != from);
        if self.last_target.as_deref() == Some(to.as_path()) {
            self.last_target = None;
            return None;
        }
        Some(to)
    }

    pub(crate) fn expire(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut expired = Vec::new();
        while let Some((_, at)) = self.pending.front() {
            if now.duration_since(*at) < self.window {
                break;
            }
            if let Some((path, _)) = self.pending.pop_front() {
                expired.push(path);
            }
        }
        expired
    }
}
