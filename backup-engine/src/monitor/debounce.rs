//! Per-(path, file, action) duplicate suppression.
//!
//! Files are keyed by full path, so same-named files in different
//! subdirectories of a recursive watch never suppress each other.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::models::{ChangeEvent, FileAction};

/// Admissions between lazy prunes of the key map.
const PRUNE_EVERY: usize = 512;

type Key = (String, PathBuf, FileAction);

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_seen: DashMap<Key, DateTime<Utc>>,
    admitted: AtomicUsize,
}

impl Debouncer {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(1)),
            last_seen: DashMap::new(),
            admitted: AtomicUsize::new(0),
        }
    }

    /// False when an event with the same key was admitted less than one
    /// window earlier. A dropped duplicate does not extend the window.
    pub fn admit(&self, event: &ChangeEvent) -> bool {
        let key = (event.path_id.clone(), event.full_path.clone(), event.action);
        let admitted = match self.last_seen.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if event.timestamp - *slot.get() < self.window {
                    false
                } else {
                    slot.insert(event.timestamp);
                    true
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(event.timestamp);
                true
            }
        };

        if admitted && self.admitted.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune(event.timestamp);
        }
        admitted
    }

    /// Forget keys whose window closed before `now`.
    pub fn prune(&self, now: DateTime<Utc>) {
        let window = self.window;
        self.last_seen.retain(|_, seen| now - *seen < window);
    }

    /// Forget every key for one path.
    pub fn forget_path(&self, path_id: &str) {
        self.last_seen.retain(|(id, _, _), _| id != path_id);
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}
