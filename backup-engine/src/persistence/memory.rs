//! Process-local store, used by tests and by embedders without a database.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::PersistenceStore;
use crate::config::MonitorPathConfig;
use crate::models::{BackupJob, BackupStats, ChangeEvent, VersionRecord};
use crate::utils::errors::PersistenceError;

const MAX_EVENTS: usize = 10_000;

#[derive(Default)]
struct Tables {
    paths: HashMap<String, MonitorPathConfig>,
    events: VecDeque<ChangeEvent>,
    versions: Vec<VersionRecord>,
    jobs: Vec<BackupJob>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, PersistenceError> {
        self.tables
            .lock()
            .map_err(|_| PersistenceError::Backend("in-memory store poisoned".into()))
    }

    pub fn paths(&self) -> Vec<MonitorPathConfig> {
        self.tables()
            .map(|t| t.paths.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn jobs(&self) -> Vec<BackupJob> {
        self.tables().map(|t| t.jobs.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.tables()
            .map(|t| t.events.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl PersistenceStore for InMemoryStore {
    fn add_or_update_path(&self, config: &MonitorPathConfig) -> Result<(), PersistenceError> {
        self.tables()?.paths.insert(config.id.clone(), config.clone());
        Ok(())
    }

    fn log_event(&self, event: &ChangeEvent) -> Result<(), PersistenceError> {
        let mut tables = self.tables()?;
        tables.events.push_back(event.clone());
        if tables.events.len() > MAX_EVENTS {
            tables.events.pop_front();
        }
        Ok(())
    }

    fn log_version(&self, version: &VersionRecord) -> Result<(), PersistenceError> {
        self.tables()?.versions.push(version.clone());
        Ok(())
    }

    fn record_job(&self, job: &BackupJob) -> Result<(), PersistenceError> {
        self.tables()?.jobs.push(job.clone());
        Ok(())
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<ChangeEvent>, PersistenceError> {
        Ok(self.tables()?.events.iter().rev().take(limit).cloned().collect())
    }

    fn stats_since(&self, window: chrono::Duration) -> Result<BackupStats, PersistenceError> {
        let tables = self.tables()?;
        Ok(BackupStats::from_versions(&tables.versions, Utc::now() - window))
    }

    fn list_versions(&self, path_id: Option<&str>) -> Result<Vec<VersionRecord>, PersistenceError> {
        Ok(self
            .tables()?
            .versions
            .iter()
            .filter(|v| path_id.map_or(true, |id| v.path_id == id))
            .cloned()
            .collect())
    }

    fn find_version(&self, id: &str) -> Result<Option<VersionRecord>, PersistenceError> {
        Ok(self.tables()?.versions.iter().find(|v| v.id == id).cloned())
    }

    fn mark_versions_deleted(&self, ids: &[String]) -> Result<usize, PersistenceError> {
        let mut tables = self.tables()?;
        let mut changed = 0;
        for v in tables.versions.iter_mut() {
            if !v.is_deleted && ids.contains(&v.id) {
                v.is_deleted = true;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
