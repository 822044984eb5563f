//! Monitor orchestration.
//!
//! The orchestrator owns one [`MonitorTask`] per monitored path. Each task
//! pairs a watch backend with a forwarder that debounces the backend's events,
//! records them, and hands them to the [`EventPipeline`] one at a time, so a
//! path's backup history follows its detection order. Backups across paths
//! share a bounded worker pool.

pub mod debounce;
pub mod task;

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::{MonitorPathConfig, MonitorSettings, WatchMethod};
use crate::engine::BackupEngine;
use crate::models::ChangeEvent;
use crate::notification::{BackupNotification, ErrorEvent, ErrorKind, NotificationHub};
use crate::persistence::{record, SharedStore};
use crate::pipeline::EventPipeline;
use crate::utils::errors::{MonitorError, Result, WatchError};
use crate::watch::{BackendFactory, SystemBackendFactory, WatchBackend, WatchTarget};

pub use debounce::Debouncer;
pub use task::{MonitorTask, TaskInfo, TaskState};

/// Locations the desktop UI stores before the user picks a folder.
const PLACEHOLDER_LOCATIONS: &[&str] = &["Select folder...", "Select backup folder..."];

#[derive(Clone)]
pub struct MonitorOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    settings: MonitorSettings,
    global_method: RwLock<WatchMethod>,
    tasks: Mutex<HashMap<String, Arc<MonitorTask>>>,
    factory: Arc<dyn BackendFactory>,
    pipeline: Arc<EventPipeline>,
    debouncer: Debouncer,
    workers: Semaphore,
    store: SharedStore,
    notifier: NotificationHub,
}

impl MonitorOrchestrator {
    pub fn new(settings: MonitorSettings, engine: Arc<BackupEngine>, notifier: NotificationHub) -> Self {
        let factory = Arc::new(SystemBackendFactory::new(&settings));
        Self::with_factory(settings, engine, notifier, factory)
    }

    pub fn with_factory(
        settings: MonitorSettings,
        engine: Arc<BackupEngine>,
        notifier: NotificationHub,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        let store = Arc::clone(engine.store());
        let pipeline = Arc::new(EventPipeline::new(&settings, engine, notifier.clone()));
        let global = resolve_global(settings.global_method);
        Self {
            inner: Arc::new(Inner {
                global_method: RwLock::new(global),
                debouncer: Debouncer::new(settings.debounce_window()),
                workers: Semaphore::new(settings.max_concurrent_backups.max(1)),
                tasks: Mutex::new(HashMap::new()),
                factory,
                pipeline,
                store,
                notifier,
                settings,
            }),
        }
    }

    pub fn pipeline(&self) -> &Arc<EventPipeline> {
        &self.inner.pipeline
    }

    pub fn notifier(&self) -> &NotificationHub {
        &self.inner.notifier
    }

    pub fn global_method(&self) -> WatchMethod {
        self.inner
            .global_method
            .read()
            .map(|m| *m)
            .unwrap_or(WatchMethod::CooperativeWatch)
    }

    /// Validate, resolve and start one path. Replaces a running task with
    /// the same id.
    pub async fn add_path(&self, config: MonitorPathConfig) -> Result<TaskInfo> {
        if let Err(e) = validate(&config).await {
            let kind = match e {
                MonitorError::PathDisabled(_) => ErrorKind::PathDisabled,
                _ => ErrorKind::PathInvalid,
            };
            warn!(path_id = %config.id, "Rejected monitor path: {}", e);
            self.inner
                .notifier
                .error(ErrorEvent::new(kind, Some(&config.id), e.to_string()).with_file(config.location.clone()));
            return Err(e);
        }

        let started = {
            let mut tasks = self.inner.tasks.lock().await;
            self.start_task(&mut tasks, config.clone())
        };
        let task = match started {
            Ok(task) => task,
            Err(e) => {
                error!(path_id = %config.id, "Watch backend failed to start: {}", e);
                self.inner
                    .notifier
                    .error(ErrorEvent::new(ErrorKind::BackendFailure, Some(&config.id), e.to_string()));
                return Err(e);
            }
        };

        record(&self.inner.store, "add_or_update_path", move |s| s.add_or_update_path(&config)).await;
        Ok(task.info())
    }

    /// Start every path. Fails only when none could be started.
    pub async fn start_all(&self, configs: Vec<MonitorPathConfig>) -> Result<Vec<TaskInfo>> {
        let attempted = configs.len();
        let mut started = Vec::new();
        for config in configs {
            let id = config.id.clone();
            match self.add_path(config).await {
                Ok(info) => started.push(info),
                Err(e) => debug!(path_id = %id, "not started: {}", e),
            }
        }

        if started.is_empty() {
            return Err(MonitorError::NoPathsStarted(attempted));
        }
        info!("Monitoring {} of {} path(s)", started.len(), attempted);
        Ok(started)
    }

    /// Stop and deregister one path. The returned task resolves
    /// [`MonitorTask::stopped`] once its backend has wound down.
    pub async fn remove_path(&self, path_id: &str) -> Result<Arc<MonitorTask>> {
        let task = self
            .inner
            .tasks
            .lock()
            .await
            .remove(path_id)
            .ok_or_else(|| MonitorError::UnknownPath(path_id.to_string()))?;

        task.stop();
        self.inner.debouncer.forget_path(path_id);
        info!(path_id = %path_id, "Monitoring stopped");
        Ok(task)
    }

    /// Stop and deregister every path. Returns immediately; in-flight backups
    /// finish in the background.
    pub async fn stop_all(&self) -> Vec<Arc<MonitorTask>> {
        let drained: Vec<Arc<MonitorTask>> = self.inner.tasks.lock().await.drain().map(|(_, t)| t).collect();
        for task in &drained {
            task.stop();
            self.inner.debouncer.forget_path(task.path_id());
        }
        if !drained.is_empty() {
            info!("Stopped {} monitor task(s)", drained.len());
        }
        drained
    }

    /// Wait for every given task to reach `Stopped`.
    pub async fn wait_stopped(tasks: &[Arc<MonitorTask>]) {
        join_all(tasks.iter().map(|t| t.stopped())).await;
    }

    /// Change the method used for `default` paths. Running paths that were
    /// started from the previous default are restarted; explicit methods are
    /// left alone. Returns the restarted tasks.
    pub async fn set_global_method(&self, method: WatchMethod) -> Vec<TaskInfo> {
        let method = resolve_global(method);
        let previous = {
            let mut global = match self.inner.global_method.write() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *global, method)
        };
        if previous == method {
            return Vec::new();
        }
        info!("Global watch method {} -> {}", previous, method);

        let mut tasks = self.inner.tasks.lock().await;
        let affected: Vec<String> = tasks
            .values()
            .filter(|t| t.from_default() && t.method() != method)
            .map(|t| t.path_id().to_string())
            .collect();

        let mut restarted = Vec::new();
        for id in affected {
            let Some(old) = tasks.remove(&id) else { continue };
            old.stop();

            let mut config = old.config().clone();
            config.method = WatchMethod::Default;
            match self.start_task(&mut tasks, config) {
                Ok(task) => restarted.push(task.info()),
                Err(e) => {
                    error!(path_id = %id, "Restart with {} failed: {}", method, e);
                    self.inner
                        .notifier
                        .error(ErrorEvent::new(ErrorKind::BackendFailure, Some(&id), e.to_string()));
                }
            }
        }
        restarted
    }

    pub async fn tasks(&self) -> Vec<TaskInfo> {
        let tasks = self.inner.tasks.lock().await;
        let mut infos: Vec<TaskInfo> = tasks.values().map(|t| t.info()).collect();
        infos.sort_by(|a, b| a.path_id.cmp(&b.path_id));
        infos
    }

    /// Resolve DEFAULT, launch the backend and spawn the forwarder.
    fn start_task(
        &self,
        tasks: &mut HashMap<String, Arc<MonitorTask>>,
        config: MonitorPathConfig,
    ) -> Result<Arc<MonitorTask>> {
        let from_default = config.method == WatchMethod::Default;
        let mut resolved = config;
        if from_default {
            resolved.method = self.global_method();
        }

        let (tx, rx) = mpsc::channel(self.inner.settings.channel_capacity.max(1));
        let backend = self.launch(&resolved, tx)?;
        let task = Arc::new(MonitorTask::new(resolved, from_default, backend));
        task.transition(TaskState::Running);
        self.inner.pipeline.mark_started(task.path_id());

        tokio::spawn(forward(Arc::clone(&self.inner), Arc::clone(&task), rx));

        let info = task.info();
        info!(
            path_id = %info.path_id,
            method = %info.method,
            source = %info.source,
            from_default = info.from_default,
            "Monitoring started"
        );
        if let Some(old) = tasks.insert(info.path_id, Arc::clone(&task)) {
            old.stop();
        }
        Ok(task)
    }

    /// Build and start the backend, falling back from native to the
    /// cooperative watch when the OS facility is unavailable.
    fn launch(&self, config: &MonitorPathConfig, tx: mpsc::Sender<ChangeEvent>) -> Result<Arc<dyn WatchBackend>> {
        let backend = self.inner.factory.create(config.method, config)?;
        match backend.watch(WatchTarget::from(config), tx.clone()) {
            Ok(()) => Ok(backend),
            Err(WatchError::BackendUnavailable(reason)) if config.method == WatchMethod::Native => {
                warn!(path_id = %config.id, "Native watch unavailable ({}), using cooperative watch", reason);
                self.inner.notifier.error(ErrorEvent::new(
                    ErrorKind::BackendUnavailable,
                    Some(&config.id),
                    format!("native watch unavailable: {reason}"),
                ));
                let fallback = self.inner.factory.create(WatchMethod::CooperativeWatch, config)?;
                fallback.watch(WatchTarget::from(config), tx)?;
                Ok(fallback)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Drain one task's backend channel until the backend drops its sender.
async fn forward(inner: Arc<Inner>, task: Arc<MonitorTask>, mut rx: mpsc::Receiver<ChangeEvent>) {
    while let Some(event) = rx.recv().await {
        if !task.is_running() {
            debug!(path_id = %event.path_id, file = %event.file_name, "dropped after stop");
            continue;
        }
        if !inner.debouncer.admit(&event) {
            debug!(path_id = %event.path_id, file = %event.file_name, action = %event.action, "debounced");
            continue;
        }

        let logged = event.clone();
        record(&inner.store, "log_event", move |s| s.log_event(&logged)).await;
        inner.notifier.publish(BackupNotification::Change(event.clone()));

        let Ok(_permit) = inner.workers.acquire().await else {
            break;
        };
        inner.pipeline.handle(task.config(), &event).await;
    }

    if task.state() == TaskState::Running {
        // Backend ended without being asked to
        error!(path_id = %task.path_id(), "Watch backend exited unexpectedly");
        inner.notifier.error(ErrorEvent::new(
            ErrorKind::BackendFailure,
            Some(task.path_id()),
            "watch backend exited unexpectedly",
        ));
        task.transition(TaskState::Stopping);
    }
    task.transition(TaskState::Stopped);
    debug!(path_id = %task.path_id(), "forwarder ended");
}

async fn validate(config: &MonitorPathConfig) -> Result<()> {
    if !config.enabled {
        return Err(MonitorError::PathDisabled(config.id.clone()));
    }
    if is_placeholder(&config.location) {
        return Err(invalid(config, "location is empty"));
    }
    if !tokio::fs::metadata(&config.location).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(invalid(config, "location does not exist or is not a directory"));
    }
    if is_placeholder(&config.backup_location) {
        return Err(invalid(config, "backup location is empty"));
    }
    // Backup location must lie outside the watched tree
    let root = resolve(&config.location).await;
    if resolve(&config.backup_location).await.starts_with(&root) {
        return Err(invalid(config, "backup location is inside the watched location"));
    }
    tokio::fs::create_dir_all(&config.backup_location)
        .await
        .map_err(|source| MonitorError::BackupLocation {
            location: config.backup_location.clone(),
            source,
        })
}

/// Canonical form of `path`. A missing tail is appended to its nearest
/// existing ancestor.
async fn resolve(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut tail: Vec<&OsStr> = Vec::new();
    loop {
        let candidate = if existing.as_os_str().is_empty() {
            Path::new(".")
        } else {
            existing
        };
        if let Ok(canonical) = tokio::fs::canonicalize(candidate).await {
            return tail.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name);
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn invalid(config: &MonitorPathConfig, reason: &str) -> MonitorError {
    MonitorError::PathInvalid {
        path_id: config.id.clone(),
        reason: reason.to_string(),
    }
}

fn is_placeholder(path: &Path) -> bool {
    let text = path.to_string_lossy();
    let text = text.trim();
    text.is_empty() || PLACEHOLDER_LOCATIONS.contains(&text)
}

fn resolve_global(method: WatchMethod) -> WatchMethod {
    match method {
        WatchMethod::Default => WatchMethod::CooperativeWatch,
        other => other,
    }
}
