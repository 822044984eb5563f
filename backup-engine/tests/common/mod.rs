#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use backup_engine::config::{EngineSettings, MonitorPathConfig, MonitorSettings, WatchMethod};
use backup_engine::models::{ChangeEvent, EventSource, FileAction};
use backup_engine::persistence::InMemoryStore;
use backup_engine::watch::{BackendFactory, WatchBackend, WatchTarget};
use backup_engine::{BackupEngine, MonitorOrchestrator, NotificationHub, WatchError};

static INIT: Once = Once::new();

/// Initialise tracing for tests. Output is captured per test.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_test_writer().with_target(true).init();
    });
}

/// Backend driven by the test instead of the filesystem.
pub struct ManualBackend {
    pub method: WatchMethod,
    source: EventSource,
    unavailable: bool,
    /// Keep the sender after `stop()`, like a backend thread still unwinding
    lingers: bool,
    tx: Mutex<Option<mpsc::Sender<ChangeEvent>>>,
    target: Mutex<Option<WatchTarget>>,
    running: AtomicBool,
    pub stops: AtomicUsize,
}

impl ManualBackend {
    fn new(method: WatchMethod, unavailable: bool, lingers: bool) -> Self {
        Self {
            method,
            source: EventSource::for_method(method).unwrap_or(EventSource::Polling),
            unavailable,
            lingers,
            tx: Mutex::new(None),
            target: Mutex::new(None),
            running: AtomicBool::new(false),
            stops: AtomicUsize::new(0),
        }
    }

    /// Emit an event for `name` under the watched root. False once stopped.
    pub async fn emit(&self, name: &str, action: FileAction) -> bool {
        let tx = self.tx.lock().unwrap().clone();
        let target = self.target.lock().unwrap().clone();
        let (Some(tx), Some(target)) = (tx, target) else {
            return false;
        };
        let path = target.root.join(name);
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let event = ChangeEvent::now(&target.path_id, &path, action, size, self.source);
        tx.send(event).await.is_ok()
    }

    /// Drop the sender, ending the backend for good.
    pub fn release(&self) {
        self.tx.lock().unwrap().take();
    }
}

impl WatchBackend for ManualBackend {
    fn source(&self) -> EventSource {
        self.source
    }

    fn watch(&self, target: WatchTarget, tx: mpsc::Sender<ChangeEvent>) -> Result<(), WatchError> {
        if self.unavailable {
            return Err(WatchError::BackendUnavailable("no OS watch in tests".into()));
        }
        *self.target.lock().unwrap() = Some(target);
        *self.tx.lock().unwrap() = Some(tx);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if !self.lingers {
            self.release();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Hands out [`ManualBackend`]s and remembers them per path.
#[derive(Default)]
pub struct ManualFactory {
    pub native_unavailable: AtomicBool,
    pub keep_sender_on_stop: AtomicBool,
    created: Mutex<Vec<(String, Arc<ManualBackend>)>>,
}

impl ManualFactory {
    pub fn created_for(&self, path_id: &str) -> Vec<Arc<ManualBackend>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == path_id)
            .map(|(_, b)| Arc::clone(b))
            .collect()
    }

    pub fn latest(&self, path_id: &str) -> Arc<ManualBackend> {
        self.created_for(path_id)
            .pop()
            .unwrap_or_else(|| panic!("no backend created for {path_id}"))
    }
}

impl BackendFactory for ManualFactory {
    fn create(&self, method: WatchMethod, config: &MonitorPathConfig) -> Result<Arc<dyn WatchBackend>, WatchError> {
        let unavailable = method == WatchMethod::Native && self.native_unavailable.load(Ordering::SeqCst);
        let lingers = self.keep_sender_on_stop.load(Ordering::SeqCst);
        let backend = Arc::new(ManualBackend::new(method, unavailable, lingers));
        self.created
            .lock()
            .unwrap()
            .push((config.id.clone(), Arc::clone(&backend)));
        Ok(backend)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub memory: Arc<InMemoryStore>,
    pub factory: Arc<ManualFactory>,
    pub engine: Arc<BackupEngine>,
    pub hub: NotificationHub,
    pub orchestrator: MonitorOrchestrator,
}

/// Settings with no startup grace so events are processed immediately.
pub fn settings() -> MonitorSettings {
    MonitorSettings {
        startup_grace_ms: 0,
        ..MonitorSettings::default()
    }
}

pub fn harness(settings: MonitorSettings) -> Harness {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let memory = Arc::new(InMemoryStore::new());
    let factory = Arc::new(ManualFactory::default());
    let engine = Arc::new(BackupEngine::new(EngineSettings::default(), memory.clone()));
    let hub = NotificationHub::new();
    let orchestrator =
        MonitorOrchestrator::with_factory(settings, Arc::clone(&engine), hub.clone(), factory.clone());
    Harness {
        dir,
        memory,
        factory,
        engine,
        hub,
        orchestrator,
    }
}

impl Harness {
    /// Config for a fresh watched directory named after `id`.
    pub fn path(&self, id: &str, method: WatchMethod) -> MonitorPathConfig {
        let watched = self.watched(id);
        std::fs::create_dir_all(&watched).unwrap();
        MonitorPathConfig::new(id, id, watched, self.dir.path().join(format!("backup-{id}"))).with_method(method)
    }

    pub fn watched(&self, id: &str) -> PathBuf {
        self.dir.path().join("watched").join(id)
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
