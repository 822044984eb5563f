// tests/orchestrator.rs

mod common;
use crate::common::{eventually, harness, settings};

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use backup_engine::config::{MonitorPathConfig, MonitorSettings, WatchMethod};
use backup_engine::models::{BackupType, EventSource, FileAction};
use backup_engine::notification::{BackupNotification, ErrorKind};
use backup_engine::persistence::PersistenceStore;
use backup_engine::{MonitorError, MonitorOrchestrator, TaskState};

#[tokio::test]
async fn default_paths_follow_global_method() {
    let h = harness(settings());
    h.orchestrator
        .add_path(h.path("inherits", WatchMethod::Default))
        .await
        .unwrap();
    h.orchestrator
        .add_path(h.path("explicit", WatchMethod::Polling))
        .await
        .unwrap();

    let tasks = h.orchestrator.tasks().await;
    assert_eq!(tasks[0].path_id, "explicit");
    assert_eq!(tasks[0].method, WatchMethod::Polling);
    assert!(!tasks[0].from_default);
    assert_eq!(tasks[1].path_id, "inherits");
    assert_eq!(tasks[1].method, WatchMethod::CooperativeWatch);
    assert!(tasks[1].from_default);

    let restarted = h.orchestrator.set_global_method(WatchMethod::CloudPoll).await;
    assert_eq!(restarted.len(), 1);
    assert_eq!(restarted[0].path_id, "inherits");
    assert_eq!(restarted[0].method, WatchMethod::CloudPoll);
    assert_eq!(restarted[0].source, EventSource::CloudPoll);

    // Restart is stop-then-new-task
    let inherited = h.factory.created_for("inherits");
    assert_eq!(inherited.len(), 2);
    assert_eq!(inherited[0].stops.load(Ordering::SeqCst), 1);
    assert_eq!(inherited[1].stops.load(Ordering::SeqCst), 0);

    let explicit = h.factory.created_for("explicit");
    assert_eq!(explicit.len(), 1);
    assert_eq!(explicit[0].stops.load(Ordering::SeqCst), 0);

    // Same method again is a no-op
    assert!(h.orchestrator.set_global_method(WatchMethod::CloudPoll).await.is_empty());
    assert_eq!(h.orchestrator.global_method(), WatchMethod::CloudPoll);
}

#[tokio::test]
async fn unavailable_native_watch_falls_back_to_cooperative() {
    let h = harness(settings());
    h.factory.native_unavailable.store(true, Ordering::SeqCst);
    let mut rx = h.hub.subscribe();

    let info = h
        .orchestrator
        .add_path(h.path("docs", WatchMethod::Native))
        .await
        .unwrap();

    assert_eq!(info.method, WatchMethod::Native);
    assert_eq!(info.source, EventSource::CooperativeWatch);
    assert_eq!(info.state, TaskState::Running);

    match rx.recv().await.unwrap() {
        BackupNotification::Error(e) => assert_eq!(e.kind, ErrorKind::BackendUnavailable),
        other => panic!("unexpected notification: {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_events_inside_debounce_window_are_dropped() {
    let h = harness(settings());
    h.orchestrator.add_path(h.path("docs", WatchMethod::Native)).await.unwrap();
    std::fs::write(h.watched("docs").join("a.txt"), b"v1").unwrap();

    let backend = h.factory.latest("docs");
    assert!(backend.emit("a.txt", FileAction::Create).await);
    assert!(backend.emit("a.txt", FileAction::Modify).await);
    assert!(backend.emit("a.txt", FileAction::Modify).await);
    assert!(backend.emit("a.txt", FileAction::Modify).await);

    eventually("two jobs", || h.memory.jobs().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let actions: Vec<FileAction> = h.memory.events().iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![FileAction::Create, FileAction::Modify]);
    assert_eq!(h.memory.jobs().len(), 2);
}

#[tokio::test]
async fn change_events_flow_into_versions() {
    let h = harness(settings());
    h.orchestrator.add_path(h.path("docs", WatchMethod::Native)).await.unwrap();
    let root = h.watched("docs");
    let backend = h.factory.latest("docs");
    let content = "shared paragraph\n".repeat(64);

    std::fs::write(root.join("a.txt"), &content).unwrap();
    backend.emit("a.txt", FileAction::Create).await;
    eventually("first version", || h.memory.list_versions(None).unwrap().len() == 1).await;

    std::fs::write(root.join("b.txt"), &content).unwrap();
    backend.emit("b.txt", FileAction::Create).await;
    eventually("second version", || h.memory.list_versions(None).unwrap().len() == 2).await;

    std::fs::write(root.join("a.txt"), "edited\n".repeat(10)).unwrap();
    backend.emit("a.txt", FileAction::Modify).await;
    eventually("third version", || h.memory.list_versions(None).unwrap().len() == 3).await;

    backend.emit("b.txt", FileAction::Delete).await;
    eventually("delete event", || h.memory.events().len() == 4).await;

    let versions = h.memory.list_versions(Some("docs")).unwrap();
    let types: Vec<BackupType> = versions.iter().map(|v| v.backup_type).collect();
    assert_eq!(
        types,
        vec![BackupType::Full, BackupType::Deduplicated, BackupType::Incremental]
    );
    assert_eq!(versions[1].stored_size, 0);
    assert_eq!(h.memory.jobs().len(), 3);

    let out = h.dir.path().join("restored");
    let restored = h.engine.restore(&versions[1], &out).await.unwrap();
    assert_eq!(std::fs::read_to_string(restored).unwrap(), content);

    let stats = h.memory.stats_since(chrono::Duration::hours(1)).unwrap();
    assert_eq!(stats.total_backups, 3);
    assert_eq!(stats.deduplicated_backups, 1);
}

#[tokio::test]
async fn startup_grace_drops_events_after_attach() {
    let h = harness(MonitorSettings::default());
    h.orchestrator.add_path(h.path("docs", WatchMethod::Native)).await.unwrap();
    std::fs::write(h.watched("docs").join("existing.txt"), b"x").unwrap();

    let backend = h.factory.latest("docs");
    backend.emit("existing.txt", FileAction::Create).await;

    eventually("raw event", || h.memory.events().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.memory.jobs().is_empty());
}

#[tokio::test]
async fn stop_all_is_prompt_and_idempotent() {
    let h = harness(settings());
    h.orchestrator.add_path(h.path("a", WatchMethod::Polling)).await.unwrap();
    h.orchestrator.add_path(h.path("b", WatchMethod::Default)).await.unwrap();
    let backend = h.factory.latest("a");

    let stopped = tokio::time::timeout(Duration::from_secs(1), h.orchestrator.stop_all())
        .await
        .unwrap();
    assert_eq!(stopped.len(), 2);
    assert!(stopped
        .iter()
        .all(|t| matches!(t.state(), TaskState::Stopping | TaskState::Stopped)));

    tokio::time::timeout(Duration::from_secs(1), MonitorOrchestrator::wait_stopped(&stopped))
        .await
        .unwrap();
    assert!(stopped.iter().all(|t| t.state() == TaskState::Stopped));

    // No new events once stopped
    assert!(!backend.emit("late.txt", FileAction::Create).await);
    assert!(h.orchestrator.tasks().await.is_empty());
    assert!(h.orchestrator.stop_all().await.is_empty());
}

#[tokio::test]
async fn remove_path_stops_only_that_task() {
    let h = harness(settings());
    h.orchestrator.add_path(h.path("a", WatchMethod::Polling)).await.unwrap();
    h.orchestrator.add_path(h.path("b", WatchMethod::Polling)).await.unwrap();

    let removed = h.orchestrator.remove_path("a").await.unwrap();
    removed.stopped().await;

    let remaining: Vec<String> = h.orchestrator.tasks().await.into_iter().map(|t| t.path_id).collect();
    assert_eq!(remaining, vec!["b".to_string()]);
    assert!(matches!(
        h.orchestrator.remove_path("a").await,
        Err(MonitorError::UnknownPath(_))
    ));
}

#[tokio::test]
async fn start_all_fails_only_when_nothing_starts() {
    let h = harness(settings());
    let good = h.path("good", WatchMethod::Polling);
    let missing = MonitorPathConfig::new("missing", "Missing", h.dir.path().join("nope"), h.dir.path().join("b1"));
    let disabled = MonitorPathConfig {
        enabled: false,
        ..h.path("disabled", WatchMethod::Polling)
    };

    let started = h
        .orchestrator
        .start_all(vec![good, missing.clone(), disabled.clone()])
        .await
        .unwrap();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].path_id, "good");

    let stored: Vec<String> = h.memory.paths().into_iter().map(|p| p.id).collect();
    assert_eq!(stored, vec!["good".to_string()]);

    let other = harness(settings());
    assert!(matches!(
        other.orchestrator.start_all(vec![missing, disabled]).await,
        Err(MonitorError::NoPathsStarted(2))
    ));
}

#[tokio::test]
async fn placeholder_location_is_rejected() {
    let h = harness(settings());
    let mut rx = h.hub.subscribe();
    let config = MonitorPathConfig::new("ui", "UI", "Select folder...", h.dir.path().join("b"));

    let err = h.orchestrator.add_path(config).await.unwrap_err();
    assert!(matches!(err, MonitorError::PathInvalid { .. }));

    match rx.recv().await.unwrap() {
        BackupNotification::Error(e) => assert_eq!(e.kind, ErrorKind::PathInvalid),
        other => panic!("unexpected notification: {other:?}"),
    }
}

#[tokio::test]
async fn same_named_files_in_different_subdirectories_are_both_backed_up() {
    let h = harness(settings());
    let mut config = h.path("docs", WatchMethod::Native);
    config.recursive = true;
    h.orchestrator.add_path(config).await.unwrap();

    let root = h.watched("docs");
    for (dir, body) in [("a", "first notes\n"), ("b", "second notes\n")] {
        std::fs::create_dir_all(root.join(dir)).unwrap();
        std::fs::write(root.join(dir).join("notes.txt"), body.repeat(20)).unwrap();
    }

    let backend = h.factory.latest("docs");
    assert!(backend.emit("a/notes.txt", FileAction::Create).await);
    assert!(backend.emit("b/notes.txt", FileAction::Create).await);

    eventually("two versions", || {
        h.memory.list_versions(Some("docs")).map(|v| v.len() == 2).unwrap_or(false)
    })
    .await;

    let versions = h.memory.list_versions(Some("docs")).unwrap();
    let mut files: Vec<PathBuf> = versions.iter().map(|v| v.file_path.clone()).collect();
    files.sort();
    assert_eq!(files, vec![root.join("a/notes.txt"), root.join("b/notes.txt")]);
    assert!(versions.iter().all(|v| v.backup_type == BackupType::Full));
}

#[tokio::test]
async fn backup_location_inside_watched_root_is_rejected() {
    let h = harness(settings());
    let mut rx = h.hub.subscribe();
    let root = h.watched("docs");
    std::fs::create_dir_all(&root).unwrap();

    for backup in [root.clone(), root.join("versions")] {
        let config = MonitorPathConfig::new("docs", "Docs", &root, &backup).with_method(WatchMethod::Polling);
        let err = h.orchestrator.add_path(config).await.unwrap_err();
        assert!(matches!(err, MonitorError::PathInvalid { .. }));

        match rx.recv().await.unwrap() {
            BackupNotification::Error(e) => assert_eq!(e.kind, ErrorKind::PathInvalid),
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    assert!(h.factory.created_for("docs").is_empty());
    assert!(!root.join("versions").exists());
    assert!(h.orchestrator.tasks().await.is_empty());
}

#[tokio::test]
async fn events_from_an_unwinding_backend_are_dropped_after_stop() {
    let h = harness(settings());
    h.factory.keep_sender_on_stop.store(true, Ordering::SeqCst);
    h.orchestrator.add_path(h.path("docs", WatchMethod::Native)).await.unwrap();
    std::fs::write(h.watched("docs").join("late.txt"), b"written during shutdown").unwrap();
    let backend = h.factory.latest("docs");
    let mut rx = h.hub.subscribe();

    let task = h.orchestrator.remove_path("docs").await.unwrap();
    assert_eq!(task.state(), TaskState::Stopping);

    // The backend has not let go of its sender yet
    assert!(backend.emit("late.txt", FileAction::Create).await);
    assert!(backend.emit("late.txt", FileAction::Modify).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(task.state(), TaskState::Stopping);
    assert!(h.memory.events().is_empty());
    assert!(h.memory.jobs().is_empty());
    assert!(h.memory.list_versions(Some("docs")).unwrap().is_empty());
    assert!(rx.try_recv().is_err());

    backend.release();
    tokio::time::timeout(Duration::from_secs(1), task.stopped())
        .await
        .unwrap();
    assert_eq!(task.state(), TaskState::Stopped);
}
