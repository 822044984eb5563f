//! Backup Daemon - Main entry point
//!
//! Watches the configured paths, stores versions through the backup engine
//! and keeps the history in SQLite.

mod config;
mod db;
mod retention;
mod shutdown;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backup_engine::notification::BackupNotification;
use backup_engine::persistence::PersistenceStore;
use backup_engine::{utils, BackupEngine, MonitorOrchestrator, NotificationHub, SharedStore};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::config::{resolve_cloud_locations, DaemonConfig};
use crate::db::connection::{close_pool, create_pool};
use crate::db::migrate::migrate;
use crate::retention::RetentionScheduler;
use crate::shutdown::ShutdownCoordinator;
use crate::store::SqliteStore;

/// How long monitoring tasks get to wind down on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch every configured path until SIGINT/SIGTERM (default)
    Run,

    /// Restore one stored version into a directory
    Restore {
        version_id: String,

        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
    },

    /// Backup totals for the last N hours
    Stats {
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },

    /// Most recent change events
    Events {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Backup jobs recorded for one path
    Jobs { path_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = DaemonConfig::load(args.config.as_deref())?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    std::fs::create_dir_all(&config.daemon.data_dir).with_context(|| {
        format!("creating data directory {}", config.daemon.data_dir.display())
    })?;
    let db_path = config.daemon.db_path();
    let pool = create_pool(&db_path.to_string_lossy())?;
    migrate(&pool)?;
    let sqlite = Arc::new(SqliteStore::new(pool));

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            resolve_cloud_locations(&mut config.paths, dirs::home_dir().as_deref());
            run(config, Arc::clone(&sqlite) as SharedStore).await
        }
        Command::Restore { version_id, dest } => restore(&config, sqlite.clone(), &version_id, dest).await,
        Command::Stats { hours } => print_json(&sqlite.stats_since(chrono::Duration::hours(hours))?),
        Command::Events { limit } => print_json(&sqlite.recent_events(limit)?),
        Command::Jobs { path_id } => print_json(&store::jobs_for_path(&sqlite, &path_id)?),
    };

    close_pool(sqlite.pool());
    result
}

async fn run(config: DaemonConfig, store: SharedStore) -> Result<()> {
    tracing::info!(
        "Starting backup-daemon v{} ({} configured path(s), global method {})",
        env!("CARGO_PKG_VERSION"),
        config.paths.len(),
        config.monitor.global_method
    );

    let engine = Arc::new(BackupEngine::new(config.engine.clone(), Arc::clone(&store)));
    match engine.reload_index().await {
        Ok(count) => tracing::info!("Deduplication index loaded ({} hashes)", count),
        Err(e) => tracing::warn!("Failed to reload deduplication index: {}", e),
    }

    let hub = NotificationHub::new();
    let coordinator = ShutdownCoordinator::new(SHUTDOWN_GRACE);
    let log_handle = tokio::spawn(log_notifications(hub.clone(), coordinator.token()));

    let orchestrator = MonitorOrchestrator::new(config.monitor.clone(), engine, hub);
    let started = orchestrator.start_all(config.paths.clone()).await?;
    for task in &started {
        tracing::info!(
            path_id = %task.path_id,
            method = %task.method,
            source = %task.source,
            "Monitoring"
        );
    }

    let scheduler = start_retention(&config, store).await;

    coordinator.wait_for_signal().await;
    coordinator.shutdown(&orchestrator).await;

    if let Some(s) = scheduler {
        if let Err(e) = s.shutdown().await {
            tracing::warn!("Scheduler shutdown error: {}", e);
        }
    }
    let _ = log_handle.await;

    tracing::info!("Daemon stopped");
    Ok(())
}

async fn start_retention(config: &DaemonConfig, store: SharedStore) -> Option<RetentionScheduler> {
    if config.retention.schedule.trim().is_empty() {
        tracing::info!("Retention sweep disabled");
        return None;
    }

    let scheduler = match RetentionScheduler::new(
        store,
        config.retention.policy(),
        config.retention_overrides(),
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Failed to create scheduler: {}", e);
            return None;
        }
    };
    if let Err(e) = scheduler.schedule(&config.retention.schedule).await {
        tracing::warn!("Failed to schedule retention sweep: {}", e);
        return None;
    }
    if let Err(e) = scheduler.start().await {
        tracing::warn!("Failed to start scheduler: {}", e);
        return None;
    }
    Some(scheduler)
}

async fn log_notifications(hub: NotificationHub, cancel: CancellationToken) {
    let mut rx = hub.subscribe();
    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            n = rx.recv() => n,
        };
        match notification {
            Ok(BackupNotification::Version(v)) => tracing::info!(
                path_id = %v.path_id,
                file = %v.file_path.display(),
                backup_type = %v.backup_type,
                "Version {} stored ({} -> {} bytes)",
                v.id,
                v.original_size,
                v.stored_size
            ),
            Ok(BackupNotification::Change(e)) => tracing::debug!(
                path_id = %e.path_id,
                file = %e.file_name,
                action = %e.action,
                "Change"
            ),
            Ok(BackupNotification::Error(e)) => tracing::warn!(
                kind = ?e.kind,
                path_id = e.path_id.as_deref().unwrap_or("-"),
                "{}",
                e.reason
            ),
            Err(RecvError::Lagged(n)) => tracing::warn!("Notification log skipped {} message(s)", n),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn restore(
    config: &DaemonConfig,
    store: Arc<SqliteStore>,
    version_id: &str,
    dest: PathBuf,
) -> Result<()> {
    let version = store
        .find_version(version_id)?
        .with_context(|| format!("no version with id {version_id}"))?;
    let engine = BackupEngine::new(config.engine.clone(), store);
    let restored = engine.restore(&version, &dest).await?;
    println!("{}", restored.display());
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
