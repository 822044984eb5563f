use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use backup_engine::engine::retention;
use backup_engine::{RetentionPolicy, SharedStore};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Runs the retention sweep on a cron schedule.
pub struct RetentionScheduler {
    scheduler: Mutex<JobScheduler>,
    sweeper: Arc<Sweeper>,
}

struct Sweeper {
    store: SharedStore,
    default_policy: RetentionPolicy,
    overrides: HashMap<String, RetentionPolicy>,
    running: AtomicBool,
}

impl Sweeper {
    async fn run(&self) -> anyhow::Result<Option<usize>> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Skipping retention sweep: previous sweep still running");
            return Ok(None);
        }
        let result = retention::sweep(&self.store, self.default_policy, self.overrides.clone()).await;
        self.running.store(false, Ordering::SeqCst);
        Ok(Some(result?))
    }
}

impl RetentionScheduler {
    pub async fn new(
        store: SharedStore,
        default_policy: RetentionPolicy,
        overrides: impl IntoIterator<Item = (String, RetentionPolicy)>,
    ) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            sweeper: Arc::new(Sweeper {
                store,
                default_policy,
                overrides: overrides.into_iter().collect(),
                running: AtomicBool::new(false),
            }),
        })
    }

    pub async fn schedule(&self, cron_expression: &str) -> anyhow::Result<()> {
        let sweeper = Arc::clone(&self.sweeper);

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let sweeper = Arc::clone(&sweeper);
            Box::pin(async move {
                tracing::info!("Starting scheduled retention sweep");
                if let Err(e) = sweeper.run().await {
                    tracing::error!(error = %e, "Scheduled retention sweep failed");
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Retention sweep scheduled");
        Ok(())
    }

    /// Sweep immediately. `None` when a sweep is already in progress.
    pub async fn run_now(&self) -> anyhow::Result<Option<usize>> {
        self.sweeper.run().await
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
