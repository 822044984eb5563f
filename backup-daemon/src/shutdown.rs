//! SIGINT/SIGTERM handling.
//!
//! The coordinator cancels one token that every long-running part of the
//! daemon watches. Monitoring tasks are stopped by the caller afterwards and
//! given `grace` to wind down.

use std::time::Duration;

use backup_engine::MonitorOrchestrator;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
        }
    }

    /// Cancelled once shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for SIGINT or SIGTERM, or for the token to be cancelled elsewhere.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
            _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
            _ = self.token.cancelled() => info!("Shutdown requested"),
        }

        self.token.cancel();
    }

    /// Stop every monitoring task and wait up to the grace period for their
    /// backends to finish.
    pub async fn shutdown(&self, orchestrator: &MonitorOrchestrator) {
        info!("Graceful shutdown initiated");
        self.token.cancel();

        let tasks = orchestrator.stop_all().await;
        let count = tasks.len();
        if tokio::time::timeout(self.grace, MonitorOrchestrator::wait_stopped(&tasks))
            .await
            .is_err()
        {
            warn!("{} monitor task(s) still winding down after {:?}", count, self.grace);
        }

        info!("Graceful shutdown complete");
    }
}
