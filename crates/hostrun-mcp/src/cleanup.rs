//! Background reclamation of idle and failed sessions.

use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodically runs [`SessionManager::reap_idle`] until cancelled.
pub struct CleanupScheduler {
    manager: Arc<SessionManager>,
    interval: Duration,
    cancel: CancellationToken,
}

impl CleanupScheduler {
    pub fn new(manager: Arc<SessionManager>, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Session cleanup scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.manager.reap_idle().await;
                    if report.is_empty() {
                        tracing::trace!("Cleanup pass found nothing to reclaim");
                    } else {
                        tracing::info!(
                            idle = ?report.idle_stopped,
                            failed = ?report.failed_stopped,
                            interrupted = ?report.interrupted_stopped,
                            tombstones = report.tombstones_pruned,
                            cache_entries = report.cache_purged,
                            "Cleanup pass reclaimed resources"
                        );
                    }
                }
            }
        }

        tracing::info!("Session cleanup scheduler stopped");
    }
}
