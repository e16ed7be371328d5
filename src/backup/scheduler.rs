use crate::backup::BackupRetentionEngine;
use crate::error::BackupError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};

/// Longest accepted period; longer ones are clamped.
const MAX_PERIOD: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Runs a retention cycle every `period`.
///
/// Each cycle runs on its own task. When the timer fires while the previous
/// cycle is still copying, the new cycle is skipped rather than queued.
/// [`shutdown`](Self::shutdown) cancels the timer and waits for an in-flight
/// cycle to finish, so no archive is left half-written.
pub struct BackupScheduler {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BackupScheduler {
    /// Starts the timer. The first cycle runs one `period` from now.
    #[tracing::instrument(skip(engine), fields(world = %engine.policy().world))]
    pub fn start(engine: Arc<BackupRetentionEngine>, period: Duration) -> Self {
        let period = period.clamp(Duration::from_millis(1), MAX_PERIOD);
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        tracing::info!(?period, "Starting backup scheduler");

        let task = tokio::spawn(async move {
            let now = time::Instant::now();
            let first = now.checked_add(period).unwrap_or(now);
            let mut interval = time::interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut cycles = JoinSet::new();

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        while cycles.try_join_next().is_some() {}

                        let engine = Arc::clone(&engine);
                        cycles.spawn(async move {
                            // other outcomes are logged by the engine
                            if let Err(BackupError::CycleInProgress(world)) =
                                engine.run_retention_cycle().await
                            {
                                tracing::warn!(%world, "Previous backup still running, cycle skipped");
                            }
                        });
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            if !cycles.is_empty() {
                tracing::info!("Waiting for in-flight backup to finish");
            }
            while cycles.join_next().await.is_some() {}
        });

        Self { shutdown, task }
    }

    /// Cancels the timer and waits for any running cycle.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Backup scheduler ended abnormally");
        }
        tracing::info!("Backup scheduler stopped");
    }
}
