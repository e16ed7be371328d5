use crate::server::policy::RestartPolicy;
use crate::server::supervisor::Shared;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Supervisor monitoring configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between liveness checks
    pub check_interval: Duration,
    /// How long a fresh process must stay alive before it counts as running
    pub startup_grace: Duration,
    /// Restart the server when it exits unexpectedly
    pub auto_restart: bool,
    pub restart: RestartPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(2),
            startup_grace: Duration::from_secs(5),
            auto_restart: false,
            restart: RestartPolicy::default(),
        }
    }
}

/// Background task that polls the supervised process at a fixed interval.
///
/// Each tick runs to completion; shutdown is only observed between ticks,
/// so a restart in progress is never abandoned halfway.
pub(crate) struct ServerMonitor {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerMonitor {
    /// Spawns the polling loop. It ends on [`stop`](Self::stop) or once the
    /// supervisor has been dropped.
    pub(crate) fn start(shared: Weak<Shared>, check_interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = time::interval(check_interval.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(shared) = shared.upgrade() else {
                            tracing::debug!("Supervisor dropped, monitor exiting");
                            break;
                        };
                        shared.poll().await;
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("Monitor shutdown requested");
                        break;
                    }
                }
            }
        });

        Self { shutdown, task }
    }

    /// Stops the loop and waits for the current tick to finish.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Monitor task ended abnormally");
        }
    }
}
