use crate::error::{LaunchError, StopError};
use crate::launch::LaunchSpec;
use crate::server::lifecycle::{LifecycleEventKind, ServerLifecycleManager};
use crate::server::monitor::{MonitorConfig, ServerMonitor};
use crate::server::process::{LaunchId, ProcessState, SupervisedProcess};
use async_process::{Child, Command, Stdio};
use futures_lite::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use futures_lite::StreamExt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Granularity of exit checks during the startup grace period.
const GRACE_POLL: Duration = Duration::from_millis(50);

/// Mutable process state; only touched while holding the slot lock.
struct Slot {
    child: Option<Child>,
    spec: Option<LaunchSpec>,
    consecutive_crashes: u32,
    running_since: Option<Instant>,
    restart_at: Option<Instant>,
}

pub(crate) struct Shared {
    /// Serializes start, stop and monitor ticks.
    slot: Mutex<Slot>,
    /// Published copy of the process state, readable without the slot lock.
    snapshot: StdMutex<SupervisedProcess>,
    lifecycle: Arc<ServerLifecycleManager>,
    config: MonitorConfig,
}

/// Supervises exactly one server process.
///
/// `start`, `stop` and the background liveness monitor are mutually
/// exclusive: a call that arrives during a transition waits for it to
/// finish and then sees the resulting state. `status` never waits.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use valheim_manager::launch::LaunchSpec;
/// use valheim_manager::server::{MonitorConfig, ProcessSupervisor, ServerLifecycleManager};
///
/// # async fn run() -> valheim_manager::Result<()> {
/// let supervisor = ProcessSupervisor::new(
///     MonitorConfig { auto_restart: true, ..MonitorConfig::default() },
///     Arc::new(ServerLifecycleManager::new()),
/// );
///
/// let spec = LaunchSpec::new("/srv/valheim/valheim_server.x86_64", "/srv/valheim");
/// let process = supervisor.start(spec).await?;
/// println!("Server running as pid {:?}", process.pid);
///
/// supervisor.stop(Duration::from_secs(30)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
    monitor: Arc<StdMutex<Option<ServerMonitor>>>,
}

impl ProcessSupervisor {
    pub fn new(config: MonitorConfig, lifecycle: Arc<ServerLifecycleManager>) -> Self {
        let shared = Shared {
            slot: Mutex::new(Slot {
                child: None,
                spec: None,
                consecutive_crashes: 0,
                running_since: None,
                restart_at: None,
            }),
            snapshot: StdMutex::new(SupervisedProcess::new(config.auto_restart)),
            lifecycle,
            config,
        };

        Self {
            shared: Arc::new(shared),
            monitor: Arc::new(StdMutex::new(None)),
        }
    }

    /// Snapshot of the supervised process. Safe to call in any state.
    pub fn status(&self) -> SupervisedProcess {
        self.shared.snapshot()
    }

    /// Event history of this supervisor.
    pub fn lifecycle(&self) -> &Arc<ServerLifecycleManager> {
        &self.shared.lifecycle
    }

    /// Launches the server and waits out the startup grace period.
    ///
    /// # Errors
    ///
    /// * [`LaunchError::AlreadyRunning`] unless the supervisor is `Stopped`
    /// * [`LaunchError::SpawnFailed`] if the process cannot be created or exits during the grace period
    #[tracing::instrument(skip(self, spec), fields(program = %spec.program.display()))]
    pub async fn start(&self, spec: LaunchSpec) -> Result<SupervisedProcess, LaunchError> {
        let mut slot = self.shared.slot.lock().await;
        if self.shared.state() != ProcessState::Stopped {
            tracing::warn!(state = %self.shared.state(), "Start requested while not stopped");
            return Err(LaunchError::AlreadyRunning);
        }

        slot.spec = Some(spec.clone());
        slot.consecutive_crashes = 0;
        slot.restart_at = None;

        if let Err(e) = self.shared.launch(&mut slot, &spec).await {
            tracing::error!(error = %e, "Failed to start server process");
            self.shared.transition(
                ProcessState::Stopped,
                LifecycleEventKind::StartFailed,
                Some(e.to_string()),
            );
            return Err(e);
        }
        drop(slot);

        self.ensure_monitor();
        Ok(self.status())
    }

    /// Asks the server to exit and force-kills it after `timeout`.
    ///
    /// Stopping a crashed server cancels its pending restart.
    ///
    /// # Errors
    ///
    /// * [`StopError::NotRunning`] if the supervisor is already `Stopped`
    /// * [`StopError::TimeoutForceKilled`] if the process had to be killed; it is `Stopped` regardless
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self, timeout: Duration) -> Result<(), StopError> {
        let mut slot = self.shared.slot.lock().await;

        match self.shared.state() {
            ProcessState::Stopped => return Err(StopError::NotRunning),
            ProcessState::Crashed => {
                slot.restart_at = None;
                self.shared.transition(
                    ProcessState::Stopped,
                    LifecycleEventKind::Stopped,
                    Some("pending restart cancelled".to_string()),
                );
                return Ok(());
            }
            _ => {}
        }

        slot.running_since = None;
        let Some(mut child) = slot.child.take() else {
            self.shared
                .transition(ProcessState::Stopped, LifecycleEventKind::Stopped, None);
            return Ok(());
        };

        self.shared
            .transition(ProcessState::Stopping, LifecycleEventKind::Stopping, None);
        send_terminate(&mut child);

        let exited = tokio::time::timeout(timeout, child.status()).await;
        let forced = match exited {
            Ok(Ok(status)) => {
                self.shared.record_exit(&status);
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to wait for server exit");
                false
            }
            Err(_) => {
                tracing::warn!(?timeout, "Server ignored termination request, killing it");
                if let Err(e) = child.kill() {
                    tracing::warn!(error = %e, "Failed to kill server process");
                }
                match child.status().await {
                    Ok(status) => self.shared.record_exit(&status),
                    Err(e) => tracing::warn!(error = %e, "Failed to reap killed server process"),
                }
                true
            }
        };

        self.shared.update(|p| p.pid = None);
        let details = if forced {
            format!("force-killed after {:?}", timeout)
        } else {
            "stopped on request".to_string()
        };
        self.shared
            .transition(ProcessState::Stopped, LifecycleEventKind::Stopped, Some(details));

        if forced {
            Err(StopError::TimeoutForceKilled(timeout))
        } else {
            Ok(())
        }
    }

    /// Runs one liveness check. The background monitor calls this on every tick.
    pub async fn poll(&self) {
        self.shared.poll().await;
    }

    /// Stops the monitor and, if needed, the server.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StopError> {
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }

        match self.stop(timeout).await {
            Err(StopError::NotRunning) => Ok(()),
            other => other,
        }
    }

    fn ensure_monitor(&self) {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if monitor.is_none() {
            tracing::debug!(interval = ?self.shared.config.check_interval, "Starting liveness monitor");
            *monitor = Some(ServerMonitor::start(
                Arc::downgrade(&self.shared),
                self.shared.config.check_interval,
            ));
        }
    }
}

impl Shared {
    fn snapshot(&self) -> SupervisedProcess {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn state(&self) -> ProcessState {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    fn update(&self, f: impl FnOnce(&mut SupervisedProcess)) {
        f(&mut self.snapshot.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn transition(&self, state: ProcessState, kind: LifecycleEventKind, details: Option<String>) {
        let (from, launch_id) = {
            let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
            let from = snapshot.state;
            snapshot.state = state;
            (from, snapshot.launch_id)
        };

        tracing::info!(%from, to = %state, event = ?kind, details = ?details, "Server state changed");
        self.lifecycle.record_event(launch_id, kind, state, details);
    }

    fn record_exit(&self, status: &ExitStatus) {
        tracing::info!(%status, "Server process exited");
        self.update(|p| {
            p.last_exit_code = status.code();
            p.last_exit_reason = Some(status.to_string());
        });
    }

    /// Spawns the process and holds it through the grace period.
    ///
    /// Leaves the state at `Running` on success and at `Starting` on failure;
    /// the caller decides where a failed launch goes.
    async fn launch(&self, slot: &mut Slot, spec: &LaunchSpec) -> Result<(), LaunchError> {
        let launch_id = LaunchId::new();
        self.update(|p| {
            p.launch_id = Some(launch_id);
            p.pid = None;
        });
        self.transition(ProcessState::Starting, LifecycleEventKind::Starting, None);

        let mut child = spawn(spec).map_err(|e| {
            LaunchError::SpawnFailed(format!("{}: {}", spec.program.display(), e))
        })?;
        let pid = child.id();
        self.update(|p| p.pid = Some(pid));
        forward_output(&mut child);
        tracing::debug!(%launch_id, pid, "Spawned server process");

        let deadline = Instant::now() + self.config.startup_grace;
        loop {
            match child.try_status() {
                Ok(Some(status)) => {
                    self.record_exit(&status);
                    self.update(|p| p.pid = None);
                    return Err(LaunchError::SpawnFailed(format!(
                        "process exited during startup ({})",
                        status
                    )));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to query server process status"),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(GRACE_POLL)).await;
        }

        slot.child = Some(child);
        slot.running_since = Some(Instant::now());
        self.transition(
            ProcessState::Running,
            LifecycleEventKind::Started,
            Some(format!("pid {}", pid)),
        );
        Ok(())
    }

    pub(crate) async fn poll(&self) {
        let mut slot = self.slot.lock().await;

        match self.state() {
            ProcessState::Running => self.check_running(&mut slot),
            ProcessState::Crashed => {
                if slot.restart_at.is_some_and(|at| Instant::now() >= at) {
                    self.restart(&mut slot).await;
                }
            }
            _ => {}
        }
    }

    fn check_running(&self, slot: &mut Slot) {
        let Some(child) = slot.child.as_mut() else {
            return;
        };

        match child.try_status() {
            Ok(None) => {
                let stable = slot
                    .running_since
                    .is_some_and(|since| since.elapsed() >= self.config.restart.stable_after);
                if stable && slot.consecutive_crashes > 0 {
                    tracing::debug!("Server stable again, resetting crash counter");
                    slot.consecutive_crashes = 0;
                }
            }
            Ok(Some(status)) => {
                slot.child = None;
                self.record_exit(&status);
                self.update(|p| p.pid = None);

                let uptime = slot
                    .running_since
                    .take()
                    .map(|since| since.elapsed())
                    .unwrap_or_default();
                if uptime >= self.config.restart.stable_after {
                    slot.consecutive_crashes = 0;
                }
                self.handle_crash(slot, format!("exited unexpectedly: {}", status));
            }
            Err(e) => tracing::warn!(error = %e, "Failed to query server process status"),
        }
    }

    fn handle_crash(&self, slot: &mut Slot, reason: String) {
        slot.consecutive_crashes += 1;
        self.transition(ProcessState::Crashed, LifecycleEventKind::Crashed, Some(reason));

        if !self.config.auto_restart {
            self.transition(
                ProcessState::Stopped,
                LifecycleEventKind::Stopped,
                Some("auto-restart disabled".to_string()),
            );
            return;
        }

        if !self.config.restart.allows(slot.consecutive_crashes) {
            tracing::error!(
                consecutive_crashes = slot.consecutive_crashes,
                "Restart limit reached, giving up"
            );
            self.transition(
                ProcessState::Stopped,
                LifecycleEventKind::RestartLimitReached,
                Some(format!("{} consecutive crashes", slot.consecutive_crashes)),
            );
            return;
        }

        let delay = self.config.restart.delay(slot.consecutive_crashes);
        slot.restart_at = Some(Instant::now() + delay);

        let snapshot = self.snapshot();
        self.lifecycle.record_event(
            snapshot.launch_id,
            LifecycleEventKind::Restarting,
            ProcessState::Crashed,
            Some(format!("attempt {} in {:?}", snapshot.restart_count + 1, delay)),
        );
    }

    async fn restart(&self, slot: &mut Slot) {
        slot.restart_at = None;
        let Some(spec) = slot.spec.clone() else {
            self.transition(ProcessState::Stopped, LifecycleEventKind::Stopped, None);
            return;
        };

        self.update(|p| p.restart_count += 1);
        tracing::info!(restart_count = self.snapshot().restart_count, "Restarting server");

        if let Err(e) = self.launch(slot, &spec).await {
            tracing::error!(error = %e, "Restart attempt failed");
            self.handle_crash(slot, e.to_string());
        }
    }
}

fn spawn(spec: &LaunchSpec) -> std::io::Result<Child> {
    Command::new(&spec.program)
        .args(&spec.args)
        .envs(&spec.env)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

/// Relays the server's console output into the log.
fn forward_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(log_lines(BufReader::new(stdout), "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(log_lines(BufReader::new(stderr), "stderr"));
    }
}

async fn log_lines<R>(reader: R, stream: &'static str)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) if !line.trim().is_empty() => {
                tracing::info!(target: "valheim_server", stream, "{}", line)
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
        tracing::warn!(error = %e, "Failed to send SIGTERM to server process");
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::warn!(error = %e, "Failed to terminate server process");
    }
}
