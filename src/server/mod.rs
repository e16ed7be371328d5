/// Server supervision module for Valheim Manager.
///
/// This module owns the one dedicated server process: it starts it, watches
/// its liveness, restarts it after crashes and stops it on request. Every
/// state change is recorded as a lifecycle event and forwarded to the
/// configured notifier. All public operations are instrumented with
/// `tracing` spans.
///
/// # Components
///
/// * `lifecycle` - Lifecycle events, their history and notifier dispatch
/// * `monitor` - Periodic liveness polling that drives restarts
/// * `policy` - Restart limits and back-off between attempts
/// * `process` - Process state and status snapshots
/// * `supervisor` - The state machine tying these together
///
/// # Examples
///
/// Recording lifecycle events directly:
///
/// ```
/// use valheim_manager::server::{LifecycleEventKind, ProcessState, ServerLifecycleManager};
///
/// let manager = ServerLifecycleManager::new();
/// manager.record_event(
///     None,
///     LifecycleEventKind::Started,
///     ProcessState::Running,
///     Some("pid 4242".to_string()),
/// );
/// assert_eq!(manager.recent_events(Some(1)).unwrap()[0].message(), "Valheim server is up (pid 4242)");
/// ```
pub mod lifecycle;
pub mod monitor;
pub mod policy;
mod process;
mod supervisor;

pub use lifecycle::{LifecycleEvent, LifecycleEventKind, ServerLifecycleManager};
pub use monitor::MonitorConfig;
pub use policy::{BackoffPolicy, RestartPolicy};
pub use process::{LaunchId, ProcessState, SupervisedProcess};
pub use supervisor::ProcessSupervisor;
