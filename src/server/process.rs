// src/server/process.rs
use std::fmt;
use uuid::Uuid;

/// Identifies one launch attempt of the server.
///
/// A new id is minted every time the process is spawned, so events from a
/// restarted server can be told apart from those of the crashed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchId(Uuid);

impl LaunchId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LaunchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of the supervised server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No process, nothing pending
    Stopped,
    /// Process spawned, inside its startup grace period
    Starting,
    /// Process survived the grace period
    Running,
    /// Process exited unexpectedly; a restart may be pending
    Crashed,
    /// Termination requested, waiting for exit
    Stopping,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Crashed => "crashed",
            ProcessState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Snapshot of the one server process the supervisor owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedProcess {
    /// Current launch attempt, if any was made
    pub launch_id: Option<LaunchId>,
    /// OS process id, present only while a process exists
    pub pid: Option<u32>,
    pub state: ProcessState,
    /// Automatic restarts performed since the supervisor was created
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    pub last_exit_reason: Option<String>,
    pub auto_restart: bool,
}

impl SupervisedProcess {
    pub(crate) fn new(auto_restart: bool) -> Self {
        Self {
            launch_id: None,
            pid: None,
            state: ProcessState::Stopped,
            restart_count: 0,
            last_exit_code: None,
            last_exit_reason: None,
            auto_restart,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }
}
