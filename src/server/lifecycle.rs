use crate::error::{Error, Result};
use crate::integration::{Notifier, dispatch};
use crate::server::{LaunchId, ProcessState};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Maximum number of events kept in memory.
const EVENT_HISTORY: usize = 1000;

/// Server lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventKind {
    /// Process is being spawned
    Starting,
    /// Process survived its startup grace period
    Started,
    /// Spawn failed or the process died during startup
    StartFailed,
    /// Process exited without being asked to
    Crashed,
    /// A restart has been scheduled
    Restarting,
    /// Restart budget exhausted, supervisor gave up
    RestartLimitReached,
    /// Termination requested
    Stopping,
    /// No process remains
    Stopped,
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LifecycleEventKind::Starting => "is starting",
            LifecycleEventKind::Started => "is up",
            LifecycleEventKind::StartFailed => "failed to start",
            LifecycleEventKind::Crashed => "crashed",
            LifecycleEventKind::Restarting => "crashed, restarting",
            LifecycleEventKind::RestartLimitReached => "crashed, restart limit reached",
            LifecycleEventKind::Stopping => "is shutting down",
            LifecycleEventKind::Stopped => "stopped",
        };
        f.write_str(text)
    }
}

/// Server lifecycle event
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    /// Launch attempt the event belongs to
    pub launch_id: Option<LaunchId>,
    pub kind: LifecycleEventKind,
    /// State the supervisor is in after the event
    pub state: ProcessState,
    pub timestamp: Instant,
    pub details: Option<String>,
}

impl LifecycleEvent {
    /// Text sent to the notifier.
    pub fn message(&self) -> String {
        match &self.details {
            Some(details) => format!("Valheim server {} ({})", self.kind, details),
            None => format!("Valheim server {}", self.kind),
        }
    }
}

/// Records lifecycle events and forwards them to the notifier.
pub struct ServerLifecycleManager {
    events: Mutex<VecDeque<LifecycleEvent>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl ServerLifecycleManager {
    /// Create a manager that only keeps history
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            notifier: None,
        }
    }

    /// Create a manager that also forwards every event to `notifier`
    pub fn with_notifier(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            notifier: Some(notifier),
        }
    }

    /// Record an event and dispatch its message without waiting for delivery.
    pub fn record_event(
        &self,
        launch_id: Option<LaunchId>,
        kind: LifecycleEventKind,
        state: ProcessState,
        details: Option<String>,
    ) {
        let event = LifecycleEvent {
            launch_id,
            kind,
            state,
            timestamp: Instant::now(),
            details,
        };

        if let Some(notifier) = &self.notifier {
            dispatch(Arc::clone(notifier), event.message());
        }

        match self.events.lock() {
            Ok(mut events) => {
                events.push_back(event);
                if events.len() > EVENT_HISTORY {
                    events.pop_front();
                }
            }
            Err(_) => tracing::warn!("Lifecycle event history lock poisoned; event dropped"),
        }
    }

    /// Get recent events, newest first
    pub fn recent_events(&self, limit: Option<usize>) -> Result<Vec<LifecycleEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock lifecycle events".to_string()))?;

        let limit = limit.unwrap_or(events.len());
        Ok(events.iter().rev().take(limit).cloned().collect())
    }

    /// Kinds of all recorded events, oldest first
    pub fn event_kinds(&self) -> Result<Vec<LifecycleEventKind>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock lifecycle events".to_string()))?;

        Ok(events.iter().map(|e| e.kind).collect())
    }

    /// Clear events
    pub fn clear_events(&self) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| Error::Other("Failed to lock lifecycle events".to_string()))?;

        events.clear();
        Ok(())
    }
}

impl Default for ServerLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
