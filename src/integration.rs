//! Contracts for the external collaborators the manager drives.
//!
//! Installing packages, delivering chat messages and forwarding router
//! ports are all single calls into someone else's system. The core only
//! depends on these traits; the binary wires in concrete implementations.
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::process::Command;
use std::sync::Arc;

/// Installs a named package. Blocking; the manager calls it from a blocking task.
pub trait Installer: Send + Sync {
    /// Returns `true` if the package is installed afterwards.
    fn install(&self, package: &str) -> bool;
}

/// Delivers a human-readable status message, e.g. to a chat channel.
///
/// Delivery is best-effort: the core logs a failed send and moves on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

/// Transport protocol of a forwarded port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Opens a port on the network gateway. Consulted only before the server starts.
#[async_trait]
pub trait PortMapper: Send + Sync {
    async fn open_port(&self, port: u16, protocol: Protocol) -> Result<()>;
}

/// Notifier that writes every message to the log.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        tracing::info!(target: "notifier", "{}", message);
        Ok(())
    }
}

/// Port mapper for networks without UPnP: logs what has to be forwarded by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualPortMapper;

#[async_trait]
impl PortMapper for ManualPortMapper {
    async fn open_port(&self, port: u16, protocol: Protocol) -> Result<()> {
        tracing::warn!(
            port,
            protocol = %protocol,
            "Automatic port mapping unavailable; forward this port on your router manually"
        );
        Ok(())
    }
}

/// Installer that runs a fixed command line per package.
#[derive(Debug, Clone, Default)]
pub struct CommandInstaller {
    commands: HashMap<String, Vec<String>>,
}

impl CommandInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the command that installs `package`. The first element is the program.
    pub fn with_command<I, S>(mut self, package: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands
            .insert(package.into(), command.into_iter().map(Into::into).collect());
        self
    }
}

impl Installer for CommandInstaller {
    fn install(&self, package: &str) -> bool {
        let Some((program, args)) = self
            .commands
            .get(package)
            .and_then(|command| command.split_first())
        else {
            tracing::error!(package, "No install command registered for package");
            return false;
        };

        tracing::info!(package, program = %program, "Installing package");
        match Command::new(program).args(args).status() {
            Ok(status) if status.success() => true,
            Ok(status) => {
                tracing::error!(package, %status, "Install command failed");
                false
            }
            Err(e) => {
                tracing::error!(package, error = %e, "Failed to run install command");
                false
            }
        }
    }
}

/// Sends `message` on a background task; failures are only logged.
pub(crate) fn dispatch(notifier: Arc<dyn Notifier>, message: String) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(%message, "No async runtime available, notification skipped");
        return;
    };

    handle.spawn(async move {
        if let Err(e) = notifier.send(&message).await {
            tracing::warn!(error = %e, %message, "Failed to deliver notification");
        }
    });
}
