/*!
 # Valheim Manager

 A Rust library for running a Valheim dedicated server unattended.

 ## Overview

 Valheim Manager provides functionality to:
 - Validate a JSON configuration and turn it into a server command line
 - Start, monitor and stop the server process, restarting it after crashes
 - Take periodic backups of the world and prune old ones
 - Report lifecycle changes to a chat integration

 Installing packages, forwarding router ports and delivering chat messages
 are left to implementations of the traits in [`integration`].

 ## Basic Usage

 ```no_run
 use std::sync::Arc;
 use std::time::Duration;
 use valheim_manager::integration::{CommandInstaller, ManualPortMapper, TracingNotifier};
 use valheim_manager::{Collaborators, Result, ValheimManager};

 #[tokio::main]
 async fn main() -> Result<()> {
     let collaborators = Collaborators {
         installer: Arc::new(CommandInstaller::new()),
         notifier: Arc::new(TracingNotifier),
         port_mapper: Arc::new(ManualPortMapper),
     };

     let mut manager = ValheimManager::from_config_file("vmConfig.json", collaborators)?;

     // Ports, install, launch, backups
     let process = manager.run().await?;
     println!("Server running as pid {:?}", process.pid);

     tokio::signal::ctrl_c().await?;
     manager.shutdown(Duration::from_secs(30)).await?;
     Ok(())
 }
 ```

 ## License

 This project is licensed under the terms in the LICENSE file.
*/

pub mod backup;
pub mod config;
pub mod error;
pub mod integration;
pub mod launch;
pub mod logging;
pub mod server;
pub mod setup;

pub use backup::{BackupEntry, BackupRetentionEngine, BackupScheduler, RetentionPolicy};
pub use config::Config;
pub use error::{Error, Result};
pub use launch::{LaunchConfigGenerator, LaunchSpec};
pub use server::{ProcessState, ProcessSupervisor, SupervisedProcess};

use integration::{Installer, Notifier, PortMapper, Protocol};
use server::{MonitorConfig, ServerLifecycleManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Package providing the Steam command line client.
pub const STEAMCMD_PACKAGE: &str = "steamcmd";

/// Package providing the dedicated server itself.
pub const SERVER_PACKAGE: &str = "valheim-server";

/// Name of the convenience start script written into the server directory.
pub const LAUNCHER_SCRIPT: &str = "start_server_managed.sh";

/// External systems the manager calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub installer: Arc<dyn Installer>,
    pub notifier: Arc<dyn Notifier>,
    pub port_mapper: Arc<dyn PortMapper>,
}

/// Runs one Valheim server and its backups.
///
/// This struct is the main entry point. It owns the configuration, the
/// process supervisor and the backup engine, and drives the startup
/// sequence. All public methods are instrumented with `tracing` spans.
pub struct ValheimManager {
    config: Config,
    collaborators: Collaborators,
    supervisor: ProcessSupervisor,
    backups: Arc<BackupRetentionEngine>,
    scheduler: Option<BackupScheduler>,
}

impl ValheimManager {
    /// Create a manager from a configuration file path
    #[tracing::instrument(skip(path, collaborators), fields(config_path = ?path.as_ref()))]
    pub fn from_config_file(path: impl AsRef<Path>, collaborators: Collaborators) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let config = Config::from_file(path)?;
        Self::new(config, collaborators)
    }

    /// Create a manager; the configuration is validated first
    pub fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        let monitor = config.monitor_config();
        Self::with_monitor_config(config, collaborators, monitor)
    }

    /// Create a manager with explicit supervisor timings
    #[tracing::instrument(skip_all, fields(world = %config.launcher.world))]
    pub fn with_monitor_config(
        config: Config,
        collaborators: Collaborators,
        monitor: MonitorConfig,
    ) -> Result<Self> {
        config::validate_config(&config).map_err(|e| {
            tracing::error!(error = %e, "Invalid configuration");
            e
        })?;

        let lifecycle = Arc::new(ServerLifecycleManager::with_notifier(Arc::clone(
            &collaborators.notifier,
        )));
        let supervisor = ProcessSupervisor::new(monitor, lifecycle);
        let backups = Arc::new(
            BackupRetentionEngine::new(config.retention_policy())
                .with_notifier(Arc::clone(&collaborators.notifier)),
        );

        tracing::info!("Created ValheimManager");
        Ok(Self {
            config,
            collaborators,
            supervisor,
            backups,
            scheduler: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn backups(&self) -> &Arc<BackupRetentionEngine> {
        &self.backups
    }

    /// Snapshot of the server process
    pub fn status(&self) -> SupervisedProcess {
        self.supervisor.status()
    }

    /// Forward the game port and the query port above it
    #[tracing::instrument(skip(self), fields(port = self.config.launcher.port))]
    pub async fn open_ports(&self) -> Result<()> {
        let port = config::validator::validate_port("launcher.port", self.config.launcher.port)?;
        let ports = [Some(port), port.checked_add(1)];

        for port in ports.into_iter().flatten() {
            self.collaborators
                .port_mapper
                .open_port(port, Protocol::Udp)
                .await
                .map_err(|e| {
                    tracing::error!(port, error = %e, "Failed to open port");
                    Error::PortMapping(format!("UDP {}: {}", port, e))
                })?;
            tracing::info!(port, "Port opened");
        }
        Ok(())
    }

    /// Install steamcmd, then the dedicated server
    #[tracing::instrument(skip(self))]
    pub async fn install_dependencies(&self) -> Result<()> {
        for package in [STEAMCMD_PACKAGE, SERVER_PACKAGE] {
            let installer = Arc::clone(&self.collaborators.installer);
            let installed = tokio::task::spawn_blocking(move || installer.install(package))
                .await
                .map_err(|e| Error::Other(format!("Installer task failed: {}", e)))?;

            if !installed {
                tracing::error!(package, "Installation failed");
                return Err(Error::Install(package.to_string()));
            }
            tracing::info!(package, "Package installed");
        }
        Ok(())
    }

    /// Build the launch spec from the current configuration
    pub fn launch_spec(&self) -> Result<LaunchSpec> {
        Ok(LaunchConfigGenerator::new(self.config.clone()).generate()?)
    }

    /// Write a script that starts the server by hand with the same settings
    #[tracing::instrument(skip(self))]
    pub async fn write_launcher_script(&self) -> Result<PathBuf> {
        let spec = self.launch_spec()?;
        let path = self.config.manager.server_location.join(LAUNCHER_SCRIPT);
        tokio::fs::write(&path, spec.render_script()).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        tracing::debug!(path = %path.display(), "Launcher script written");
        Ok(path)
    }

    /// Start the server process
    #[tracing::instrument(skip(self))]
    pub async fn start_server(&self) -> Result<SupervisedProcess> {
        let spec = self.launch_spec()?;
        let process = self.supervisor.start(spec).await?;
        tracing::info!(pid = ?process.pid, "Server started successfully");
        Ok(process)
    }

    /// Stop the server process
    #[tracing::instrument(skip(self))]
    pub async fn stop_server(&self, timeout: Duration) -> Result<()> {
        self.supervisor.stop(timeout).await?;
        Ok(())
    }

    /// Start periodic backups; does nothing if they already run
    #[tracing::instrument(skip(self))]
    pub fn start_backups(&mut self) {
        if self.scheduler.is_some() {
            tracing::debug!("Backup scheduler already running");
            return;
        }
        let period = self.backups.policy().interval();
        self.scheduler = Some(BackupScheduler::start(Arc::clone(&self.backups), period));
    }

    /// Run one retention cycle now
    #[tracing::instrument(skip(self))]
    pub async fn backup_now(&self) -> Result<BackupEntry> {
        Ok(self.backups.run_retention_cycle().await?)
    }

    /// Full startup: ports, install, launcher script, server, backups
    #[tracing::instrument(skip(self))]
    pub async fn run(&mut self) -> Result<SupervisedProcess> {
        if self.config.manager.auto_open_ports {
            self.open_ports().await?;
        }
        self.install_dependencies().await?;

        if let Err(e) = self.write_launcher_script().await {
            tracing::warn!(error = %e, "Could not write launcher script");
        }

        let process = self.start_server().await?;
        self.start_backups();
        Ok(process)
    }

    /// Stop backups (letting a running cycle finish), then the server
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        tracing::info!("Shutting down");
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
        self.backups.wait_idle().await;

        self.supervisor.shutdown(timeout).await?;
        tracing::info!("Shutdown complete");
        Ok(())
    }
}
