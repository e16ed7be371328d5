use async_trait::async_trait;
use mockall::predicate::*;
use mockall::{Sequence, mock};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use valheim_manager::config::{Config, LauncherConfig, LoggingConfig, ManagerConfig};
use valheim_manager::error::{ConfigError, Error, Result};
use valheim_manager::integration::{Installer, Notifier, PortMapper, Protocol};
use valheim_manager::server::MonitorConfig;
use valheim_manager::{Collaborators, LAUNCHER_SCRIPT, ProcessState, ValheimManager};

mock! {
    pub InstallerMock {}

    impl Installer for InstallerMock {
        fn install(&self, package: &str) -> bool;
    }
}

mock! {
    pub NotifierMock {}

    #[async_trait]
    impl Notifier for NotifierMock {
        async fn send(&self, message: &str) -> Result<()>;
    }
}

mock! {
    pub PortMapperMock {}

    #[async_trait]
    impl PortMapper for PortMapperMock {
        async fn open_port(&self, port: u16, protocol: Protocol) -> Result<()>;
    }
}

fn test_config(server_location: &Path, auto_open_ports: bool) -> Config {
    Config {
        manager: ManagerConfig {
            backup_frequency: 60,
            backup_retention: 3,
            auto_open_ports,
            auto_restart_server: false,
            server_location: server_location.to_path_buf(),
            config_location: None,
            backup_location: None,
            max_restarts: None,
        },
        launcher: LauncherConfig {
            port: 2456,
            world: "Midgard".to_string(),
            name: "Vikings".to_string(),
            password: "hunter22".to_string(),
            public: false,
        },
        logging: LoggingConfig::default(),
    }
}

fn quiet_notifier() -> MockNotifierMock {
    let mut notifier = MockNotifierMock::new();
    notifier.expect_send().returning(|_| Ok(()));
    notifier
}

fn collaborators(
    installer: MockInstallerMock,
    port_mapper: MockPortMapperMock,
) -> Collaborators {
    Collaborators {
        installer: Arc::new(installer),
        notifier: Arc::new(quiet_notifier()),
        port_mapper: Arc::new(port_mapper),
    }
}

fn fast_monitor() -> MonitorConfig {
    MonitorConfig {
        check_interval: Duration::from_millis(50),
        startup_grace: Duration::from_millis(200),
        ..MonitorConfig::default()
    }
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), false);
    config.launcher.port = 80;

    let result = ValheimManager::new(
        config,
        collaborators(MockInstallerMock::new(), MockPortMapperMock::new()),
    );

    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::OutOfRange { field: "launcher.port", .. }))
    ));
}

#[tokio::test]
async fn test_open_ports_maps_game_and_query_port() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut port_mapper = MockPortMapperMock::new();
    let mut seq = Sequence::new();
    port_mapper
        .expect_open_port()
        .with(eq(2456), eq(Protocol::Udp))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    port_mapper
        .expect_open_port()
        .with(eq(2457), eq(Protocol::Udp))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));

    let manager = ValheimManager::new(
        test_config(dir.path(), true),
        collaborators(MockInstallerMock::new(), port_mapper),
    )?;

    manager.open_ports().await?;
    Ok(())
}

#[tokio::test]
async fn test_port_mapping_failure_aborts_startup() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut port_mapper = MockPortMapperMock::new();
    port_mapper
        .expect_open_port()
        .returning(|_, _| Err(Error::PortMapping("UPnP unavailable".to_string())));
    let mut installer = MockInstallerMock::new();
    installer.expect_install().times(0);

    let mut manager = ValheimManager::new(
        test_config(dir.path(), true),
        collaborators(installer, port_mapper),
    )?;

    let result = manager.run().await;

    assert!(matches!(result, Err(Error::PortMapping(_))));
    assert_eq!(manager.status().state, ProcessState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_install_failure_aborts_startup() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut installer = MockInstallerMock::new();
    let mut seq = Sequence::new();
    installer
        .expect_install()
        .with(eq("steamcmd"))
        .times(1)
        .in_sequence(&mut seq)
        .return_const(true);
    installer
        .expect_install()
        .with(eq("valheim-server"))
        .times(1)
        .in_sequence(&mut seq)
        .return_const(false);
    let mut port_mapper = MockPortMapperMock::new();
    port_mapper.expect_open_port().times(0);

    let mut manager = ValheimManager::new(
        test_config(dir.path(), false),
        collaborators(installer, port_mapper),
    )?;

    let result = manager.run().await;

    assert!(matches!(result, Err(Error::Install(ref package)) if package == "valheim-server"));
    assert_eq!(manager.status().state, ProcessState::Stopped);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_and_shutdown() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir()?;
    let executable = dir.path().join("valheim_server.x86_64");
    std::fs::write(&executable, "#!/bin/sh\nexec sleep 30\n")?;
    std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755))?;

    let worlds = dir.path().join("saves").join("worlds_local");
    std::fs::create_dir_all(&worlds)?;
    std::fs::write(worlds.join("Midgard.db"), "terrain")?;

    let mut installer = MockInstallerMock::new();
    installer.expect_install().times(2).return_const(true);

    let mut manager = ValheimManager::with_monitor_config(
        test_config(dir.path(), false),
        collaborators(installer, MockPortMapperMock::new()),
        fast_monitor(),
    )?;

    let process = manager.run().await?;
    assert_eq!(process.state, ProcessState::Running);
    assert!(process.pid.is_some());

    let script = std::fs::read_to_string(dir.path().join(LAUNCHER_SCRIPT))?;
    assert!(script.contains("'-world' 'Midgard'"));
    assert!(script.contains("export SteamAppId='892970'"));

    let entry = manager.backup_now().await?;
    assert_eq!(entry.world_name, "Midgard");
    assert!(entry.full_path.starts_with(dir.path().join("backups")));

    manager.shutdown(Duration::from_secs(5)).await?;
    assert_eq!(manager.status().state, ProcessState::Stopped);

    // a second shutdown finds nothing to stop
    manager.shutdown(Duration::from_secs(1)).await?;
    Ok(())
}
