use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use valheim_manager::config::Config;
use valheim_manager::error::{ConfigError, Error};
use valheim_manager::integration::{CommandInstaller, ManualPortMapper, TracingNotifier};
use valheim_manager::setup::{self, CONFIG_FILE_NAME, ConfigSource, Prompter};
use valheim_manager::{Collaborators, SERVER_PACKAGE, STEAMCMD_PACKAGE, ValheimManager, logging};

/// Steam application id of the dedicated server download.
const SERVER_DEPOT: &str = "896660";

#[derive(Parser)]
#[command(name = "valheim-manager")]
#[command(about = "Runs a Valheim dedicated server with crash recovery and rolling backups")]
struct Cli {
    /// Configuration file; defaults to ./vmConfig.json
    config: Option<PathBuf>,

    /// Create a new configuration file interactively and exit
    #[arg(long)]
    setup: bool,

    /// Seconds to wait for the server to exit before killing it
    #[arg(long, default_value_t = 30)]
    stop_timeout: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if is_config_error(&e) {
                ExitCode::from(2)
            } else {
                ExitCode::from(3)
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut prompter = Prompter::new(BufReader::new(io::stdin()), io::stdout());

    if cli.setup {
        let path = setup::setup_config(&mut prompter)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let Some(config_path) = resolve_config_path(cli.config, &mut prompter)? else {
        println!("Cancelled.");
        return Ok(());
    };

    let config = Config::from_file(&config_path)?;
    let _log_guard = logging::init(&config.logging)?;
    tracing::info!(path = %config_path.display(), "Configuration loaded");

    let collaborators = Collaborators {
        installer: Arc::new(steamcmd_installer(&config.manager.server_location)),
        notifier: Arc::new(TracingNotifier),
        port_mapper: Arc::new(ManualPortMapper),
    };
    let mut manager = ValheimManager::new(config, collaborators)?;

    let started = manager.run().await;
    if let Err(e) = started {
        if matches!(e, Error::PortMapping(_)) {
            tracing::error!(
                "Could not open the server ports. Enable UPnP on your router or set autoOpenPorts to false and forward them manually"
            );
        }
        return Err(e.into());
    }

    tracing::info!("Server is up. Press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    manager
        .shutdown(Duration::from_secs(cli.stop_timeout))
        .await?;
    Ok(())
}

/// Uses the given path, then `./vmConfig.json`, then asks.
fn resolve_config_path<R: io::BufRead, W: io::Write>(
    given: Option<PathBuf>,
    prompter: &mut Prompter<R, W>,
) -> Result<Option<PathBuf>> {
    if let Some(path) = given {
        if !path.is_file() {
            return Err(ConfigError::Parse(format!(
                "Configuration file {} does not exist",
                path.display()
            ))
            .into());
        }
        return Ok(Some(path));
    }

    let default = PathBuf::from(CONFIG_FILE_NAME);
    if default.is_file() {
        return Ok(Some(default));
    }

    match setup::ask_config_source(prompter)? {
        ConfigSource::Path(path) => Ok(Some(path)),
        ConfigSource::Generate => Ok(Some(setup::setup_config(prompter)?)),
        ConfigSource::Cancel => Ok(None),
    }
}

fn steamcmd_installer(server_dir: &Path) -> CommandInstaller {
    let server_dir = server_dir.to_string_lossy().into_owned();
    CommandInstaller::new()
        .with_command(STEAMCMD_PACKAGE, ["steamcmd", "+quit"])
        .with_command(
            SERVER_PACKAGE,
            [
                "steamcmd",
                "+force_install_dir",
                server_dir.as_str(),
                "+login",
                "anonymous",
                "+app_update",
                SERVER_DEPOT,
                "validate",
                "+quit",
            ],
        )
}

fn is_config_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ConfigError>().is_some()
        || matches!(e.downcast_ref::<Error>(), Some(Error::Config(_)))
}
