use crate::backup::RetentionPolicy;
use crate::error::ConfigError;
use crate::server::{BackoffPolicy, MonitorConfig, RestartPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings that govern the manager itself rather than the game server.
///
/// Counts and frequencies are kept signed so that a negative value in the
/// file is reported by validation with the field name instead of failing
/// deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Minutes between two backup cycles.
    pub backup_frequency: i64,

    /// Number of backups kept per world.
    pub backup_retention: i64,

    /// Ask the port mapper to forward the game ports before launch.
    #[serde(default)]
    pub auto_open_ports: bool,

    /// Restart the server when it exits unexpectedly.
    #[serde(default)]
    pub auto_restart_server: bool,

    /// Directory the dedicated server is installed into.
    pub server_location: PathBuf,

    /// Where this configuration file lives, if it was generated by setup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_location: Option<PathBuf>,

    /// Where archives are written. Defaults to `<serverLocation>/backups`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_location: Option<PathBuf>,

    /// Upper bound on consecutive automatic restarts. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
}

/// Settings passed to the dedicated server on its command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherConfig {
    /// UDP port the server listens on. The next port is used for queries.
    pub port: i64,

    /// World (save) name.
    pub world: String,

    /// Name shown in the server browser.
    pub name: String,

    /// Join password.
    pub password: String,

    /// List the server in the public browser.
    #[serde(default = "default_public")]
    pub public: bool,
}

fn default_public() -> bool {
    true
}

/// Logging destination and verbosity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Directory for rolling log files. Logs only go to stderr when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

/// Main configuration for the Valheim Manager.
///
/// # JSON Schema
///
/// ```json
/// {
///   "manager": {
///     "backupFrequency": 30,
///     "backupRetention": 10,
///     "autoOpenPorts": false,
///     "autoRestartServer": true,
///     "serverLocation": "/srv/valheim/server"
///   },
///   "launcher": {
///     "port": 2456,
///     "world": "Midgard",
///     "name": "Vikings Only",
///     "password": "hunter22"
///   },
///   "logging": {
///     "filePath": "/srv/valheim/logs"
///   }
/// }
/// ```
///
/// # Examples
///
/// ```no_run
/// use valheim_manager::config::Config;
///
/// let config = Config::from_file("vmConfig.json").unwrap();
/// println!("World: {}", config.launcher.world);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub manager: ManagerConfig,
    pub launcher: LauncherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Parse(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::parse_from_str(&content)
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    /// Directory passed to the server with `-savedir`.
    pub fn save_dir(&self) -> PathBuf {
        self.manager.server_location.join("saves")
    }

    /// Directory holding the `.db`/`.fwl` files of every world.
    pub fn worlds_dir(&self) -> PathBuf {
        self.save_dir().join("worlds_local")
    }

    /// Directory that receives backup archives.
    pub fn backup_dir(&self) -> PathBuf {
        self.manager
            .backup_location
            .clone()
            .unwrap_or_else(|| self.manager.server_location.join("backups"))
    }

    /// Retention policy for the configured world.
    ///
    /// Call after [`validate_config`](crate::config::validate_config); negative
    /// values are clamped to zero here.
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            interval_minutes: self.manager.backup_frequency.max(0) as u64,
            retention: self.manager.backup_retention.max(0) as usize,
            world: self.launcher.world.clone(),
            source_dir: self.worlds_dir(),
            destination_dir: self.backup_dir(),
        }
    }

    /// Supervisor settings derived from the manager section.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            auto_restart: self.manager.auto_restart_server,
            restart: RestartPolicy {
                max_restarts: self.manager.max_restarts,
                backoff: BackoffPolicy::default(),
                ..RestartPolicy::default()
            },
            ..MonitorConfig::default()
        }
    }
}
