/// Error handling module for Valheim Manager.
///
/// Each subsystem has its own error enum so callers can match on exactly
/// the failures an operation can produce. The crate-level [`Error`] wraps
/// all of them for code that drives the whole manager.
///
/// # Example
///
/// ```
/// use valheim_manager::error::{Error, LaunchError, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::Launch(LaunchError::AlreadyRunning)) => println!("Server is already up"),
///         Err(Error::Config(e)) => println!("Fix your configuration: {}", e),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`ProcessSupervisor::start`](crate::server::ProcessSupervisor::start).
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The supervisor is not in the `Stopped` state.
    ///
    /// This error occurs when:
    /// - `start` is called twice without an intervening `stop`
    /// - `start` is called while a crashed server is waiting to be restarted
    #[error("Server is already running")]
    AlreadyRunning,

    /// The server process could not be created or died during its startup grace period.
    ///
    /// This error occurs when:
    /// - The executable does not exist
    /// - The executable is not permitted to run
    /// - The process exits before the grace period elapses
    #[error("Failed to spawn server process: {0}")]
    SpawnFailed(String),
}

/// Errors returned by [`ProcessSupervisor::stop`](crate::server::ProcessSupervisor::stop).
#[derive(Error, Debug)]
pub enum StopError {
    /// There is no server to stop.
    #[error("Server is not running")]
    NotRunning,

    /// The server ignored the graceful termination signal and was killed.
    ///
    /// The supervisor is already `Stopped` when this is returned.
    #[error("Server did not exit within {0:?} and was force-killed")]
    TimeoutForceKilled(Duration),
}

/// Configuration errors. Always fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric field is outside its allowed range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    /// A text field is too short or too long, or a count is not positive.
    #[error("{field} must be between {min} and {max}{unit}, got {len}", unit = length_unit(.field))]
    InvalidLength {
        field: &'static str,
        len: usize,
        min: usize,
        max: usize,
    },

    /// The configuration document could not be read or parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Counts reuse `InvalidLength` and have no unit.
fn length_unit(field: &str) -> &'static str {
    match field {
        "manager.backupFrequency" | "manager.backupRetention" => "",
        _ => " characters long",
    }
}

/// Errors produced by a backup retention cycle. Logged and skipped, never fatal.
#[derive(Error, Debug)]
pub enum BackupError {
    /// The world has no data on disk yet.
    ///
    /// This error occurs when:
    /// - The server has never fully started
    /// - The world name does not match any saved world
    #[error("World data is not available at {0}")]
    SourceUnavailable(PathBuf),

    /// Writing the archive or deleting an old one failed.
    #[error("Backup write failed at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another cycle for the same world is still running.
    #[error("A backup cycle for world '{0}' is already in progress")]
    CycleInProgress(String),
}

/// Errors that can occur in the valheim-manager library.
///
/// Wraps the subsystem errors and adds the failures of the startup
/// sequence driven by [`ValheimManager`](crate::ValheimManager).
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Stop(#[from] StopError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    /// A dependency could not be installed.
    #[error("Failed to install package '{0}'")]
    Install(String),

    /// Port forwarding could not be set up.
    ///
    /// This error occurs when:
    /// - The router does not offer UPnP
    /// - The mapping request was refused
    #[error("Failed to open port: {0}")]
    PortMapping(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for valheim-manager operations.
pub type Result<T> = std::result::Result<T, Error>;
