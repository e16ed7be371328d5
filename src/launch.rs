//! Translation of validated configuration into a concrete server command line.
//!
//! [`LaunchConfigGenerator`] is pure: the same configuration always yields the
//! same [`LaunchSpec`], and nothing touches the filesystem.
use crate::config::Config;
use crate::config::validator::validate_launcher_config;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Dedicated server binary shipped by the Steam package.
pub const SERVER_EXECUTABLE: &str = "valheim_server.x86_64";

/// Steam application id of the Valheim client, required by the server at runtime.
pub const STEAM_APP_ID: &str = "892970";

/// Everything needed to start the server process once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments in the order they are passed.
    pub args: Vec<String>,
    /// Variables added to the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Directory the process starts in.
    pub working_dir: PathBuf,
}

impl LaunchSpec {
    /// Creates a spec for an arbitrary program with no extra environment.
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: working_dir.into(),
        }
    }

    /// Appends arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Renders an equivalent `sh` script, for starting the server by hand.
    pub fn render_script(&self) -> String {
        let mut script = String::from("#!/bin/sh\n");
        let _ = writeln!(script, "cd {}", shell_quote(&self.working_dir.to_string_lossy()));
        for (key, value) in &self.env {
            let _ = writeln!(script, "export {}={}", key, shell_quote(value));
        }
        script.push_str("exec ");
        script.push_str(&shell_quote(&self.program.to_string_lossy()));
        for arg in &self.args {
            script.push(' ');
            script.push_str(&shell_quote(arg));
        }
        script.push('\n');
        script
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Builds a [`LaunchSpec`] from a [`Config`].
#[derive(Debug, Clone)]
pub struct LaunchConfigGenerator {
    config: Config,
}

impl LaunchConfigGenerator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Validates the launcher section and produces the server command line.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::OutOfRange`] if the port is outside 1024–65535
    /// * [`ConfigError::InvalidLength`] if the world, name or password length is out of bounds
    #[tracing::instrument(skip(self), fields(world = %self.config.launcher.world))]
    pub fn generate(&self) -> Result<LaunchSpec, ConfigError> {
        let launcher = &self.config.launcher;
        validate_launcher_config(launcher)?;

        let server_dir = &self.config.manager.server_location;
        let spec = LaunchSpec::new(server_dir.join(SERVER_EXECUTABLE), server_dir.clone())
            .args(["-nographics", "-batchmode"])
            .args(["-name", launcher.name.as_str()])
            .args(["-port".to_string(), launcher.port.to_string()])
            .args(["-world", launcher.world.as_str()])
            .args(["-password", launcher.password.as_str()])
            .args(["-public", if launcher.public { "1" } else { "0" }])
            .args([
                "-savedir".to_string(),
                self.config.save_dir().to_string_lossy().into_owned(),
            ])
            .env("SteamAppId", STEAM_APP_ID)
            .env(
                "LD_LIBRARY_PATH",
                server_dir.join("linux64").to_string_lossy().into_owned(),
            );

        tracing::debug!(program = %spec.program.display(), args = ?spec.args, "Generated launch spec");
        Ok(spec)
    }
}
