//! Interactive creation of a configuration file.
//!
//! Setup is a fixed sequence of questions. Each answer is checked with the
//! same validators used for file-loaded configuration and the question is
//! repeated until the answer passes.
use crate::config::validator::{
    MAX_BACKUP_FREQUENCY, MAX_BACKUP_RETENTION, NAME_LENGTH, PASSWORD_LENGTH, validate_count,
    validate_length, validate_port,
};
use crate::config::{Config, LauncherConfig, LoggingConfig, ManagerConfig, validate_config};
use crate::error::Result;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

/// Name of the generated configuration file.
pub const CONFIG_FILE_NAME: &str = "vmConfig.json";

/// Asks questions on `output` and reads answers from `input`.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Asks until `check` accepts the answer. `check` returns a reason to reject.
    pub fn ask<F>(&mut self, question: &str, check: F) -> io::Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        loop {
            write!(self.output, "{}\n > ", question)?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "input closed before setup finished",
                ));
            }
            writeln!(self.output)?;

            let answer = line.trim();
            match check(answer) {
                Some(problem) => writeln!(
                    self.output,
                    "There was an error processing that response - {}",
                    problem
                )?,
                None => return Ok(answer.to_string()),
            }
        }
    }

    /// Asks a yes/no question; anything starting with `y` or `n` is accepted.
    pub fn ask_yes_no(&mut self, question: &str) -> io::Result<bool> {
        let answer = self.ask(question, |a| {
            let a = a.to_lowercase();
            (!a.starts_with('y') && !a.starts_with('n'))
                .then(|| "You need to answer with a yes or a no.".to_string())
        })?;
        Ok(answer.to_lowercase().starts_with('y'))
    }
}

/// What to do when no configuration file was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Path(PathBuf),
    Generate,
    Cancel,
}

/// Lets the user point at a file, generate one, or give up.
pub fn ask_config_source<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
) -> io::Result<ConfigSource> {
    let question = "Unable to identify the configuration file. What would you like to do?\n  \
        - (1) Provide the path/name to the configuration file\n  \
        - (2) Generate a new configuration file\n  \
        - (3) Cancel execution of the Valheim Manager";
    let choice = prompter.ask(question, |a| {
        (!["1", "2", "3"].contains(&a)).then(|| "You must select an option between 1 and 3.".to_string())
    })?;

    Ok(match choice.as_str() {
        "1" => {
            let path = prompter.ask("What is the path to the configuration file?", |a| {
                (!Path::new(a).is_file())
                    .then(|| "This file is not accessible or does not exist.".to_string())
            })?;
            ConfigSource::Path(PathBuf::from(path))
        }
        "2" => ConfigSource::Generate,
        _ => ConfigSource::Cancel,
    })
}

/// Runs the question sequence and returns a validated configuration.
pub fn prompt_config<R: BufRead, W: Write>(prompter: &mut Prompter<R, W>) -> Result<Config> {
    let save_location = prompter.ask("Where would you like to save this file?", |a| {
        (!Path::new(a).is_dir()).then(|| "This does not seem to be a valid path.".to_string())
    })?;
    let backup_frequency = prompter.ask(
        "How often(in minutes) would you like to create backups?",
        positive("manager.backupFrequency", MAX_BACKUP_FREQUENCY),
    )?;
    let backup_retention = prompter.ask(
        "How many backups should be kept at one time?",
        positive("manager.backupRetention", MAX_BACKUP_RETENTION),
    )?;
    let world = prompter.ask(
        "What would you like to name the valheim world?",
        length("launcher.world", NAME_LENGTH),
    )?;
    let name = prompter.ask(
        "What would you like the server name to be in the server browser?",
        length("launcher.name", NAME_LENGTH),
    )?;
    let password = prompter.ask(
        "What should the server password be?",
        length("launcher.password", PASSWORD_LENGTH),
    )?;
    let port = prompter.ask(
        "What port should the server use? The default port is 2456.",
        |a| match a.parse::<i64>() {
            Ok(port) => validate_port("launcher.port", port).err().map(|e| e.to_string()),
            Err(_) => Some("The port should be a number.".to_string()),
        },
    )?;
    let auto_open_ports =
        prompter.ask_yes_no("Would you like the manager to try automatically opening the ports?")?;
    let auto_restart_server = prompter.ask_yes_no(
        "Would you like the manager to automatically restart the server if it stops?",
    )?;

    // numeric answers were already checked by their validators
    let save_location = std::fs::canonicalize(&save_location)?;
    let config = Config {
        manager: ManagerConfig {
            backup_frequency: backup_frequency.parse().unwrap_or_default(),
            backup_retention: backup_retention.parse().unwrap_or_default(),
            auto_open_ports,
            auto_restart_server,
            server_location: save_location.join("server"),
            config_location: Some(save_location.join(CONFIG_FILE_NAME)),
            backup_location: None,
            max_restarts: None,
        },
        launcher: LauncherConfig {
            port: port.parse().unwrap_or_default(),
            world,
            name,
            password,
            public: true,
        },
        logging: LoggingConfig {
            file_path: Some(save_location.join("logs")),
            ..LoggingConfig::default()
        },
    };

    validate_config(&config)?;
    Ok(config)
}

/// Runs [`prompt_config`] and saves the result next to the chosen location.
///
/// Returns the path of the written file.
pub fn setup_config<R: BufRead, W: Write>(prompter: &mut Prompter<R, W>) -> Result<PathBuf> {
    let config = prompt_config(prompter)?;
    let path = config
        .manager
        .config_location
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    config.save(&path)?;
    tracing::info!(path = %path.display(), "Configuration saved");
    Ok(path)
}

fn positive(field: &'static str, max: i64) -> impl Fn(&str) -> Option<String> {
    move |a| match a.parse::<i64>() {
        Ok(n) => validate_count(field, n, max).err().map(|e| e.to_string()),
        Err(_) => Some("This needs to be a number greater than 0.".to_string()),
    }
}

fn length(field: &'static str, bounds: (usize, usize)) -> impl Fn(&str) -> Option<String> {
    move |a| {
        validate_length(field, a, bounds.0, bounds.1)
            .err()
            .map(|e| e.to_string())
    }
}
