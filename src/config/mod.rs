//! Configuration module for Valheim Manager.
//!
//! This module handles parsing and validation of the manager's JSON
//! configuration document. The same validators back the interactive
//! setup flow, so a hand-written file and a generated one are held to
//! the same rules.
//!
//! # Examples
//!
//! Loading and validating a configuration from a file:
//!
//! ```no_run
//! use valheim_manager::config::{Config, validate_config};
//!
//! let config = Config::from_file("vmConfig.json").unwrap();
//! validate_config(&config).unwrap();
//! println!("Backing up every {} minutes", config.manager.backup_frequency);
//! ```
mod parser;
pub mod validator;

pub use parser::{Config, LauncherConfig, LoggingConfig, ManagerConfig};
pub use validator::validate_config;
