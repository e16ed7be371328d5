//! Backup retention for the server's world data.
//!
//! A retention cycle copies the world's save files into a timestamped
//! archive and then deletes the oldest archives beyond the configured
//! count. [`BackupScheduler`] runs cycles on a timer and guarantees a
//! cycle never overlaps itself.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use valheim_manager::backup::{BackupRetentionEngine, BackupScheduler, RetentionPolicy};
//!
//! # async fn run() {
//! let policy = RetentionPolicy {
//!     interval_minutes: 30,
//!     retention: 10,
//!     world: "Midgard".to_string(),
//!     source_dir: "/srv/valheim/saves/worlds_local".into(),
//!     destination_dir: "/srv/valheim/backups".into(),
//! };
//! let engine = Arc::new(BackupRetentionEngine::new(policy));
//! let scheduler = BackupScheduler::start(Arc::clone(&engine), engine.policy().interval());
//!
//! // ... later
//! scheduler.shutdown().await;
//! # }
//! ```
mod engine;
mod entry;
mod scheduler;

pub use engine::{BackupRetentionEngine, CycleReservation};
pub use entry::BackupEntry;
pub use scheduler::BackupScheduler;

use std::path::PathBuf;
use std::time::Duration;

/// What to back up, where to, how often, and how many archives to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Minutes between cycles
    pub interval_minutes: u64,
    /// Archives kept per world
    pub retention: usize,
    pub world: String,
    /// Directory holding the world's save files
    pub source_dir: PathBuf,
    /// Directory archives are written to
    pub destination_dir: PathBuf,
}

impl RetentionPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}
