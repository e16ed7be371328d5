use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};

/// Timestamp layout embedded in archive names. Sorts lexically in time order.
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

/// One archived snapshot of a world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    /// Archive directory name, `<world>_<timestamp>`
    pub file_name: String,
    pub world_name: String,
    pub full_path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Total size of the archived files
    pub size: u64,
}

impl BackupEntry {
    /// Time elapsed since the snapshot was taken.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Archive name for a snapshot of `world` taken at `created_at`.
    pub fn archive_name(world: &str, created_at: DateTime<Utc>) -> String {
        format!("{}_{}", world, created_at.format(TIMESTAMP_FORMAT))
    }

    /// Splits an archive name back into world and timestamp.
    ///
    /// Returns `None` for names this engine did not produce.
    pub fn parse_archive_name(name: &str) -> Option<(&str, DateTime<Utc>)> {
        let (world, stamp) = name.rsplit_once('_')?;
        if world.is_empty() {
            return None;
        }
        let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        Some((world, naive.and_utc()))
    }

    /// Builds an entry for an existing archive directory.
    pub(crate) fn from_archive(path: &Path, size: u64) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let (world, created_at) = Self::parse_archive_name(file_name)?;
        Some(Self {
            file_name: file_name.to_string(),
            world_name: world.to_string(),
            full_path: path.to_path_buf(),
            created_at,
            size,
        })
    }
}
