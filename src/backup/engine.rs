use crate::backup::{BackupEntry, RetentionPolicy};
use crate::error::BackupError;
use crate::integration::{Notifier, dispatch};
use chrono::{Duration as ChronoDuration, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};

const PARTIAL_SUFFIX: &str = ".partial";

/// Proof that the caller owns the world's single cycle slot.
pub struct CycleReservation<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Snapshots one world and keeps the newest `retention` archives.
///
/// Archives are directories named `<world>_<timestamp>` under the
/// destination. They are assembled under a hidden temporary name and
/// renamed into place, so listing and pruning never see a partial copy.
pub struct BackupRetentionEngine {
    policy: RetentionPolicy,
    cycle: Mutex<()>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl BackupRetentionEngine {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            cycle: Mutex::new(()),
            notifier: None,
        }
    }

    /// Also report finished and failed cycles to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Claims the cycle slot without waiting.
    ///
    /// # Errors
    ///
    /// [`BackupError::CycleInProgress`] while another cycle holds the slot.
    pub fn try_reserve(&self) -> Result<CycleReservation<'_>, BackupError> {
        self.cycle
            .try_lock()
            .map(|guard| CycleReservation { _guard: guard })
            .map_err(|_| BackupError::CycleInProgress(self.policy.world.clone()))
    }

    /// Resolves once no cycle is running.
    pub async fn wait_idle(&self) {
        let _guard = self.cycle.lock().await;
    }

    /// Copies the world's files into a new timestamped archive.
    ///
    /// Skipped with [`BackupError::CycleInProgress`] if a cycle is already running.
    #[tracing::instrument(skip(self), fields(world = %self.policy.world))]
    pub async fn run_cycle(&self) -> Result<BackupEntry, BackupError> {
        let _reservation = self.try_reserve()?;
        self.sweep_partials().await;
        self.snapshot().await
    }

    /// One full retention cycle: snapshot, then prune.
    #[tracing::instrument(skip(self), fields(world = %self.policy.world))]
    pub async fn run_retention_cycle(&self) -> Result<BackupEntry, BackupError> {
        let _reservation = self.try_reserve()?;
        self.sweep_partials().await;

        let result = self.snapshot().await;
        match &result {
            Ok(entry) => {
                tracing::info!(archive = %entry.file_name, size = entry.size, "Backup created");
                self.notify(format!(
                    "Backup of world '{}' created ({} bytes)",
                    entry.world_name, entry.size
                ));
            }
            Err(BackupError::SourceUnavailable(path)) => {
                tracing::warn!(path = %path.display(), "World data not found, backup skipped");
            }
            Err(e) => {
                tracing::error!(error = %e, "Backup failed");
                self.notify(format!("Backup of world '{}' failed: {}", self.policy.world, e));
            }
        }

        // Prune even after a failed snapshot so retention still holds.
        if let Err(e) = self.prune(&self.policy.world, self.policy.retention).await {
            tracing::error!(error = %e, "Pruning old backups failed");
        }

        result
    }

    /// All archives of `world`, newest first.
    pub async fn list_entries(&self, world: &str) -> Result<Vec<BackupEntry>, BackupError> {
        let dest = &self.policy.destination_dir;
        let mut dir = match fs::read_dir(dest).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(write_failed(dest, e)),
        };

        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await.map_err(|e| write_failed(dest, e))? {
            let path = item.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !item.file_type().await.is_ok_and(|t| t.is_dir()) {
                continue;
            }
            if !matches!(BackupEntry::parse_archive_name(name), Some((w, _)) if w == world) {
                continue;
            }

            let size = dir_size(&path).await.map_err(|e| write_failed(&path, e))?;
            if let Some(entry) = BackupEntry::from_archive(&path, size) {
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    /// Deletes every archive of `world` beyond the newest `retention`.
    ///
    /// Returns the removed entries. Running it again without new archives
    /// removes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn prune(
        &self,
        world: &str,
        retention: usize,
    ) -> Result<Vec<BackupEntry>, BackupError> {
        let entries = self.list_entries(world).await?;
        let expired: Vec<BackupEntry> = entries.into_iter().skip(retention).collect();

        for entry in &expired {
            tracing::debug!(archive = %entry.file_name, "Removing expired backup");
            fs::remove_dir_all(&entry.full_path)
                .await
                .map_err(|e| write_failed(&entry.full_path, e))?;
        }

        if !expired.is_empty() {
            tracing::info!(removed = expired.len(), kept = retention, "Pruned old backups");
        }
        Ok(expired)
    }

    async fn snapshot(&self) -> Result<BackupEntry, BackupError> {
        let sources = self.world_files().await?;
        let dest = &self.policy.destination_dir;
        fs::create_dir_all(dest)
            .await
            .map_err(|e| write_failed(dest, e))?;

        let (name, final_path) = self.unique_archive_path().await;
        let staging = dest.join(staging_name(&name));

        if let Err(e) = copy_files(&sources, &staging).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&staging, &final_path).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(write_failed(&final_path, e));
        }

        let size = dir_size(&final_path)
            .await
            .map_err(|e| write_failed(&final_path, e))?;
        BackupEntry::from_archive(&final_path, size)
            .ok_or_else(|| BackupError::WriteFailed {
                path: final_path.clone(),
                source: std::io::Error::other("archive name did not round-trip"),
            })
    }

    /// Deletes staging directories of this world left by an interrupted cycle.
    ///
    /// Only called while holding the cycle slot, so no live copy is touched.
    async fn sweep_partials(&self) {
        let dest = &self.policy.destination_dir;
        let Ok(mut dir) = fs::read_dir(dest).await else {
            return;
        };

        while let Ok(Some(item)) = dir.next_entry().await {
            let name = item.file_name();
            let Some(archive) = name
                .to_str()
                .and_then(|n| n.strip_prefix('.'))
                .and_then(|n| n.strip_suffix(PARTIAL_SUFFIX))
            else {
                continue;
            };
            if !matches!(BackupEntry::parse_archive_name(archive), Some((w, _)) if w == self.policy.world)
            {
                continue;
            }

            let path = item.path();
            match fs::remove_dir_all(&path).await {
                Ok(()) => tracing::warn!(path = %path.display(), "Removed unfinished backup"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove unfinished backup")
                }
            }
        }
    }

    /// Files in the source directory that belong to the world, e.g.
    /// `Midgard.db`, `Midgard.fwl`, `Midgard.db.old`.
    async fn world_files(&self) -> Result<Vec<PathBuf>, BackupError> {
        let source = &self.policy.source_dir;
        let unavailable = || BackupError::SourceUnavailable(source.join(&self.policy.world));

        let mut dir = fs::read_dir(source).await.map_err(|_| unavailable())?;
        let prefix = format!("{}.", self.policy.world);
        let mut files = Vec::new();
        while let Some(item) = dir.next_entry().await.map_err(|_| unavailable())? {
            let name = item.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let is_file = item.file_type().await.is_ok_and(|t| t.is_file());
            if is_file && (name == self.policy.world || name.starts_with(&prefix)) {
                files.push(item.path());
            }
        }

        if files.is_empty() {
            return Err(unavailable());
        }
        files.sort();
        Ok(files)
    }

    /// Picks a timestamped name not yet taken, stepping forward a millisecond on collision.
    async fn unique_archive_path(&self) -> (String, PathBuf) {
        let mut created_at = Utc::now();
        loop {
            let name = BackupEntry::archive_name(&self.policy.world, created_at);
            let path = self.policy.destination_dir.join(&name);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                return (name, path);
            }
            created_at += ChronoDuration::milliseconds(1);
        }
    }

    fn notify(&self, message: String) {
        if let Some(notifier) = &self.notifier {
            dispatch(Arc::clone(notifier), message);
        }
    }
}

fn staging_name(archive: &str) -> String {
    format!(".{}{}", archive, PARTIAL_SUFFIX)
}

async fn copy_files(sources: &[PathBuf], staging: &Path) -> Result<(), BackupError> {
    fs::create_dir_all(staging)
        .await
        .map_err(|e| write_failed(staging, e))?;

    for source in sources {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = staging.join(name);
        match fs::copy(source, &target).await {
            Ok(_) => {}
            // the server rotated the file away mid-copy
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::SourceUnavailable(source.clone()));
            }
            Err(e) => return Err(write_failed(&target, e)),
        }
    }
    Ok(())
}

async fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    let mut dir = fs::read_dir(path).await?;
    while let Some(item) = dir.next_entry().await? {
        let metadata = item.metadata().await?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

fn write_failed(path: &Path, source: std::io::Error) -> BackupError {
    BackupError::WriteFailed {
        path: path.to_path_buf(),
        source,
    }
}
