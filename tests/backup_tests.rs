use assert_fs::TempDir;
use assert_fs::prelude::*;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use mockall::mock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use valheim_manager::backup::{BackupEntry, BackupRetentionEngine, BackupScheduler, RetentionPolicy};
use valheim_manager::error::{BackupError, Result};
use valheim_manager::integration::Notifier;

mock! {
    pub NotifierMock {}

    #[async_trait]
    impl Notifier for NotifierMock {
        async fn send(&self, message: &str) -> Result<()>;
    }
}

struct Fixture {
    dir: TempDir,
    engine: BackupRetentionEngine,
}

fn fixture(retention: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let policy = RetentionPolicy {
        interval_minutes: 30,
        retention,
        world: "Midgard".to_string(),
        source_dir: dir.child("worlds_local").path().to_path_buf(),
        destination_dir: dir.child("backups").path().to_path_buf(),
    };
    Fixture {
        engine: BackupRetentionEngine::new(policy),
        dir,
    }
}

impl Fixture {
    fn write_world(&self) {
        let worlds = self.dir.child("worlds_local");
        worlds.create_dir_all().unwrap();
        worlds.child("Midgard.db").write_str("terrain").unwrap();
        worlds.child("Midgard.fwl").write_str("meta").unwrap();
        worlds.child("Ashlands.db").write_str("other world").unwrap();
    }

    /// Creates `count` archives one hour apart, oldest first.
    fn seed_archives(&self, world: &str, count: i64) -> Vec<String> {
        let start = Utc.with_ymd_and_hms(2020, 10, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let name = BackupEntry::archive_name(world, start + ChronoDuration::hours(i));
                let archive = self.dir.child("backups").child(&name);
                archive.create_dir_all().unwrap();
                archive.child(format!("{}.db", world)).write_str("data").unwrap();
                name
            })
            .collect()
    }
}

#[tokio::test]
async fn test_snapshot_copies_world_files() -> Result<()> {
    let fx = fixture(3);
    fx.write_world();

    let entry = fx.engine.run_cycle().await?;

    assert_eq!(entry.world_name, "Midgard");
    assert_eq!(entry.size, ("terrain".len() + "meta".len()) as u64);
    assert!(entry.full_path.join("Midgard.db").is_file());
    assert!(entry.full_path.join("Midgard.fwl").is_file());
    assert!(!entry.full_path.join("Ashlands.db").exists());
    assert!(entry.age() >= ChronoDuration::zero());

    let listed = fx.engine.list_entries("Midgard").await?;
    assert_eq!(listed, vec![entry]);
    Ok(())
}

#[tokio::test]
async fn test_prune_keeps_most_recent() -> Result<()> {
    let fx = fixture(3);
    let names = fx.seed_archives("Midgard", 5);

    let removed = fx.engine.prune("Midgard", 3).await?;

    let removed: Vec<_> = removed.into_iter().map(|e| e.file_name).collect();
    assert_eq!(removed, vec![names[1].clone(), names[0].clone()]);

    let kept: Vec<_> = fx
        .engine
        .list_entries("Midgard")
        .await?
        .into_iter()
        .map(|e| e.file_name)
        .collect();
    assert_eq!(kept, vec![names[4].clone(), names[3].clone(), names[2].clone()]);
    Ok(())
}

#[tokio::test]
async fn test_prune_with_fewer_archives_than_retention() -> Result<()> {
    let fx = fixture(10);
    fx.seed_archives("Midgard", 4);

    let removed = fx.engine.prune("Midgard", 10).await?;

    assert!(removed.is_empty());
    assert_eq!(fx.engine.list_entries("Midgard").await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_prune_is_idempotent() -> Result<()> {
    let fx = fixture(2);
    fx.seed_archives("Midgard", 6);

    assert_eq!(fx.engine.prune("Midgard", 2).await?.len(), 4);
    assert!(fx.engine.prune("Midgard", 2).await?.is_empty());
    assert_eq!(fx.engine.list_entries("Midgard").await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_prune_leaves_other_worlds_and_foreign_files() -> Result<()> {
    let fx = fixture(1);
    fx.seed_archives("Midgard", 3);
    fx.seed_archives("Ashlands", 2);
    let backups = fx.dir.child("backups");
    backups.child("notes.txt").write_str("keep me").unwrap();
    backups.child(".Midgard_20200101T000000.000Z.partial").create_dir_all().unwrap();

    fx.engine.prune("Midgard", 1).await?;

    assert_eq!(fx.engine.list_entries("Midgard").await?.len(), 1);
    assert_eq!(fx.engine.list_entries("Ashlands").await?.len(), 2);
    assert!(backups.child("notes.txt").path().is_file());
    assert!(backups.child(".Midgard_20200101T000000.000Z.partial").path().is_dir());
    Ok(())
}

#[tokio::test]
async fn test_missing_destination_lists_nothing() -> Result<()> {
    let fx = fixture(3);
    assert!(fx.engine.list_entries("Midgard").await?.is_empty());
    assert!(fx.engine.prune("Midgard", 3).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_world_is_source_unavailable() {
    let fx = fixture(3);
    fx.dir.child("worlds_local").create_dir_all().unwrap();
    fx.dir.child("worlds_local").child("Ashlands.db").write_str("x").unwrap();

    let result = fx.engine.run_cycle().await;

    assert!(matches!(result, Err(BackupError::SourceUnavailable(_))));
    assert!(fx.engine.list_entries("Midgard").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_source_dir_is_source_unavailable() {
    let fx = fixture(3);
    let result = fx.engine.run_retention_cycle().await;
    assert!(matches!(result, Err(BackupError::SourceUnavailable(_))));
}

#[tokio::test]
async fn test_retention_cycle_snapshots_then_prunes() -> Result<()> {
    let fx = fixture(2);
    fx.write_world();
    fx.seed_archives("Midgard", 3);

    let entry = fx.engine.run_retention_cycle().await?;

    let kept = fx.engine.list_entries("Midgard").await?;
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0], entry);
    Ok(())
}

#[tokio::test]
async fn test_failed_snapshot_still_prunes() {
    let fx = fixture(1);
    fx.seed_archives("Midgard", 3);

    let result = fx.engine.run_retention_cycle().await;

    assert!(matches!(result, Err(BackupError::SourceUnavailable(_))));
    assert_eq!(fx.engine.list_entries("Midgard").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_overlapping_cycle_is_rejected() -> Result<()> {
    let fx = fixture(3);
    fx.write_world();

    let reservation = fx.engine.try_reserve()?;
    let result = fx.engine.run_cycle().await;
    assert!(matches!(result, Err(BackupError::CycleInProgress(ref w)) if w == "Midgard"));

    drop(reservation);
    fx.engine.run_cycle().await?;
    Ok(())
}

#[tokio::test]
async fn test_back_to_back_snapshots_get_distinct_names() -> Result<()> {
    let fx = fixture(10);
    fx.write_world();

    let first = fx.engine.run_cycle().await?;
    let second = fx.engine.run_cycle().await?;

    assert_ne!(first.file_name, second.file_name);
    assert_eq!(fx.engine.list_entries("Midgard").await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_scheduler_runs_cycles_and_shuts_down() -> Result<()> {
    let fx = fixture(2);
    fx.write_world();
    let Fixture { dir, engine } = fx;
    let engine = Arc::new(engine);

    let scheduler = BackupScheduler::start(Arc::clone(&engine), Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(400)).await;
    scheduler.shutdown().await;

    // shutdown waited for the last cycle, so nothing is half-written
    let entries = engine.list_entries("Midgard").await?;
    assert!(!entries.is_empty());
    assert!(entries.len() <= 2);
    assert!(engine.try_reserve().is_ok());

    let settled = entries.len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(engine.list_entries("Midgard").await?.len(), settled);
    drop(dir);
    Ok(())
}

#[tokio::test]
async fn test_prune_to_zero_removes_everything() -> Result<()> {
    let fx = fixture(0);
    fx.seed_archives("Midgard", 3);

    assert_eq!(fx.engine.prune("Midgard", 0).await?.len(), 3);
    assert!(fx.engine.list_entries("Midgard").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cycle_removes_stale_staging_dirs() -> Result<()> {
    let fx = fixture(3);
    fx.write_world();
    let backups = fx.dir.child("backups");
    let stale = backups.child(".Midgard_20200101T000000.000Z.partial");
    stale.create_dir_all().unwrap();
    stale.child("Midgard.db").write_str("half").unwrap();
    let foreign = backups.child(".Ashlands_20200101T000000.000Z.partial");
    foreign.create_dir_all().unwrap();

    fx.engine.run_retention_cycle().await?;

    assert!(!stale.path().exists());
    assert!(foreign.path().is_dir());
    assert_eq!(fx.engine.list_entries("Midgard").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_scheduler_skips_ticks_while_cycle_runs() -> Result<()> {
    let fx = fixture(5);
    fx.write_world();
    let Fixture { dir, engine } = fx;
    let engine = Arc::new(engine);

    let reservation = engine.try_reserve()?;
    let scheduler = BackupScheduler::start(Arc::clone(&engine), Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.shutdown().await;
    drop(reservation);

    // ticks during the busy slot were dropped, not queued for later
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.list_entries("Midgard").await?.is_empty());
    drop(dir);
    Ok(())
}

#[tokio::test]
async fn test_huge_period_does_not_overflow() {
    let fx = fixture(1);
    let engine = Arc::new(fx.engine);

    let scheduler = BackupScheduler::start(Arc::clone(&engine), Duration::MAX);
    scheduler.shutdown().await;

    let policy = RetentionPolicy {
        interval_minutes: u64::MAX,
        ..engine.policy().clone()
    };
    assert_eq!(policy.interval(), Duration::from_secs(u64::MAX));
}

#[tokio::test]
async fn test_cycle_outcome_is_notified() -> Result<()> {
    let sent = Arc::new(Mutex::new(Vec::<String>::new()));
    let mut notifier = MockNotifierMock::new();
    let log = Arc::clone(&sent);
    notifier
        .expect_send()
        .withf(|m| m.starts_with("Backup of world 'Midgard' created"))
        .times(1..)
        .returning(move |m| {
            log.lock().unwrap().push(m.to_string());
            Ok(())
        });

    let fx = fixture(2);
    fx.write_world();
    let engine = BackupRetentionEngine::new(fx.engine.policy().clone()).with_notifier(Arc::new(notifier));

    engine.run_retention_cycle().await?;

    let deadline = Instant::now() + Duration::from_secs(5);
    while sent.lock().unwrap().is_empty() {
        assert!(Instant::now() < deadline, "backup notification never sent");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        sent.lock().unwrap()[0],
        format!("Backup of world 'Midgard' created ({} bytes)", "terrain".len() + "meta".len())
    );
    Ok(())
}
