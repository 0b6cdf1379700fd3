//! Full update flows: check → download → install → rollback, and scheduled installs.
//!
//! Release metadata and downloads come from in-process fakes; extraction,
//! validation (running the candidate binary), backup, replacement, and
//! restore are the real implementations. The executables are shell scripts,
//! so these tests only run on unix.

#![cfg(unix)]

use delta_update::config::MemoryConfigStore;
use delta_update::test_utils::{FakeDownloader, FakeReleaseProvider, release_with_assets, write_script, write_tar_gz};
use delta_update::upgrade::{
    HistoryFilter, InMemoryMetrics, InstallFailure, InstallerConfig, ProcessValidator,
    ReleaseUpdateManager, ScheduleOptions, ScheduleStatus, UpdateChecker, UpdateConfig,
    UpdateInstaller, UpdateManager, UpdateScheduler, UpdateStatus,
};
use delta_update::utils::Platform;
use delta_update::version::{BuildInfo, Version};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

const ASSET: &str = "delta-linux-amd64.tar.gz";

struct Harness {
    temp: TempDir,
    live: PathBuf,
    provider: Arc<FakeReleaseProvider>,
    manager: Arc<ReleaseUpdateManager>,
}

/// A tarball holding a `delta` script that reports `version`.
fn release_archive(dir: &Path, version: &str, exit_code: i32) -> Vec<u8> {
    let body = format!("#!/bin/sh\necho \"delta {version}\"\nexit {exit_code}\n");
    let path = dir.join(format!("build-{version}.tar.gz"));
    let entry = format!("delta-{version}/delta");
    write_tar_gz(&path, &[(entry.as_str(), body.as_bytes(), 0o755)]);
    std::fs::read(path).unwrap()
}

fn run_version(path: &Path) -> String {
    let mut attempts = 0;
    let output = loop {
        match Command::new(path).arg("--version").output() {
            // ETXTBSY while a parallel test's fork still holds the file open
            Err(e) if e.raw_os_error() == Some(26) && attempts < 10 => {
                attempts += 1;
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
            other => break other.unwrap(),
        }
    };
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

async fn harness(archive: impl FnOnce(&Path) -> Vec<u8>, config: UpdateConfig) -> Harness {
    let temp = TempDir::new().unwrap();
    let bin = temp.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let live = write_script(&bin, "delta", "echo \"delta 1.0.0\"");

    let provider = Arc::new(FakeReleaseProvider::with_releases(vec![release_with_assets(
        "v1.1.0",
        &[ASSET, "delta-darwin-arm64.tar.gz", "checksums.txt"],
    )]));
    let downloader = FakeDownloader::new(temp.path().join("downloads"), archive(temp.path()));

    let installer = UpdateInstaller::new(
        InstallerConfig {
            current_exe: live.clone(),
            backup_dir: temp.path().join("backups"),
            temp_dir: temp.path().join("tmp"),
            product_name: "delta".to_string(),
            platform: Platform::new("linux", "x86_64"),
            current_version: Version::new(1, 0, 0),
        },
        Arc::new(ProcessValidator::default()),
    );

    let manager = ReleaseUpdateManager::new(
        Arc::new(MemoryConfigStore::new(config)),
        provider.clone(),
        Arc::new(downloader),
        installer,
        BuildInfo::release(Version::new(1, 0, 0)),
    )
    .await
    .unwrap();

    Harness {
        temp,
        live,
        provider,
        manager: Arc::new(manager),
    }
}

#[tokio::test]
async fn test_check_install_and_rollback() {
    delta_update::test_utils::init_test_logging(None);
    let h = harness(|dir| release_archive(dir, "1.1.0", 0), UpdateConfig::default()).await;

    let metrics = Arc::new(InMemoryMetrics::new());
    let checker = UpdateChecker::new(h.manager.clone(), h.provider.clone())
        .with_platform(Platform::new("linux", "x86_64"))
        .with_metrics(metrics.clone());

    let info = checker.check_for_updates().await.unwrap();
    assert!(info.has_update);
    assert_eq!(info.current_version, "1.0.0");
    assert_eq!(info.latest_version, "1.1.0");
    assert_eq!(info.asset_name.as_deref(), Some(ASSET));
    assert_eq!(metrics.checks().len(), 1);

    let result = h.manager.download_and_install_update(&info.latest_version).await.unwrap();
    assert!(result.success);
    assert_eq!(result.old_version, "v1.0.0");
    assert_eq!(result.new_version, "v1.1.0");
    assert_eq!(
        result.steps(),
        ["start", "extract", "validate", "backup", "install", "verify", "cleanup", "complete"]
    );
    assert_eq!(run_version(&h.live), "delta 1.1.0");

    let backup = result.backup_path.clone().unwrap();
    assert!(backup.starts_with(h.temp.path().join("backups")));
    assert_eq!(run_version(&backup), "delta 1.0.0");

    let config = h.manager.get_config();
    assert_eq!(config.last_version, "v1.1.0");
    assert!(config.last_check_time().is_some());

    let restored = h.manager.rollback_to_previous_version().await.unwrap();
    assert_eq!(restored.version, "1.0.0");
    assert_eq!(run_version(&h.live), "delta 1.0.0");
    assert_eq!(h.manager.current_version(), Version::new(1, 0, 0));

    let summary = h.manager.history().summary();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.successful, 1);
    assert_eq!(h.manager.history().records(&HistoryFilter::default()).len(), 2);
}

#[tokio::test]
async fn test_broken_release_leaves_live_binary() {
    // Archive whose binary fails to run: rejected before any backup is taken
    let h = harness(|dir| release_archive(dir, "1.1.0", 3), UpdateConfig::default()).await;

    let err = h.manager.download_and_install_update("v1.1.0").await.unwrap_err();
    let failure = err
        .chain()
        .find_map(|e| e.downcast_ref::<InstallFailure>())
        .expect("install failure with journal");
    assert!(!failure.result.success);
    assert!(failure.result.backup_path.is_none());
    assert!(failure.result.rollback.is_none());

    assert_eq!(run_version(&h.live), "delta 1.0.0");
    assert!(h.manager.installer().get_backup_info().await.unwrap().is_empty());

    let failed = h.manager.history().records(&HistoryFilter {
        status: Some(UpdateStatus::Failed),
        ..HistoryFilter::default()
    });
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].failed_step.as_deref(), Some("validate"));
}

#[tokio::test]
async fn test_install_latest_without_backup() {
    let config = UpdateConfig {
        backup_before_update: false,
        ..UpdateConfig::default()
    };
    let h = harness(|dir| release_archive(dir, "1.1.0", 0), config).await;

    let result = h.manager.download_and_install_update("latest").await.unwrap();
    assert_eq!(result.new_version, "v1.1.0");
    assert!(result.backup_path.is_none());
    assert_eq!(run_version(&h.live), "delta 1.1.0");
    assert!(h.manager.installer().get_backup_info().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scheduled_install_runs_on_sweep() {
    let h = harness(|dir| release_archive(dir, "1.1.0", 0), UpdateConfig::default()).await;
    let state_file = h.temp.path().join("schedule.json");

    let scheduler = UpdateScheduler::new(h.manager.clone()).with_state_file(&state_file);
    let now = chrono::Utc::now();
    let task = scheduler
        .schedule_update("v1.1.0", now - chrono::Duration::seconds(1), ScheduleOptions::default())
        .unwrap();

    for handle in scheduler.sweep_at(now) {
        handle.await.unwrap();
    }

    let done = scheduler.get_task(&task.id).unwrap();
    assert_eq!(done.status, ScheduleStatus::Completed);
    assert_eq!(run_version(&h.live), "delta 1.1.0");

    // a second process sees the finished task
    let reloaded = UpdateScheduler::new(h.manager.clone()).with_state_file(&state_file);
    assert_eq!(reloaded.load_state().unwrap(), 1);
    assert_eq!(reloaded.get_task(&task.id).unwrap().status, ScheduleStatus::Completed);
}
