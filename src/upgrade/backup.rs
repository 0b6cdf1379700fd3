//! Versioned backups of the live executable.
//!
//! Every install copies the running executable into the backup directory
//! before touching it. Backups are named
//! `{product}_{version}_{YYYYmmdd_HHMMSS}{exe_suffix}` so that the version and
//! backup time can be recovered from the file name alone, and they are never
//! modified once written. Retention keeps the newest N.
//!
//! # Examples
//!
//! ```rust,no_run
//! use delta_update::upgrade::backup::BackupStore;
//! use delta_update::utils::Platform;
//! use delta_update::version::Version;
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = BackupStore::new("/var/lib/delta/backups", "delta", &Platform::current());
//! let info = store.create_backup(Path::new("/usr/local/bin/delta"), &Version::new(1, 0, 0)).await?;
//! println!("Backed up to {}", info.backup_path.display());
//!
//! // Later, if something went wrong
//! store.restore_backup(&info.backup_path, Path::new("/usr/local/bin/delta")).await?;
//! # Ok(())
//! # }
//! ```

use super::replace::{ReplaceStrategy, replace_executable};
use super::verification::ChecksumVerifier;
use crate::constants::{DEFAULT_BACKUP_KEEP, RESTORE_ATTEMPTS, RESTORE_RETRY_DELAY_MS};
use crate::core::UpdateError;
use crate::utils::fs::{ensure_dir, set_executable};
use crate::utils::platform::Platform;
use crate::version::Version;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A backup of a previously installed executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Location of the backup file
    pub backup_path: PathBuf,
    /// Executable the backup was taken from
    pub original_path: PathBuf,
    /// Version of the backed-up executable
    pub version: String,
    /// When the backup was taken
    pub backup_time: DateTime<Utc>,
    /// Size in bytes
    pub size: u64,
    /// `sha256:<hex>` of the backup file; only computed when the backup is created
    #[serde(default)]
    pub checksum: Option<String>,
}

impl BackupInfo {
    /// The recorded checksum, or a freshly computed one for listed backups.
    pub async fn checksum(&self) -> Result<String> {
        match &self.checksum {
            Some(checksum) => Ok(checksum.clone()),
            None => ChecksumVerifier::compute_sha256(&self.backup_path).await,
        }
    }
}

/// Owns the backup directory for one product.
#[derive(Debug, Clone)]
pub struct BackupStore {
    backup_dir: PathBuf,
    product: String,
    exe_suffix: &'static str,
}

impl BackupStore {
    /// Creates a store writing into `backup_dir`.
    pub fn new(backup_dir: impl Into<PathBuf>, product: impl Into<String>, platform: &Platform) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            product: product.into(),
            exe_suffix: platform.exe_suffix(),
        }
    }

    /// Directory backups are written to.
    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn backup_file_name(&self, version: &Version, at: DateTime<Local>) -> String {
        format!("{}_{}_{}{}", self.product, version, at.format(TIMESTAMP_FORMAT), self.exe_suffix)
    }

    /// Splits a backup file name into its version and local timestamp.
    fn parse_file_name(&self, name: &str) -> Option<(String, DateTime<Utc>)> {
        let rest = name.strip_prefix(&self.product)?.strip_prefix('_')?;
        let rest = rest.strip_suffix(self.exe_suffix).unwrap_or(rest);

        let mut parts = rest.rsplitn(3, '_');
        let time = parts.next()?;
        let date = parts.next()?;
        let version = parts.next()?;

        let naive = NaiveDateTime::parse_from_str(&format!("{date}_{time}"), TIMESTAMP_FORMAT).ok()?;
        let local = Local.from_local_datetime(&naive).earliest()?;
        Some((version.to_string(), local.with_timezone(&Utc)))
    }

    /// Version recorded in the name of the backup at `path`.
    #[must_use]
    pub fn version_of(&self, path: &Path) -> Option<Version> {
        let name = path.file_name()?.to_string_lossy();
        let (version, _) = self.parse_file_name(&name)?;
        Version::parse(&version).ok()
    }

    /// Copies `original` into the backup directory.
    ///
    /// # Errors
    ///
    /// [`UpdateError::BackupFailed`] when the source is missing, a backup with
    /// the same name already exists, or the copy fails.
    pub async fn create_backup(&self, original: &Path, version: &Version) -> Result<BackupInfo> {
        let failed = |reason: String| UpdateError::BackupFailed { reason };

        if !original.exists() {
            return Err(failed(format!("{} does not exist", original.display())).into());
        }
        let dir = self.backup_dir.clone();
        tokio::task::spawn_blocking(move || ensure_dir(&dir))
            .await
            .context("Directory creation task panicked")?
            .map_err(|e| failed(format!("{e:#}")))?;

        let now = Local::now();
        let backup_path = self.backup_dir.join(self.backup_file_name(version, now));
        if backup_path.exists() {
            return Err(failed(format!("{} already exists", backup_path.display())).into());
        }

        info!("Creating backup at {}", backup_path.display());
        fs::copy(original, &backup_path)
            .await
            .map_err(|e| failed(format!("copy to {} failed: {e}", backup_path.display())))?;

        #[cfg(unix)]
        {
            let permissions = fs::metadata(original)
                .await
                .context("Failed to read original file metadata")?
                .permissions();
            fs::set_permissions(&backup_path, permissions)
                .await
                .context("Failed to set backup permissions")?;
        }

        let size = fs::metadata(&backup_path).await?.len();
        let checksum = ChecksumVerifier::compute_sha256(&backup_path).await?;

        Ok(BackupInfo {
            backup_path,
            original_path: original.to_path_buf(),
            version: version.to_string(),
            backup_time: now.with_timezone(&Utc),
            size,
            checksum: Some(checksum),
        })
    }

    /// Lists backups belonging to this product, newest first.
    ///
    /// `original_path` is unknown for backups read back from disk and is set
    /// to `current_exe`. Checksums are left for [`BackupInfo::checksum`].
    /// Backups named within the same second are ordered by modification time,
    /// then by version.
    pub async fn list_backups(&self, current_exe: &Path) -> Result<Vec<BackupInfo>> {
        let mut backups: Vec<(BackupInfo, Option<std::time::SystemTime>, Option<Version>)> =
            Vec::new();
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.backup_dir)
            .await
            .with_context(|| format!("Failed to read {}", self.backup_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&format!("{}_", self.product)) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let (version, backup_time) = match self.parse_file_name(&name) {
                Some(parsed) => parsed,
                None => {
                    debug!("Using mtime for unrecognized backup name {}", name);
                    let modified = metadata.modified().map(DateTime::<Utc>::from).unwrap_or_default();
                    ("unknown".to_string(), modified)
                }
            };

            let modified = metadata.modified().ok();
            let parsed = Version::parse(&version).ok();
            backups.push((
                BackupInfo {
                    backup_path: entry.path(),
                    original_path: current_exe.to_path_buf(),
                    version,
                    backup_time,
                    size: metadata.len(),
                    checksum: None,
                },
                modified,
                parsed,
            ));
        }

        backups.sort_by(|(a, a_modified, a_version), (b, b_modified, b_version)| {
            b.backup_time
                .cmp(&a.backup_time)
                .then_with(|| b_modified.cmp(a_modified))
                .then_with(|| b_version.cmp(a_version))
        });
        Ok(backups.into_iter().map(|(info, _, _)| info).collect())
    }

    /// Deletes all but the `keep` newest backups. Zero means the default of 5.
    ///
    /// Returns the number of backups removed.
    pub async fn cleanup_old_backups(&self, keep: usize, current_exe: &Path) -> Result<usize> {
        let keep = if keep == 0 { DEFAULT_BACKUP_KEEP } else { keep };
        let backups = self.list_backups(current_exe).await?;

        let mut removed = 0;
        for backup in backups.iter().skip(keep) {
            debug!("Removing old backup {}", backup.backup_path.display());
            match fs::remove_file(&backup.backup_path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove {}: {}", backup.backup_path.display(), e),
            }
        }

        if removed > 0 {
            info!("Removed {} old backup(s), kept {}", removed, backups.len() - removed);
        }
        Ok(removed)
    }

    /// Puts `backup` back at `target`, retrying a few times for busy files.
    pub async fn restore_backup(&self, backup: &Path, target: &Path) -> Result<()> {
        if !backup.exists() {
            anyhow::bail!("No backup found at {}", backup.display());
        }

        warn!("Restoring {} from backup {}", target.display(), backup.display());

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt_restore(backup, target).await {
                Ok(()) => {
                    info!("Successfully restored from backup");
                    return Ok(());
                }
                Err(e) if attempt < RESTORE_ATTEMPTS => {
                    warn!("Restore attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(std::time::Duration::from_millis(RESTORE_RETRY_DELAY_MS))
                        .await;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "Failed to restore backup after {RESTORE_ATTEMPTS} attempts"
                    )));
                }
            }
        }
    }

    async fn attempt_restore(&self, backup: &Path, target: &Path) -> Result<()> {
        let strategy = ReplaceStrategy::probe(target);
        replace_executable(backup, target, strategy).await?;
        set_executable(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &Path) -> BackupStore {
        BackupStore::new(dir, "delta", &Platform::new("linux", "x86_64"))
    }

    #[test]
    fn test_file_name_round_trip() {
        let store = store(Path::new("/tmp"));
        let at = Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 15).unwrap();
        let name = store.backup_file_name(&Version::parse("1.2.0-beta.1").unwrap(), at);
        assert_eq!(name, "delta_1.2.0-beta.1_20240501_093015");

        let (version, time) = store.parse_file_name(&name).unwrap();
        assert_eq!(version, "1.2.0-beta.1");
        assert_eq!(time, at.with_timezone(&Utc));

        assert!(store.parse_file_name("other_1.0.0_20240501_093015").is_none());
    }

    #[tokio::test]
    async fn test_create_backup() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("delta");
        std::fs::write(&exe, b"v1 binary").unwrap();

        let store = store(&temp.path().join("backups"));
        let info = store.create_backup(&exe, &Version::new(1, 0, 0)).await.unwrap();

        assert_eq!(info.version, "1.0.0");
        assert_eq!(info.size, 9);
        assert_eq!(std::fs::read(&info.backup_path).unwrap(), b"v1 binary");
        assert!(info.backup_path.file_name().unwrap().to_string_lossy().starts_with("delta_1.0.0_"));

        let listed = store.list_backups(&exe).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].checksum.is_none());
        assert_eq!(Some(listed[0].checksum().await.unwrap()), info.checksum);
        assert_eq!(store.version_of(&listed[0].backup_path), Some(Version::new(1, 0, 0)));
    }

    #[tokio::test]
    async fn test_create_backup_missing_source() {
        let temp = TempDir::new().unwrap();
        let store = store(temp.path());

        let err = store
            .create_backup(&temp.path().join("missing"), &Version::new(1, 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::BackupFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_newest_five() {
        let temp = TempDir::new().unwrap();
        let store = store(temp.path());
        for day in 1..=8 {
            let name = format!("delta_1.0.{day}_202405{day:02}_120000");
            std::fs::write(temp.path().join(name), b"old").unwrap();
        }
        std::fs::write(temp.path().join("unrelated.txt"), b"keep me").unwrap();

        let exe = temp.path().join("delta");
        let removed = store.cleanup_old_backups(5, &exe).await.unwrap();
        assert_eq!(removed, 3);

        let versions: Vec<_> =
            store.list_backups(&exe).await.unwrap().into_iter().map(|b| b.version).collect();
        assert_eq!(versions, vec!["1.0.8", "1.0.7", "1.0.6", "1.0.5", "1.0.4"]);
        assert!(temp.path().join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn test_cleanup_zero_uses_default() {
        let temp = TempDir::new().unwrap();
        let store = store(temp.path());
        for day in 1..=7 {
            let name = format!("delta_1.0.{day}_202405{day:02}_120000");
            std::fs::write(temp.path().join(name), b"old").unwrap();
        }

        assert_eq!(store.cleanup_old_backups(0, Path::new("delta")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_same_second_backups_newest_version_first() {
        let temp = TempDir::new().unwrap();
        let store = store(temp.path());
        for version in ["1.0.0", "1.1.0"] {
            let name = format!("delta_{version}_20240501_120000");
            std::fs::write(temp.path().join(name), b"bin").unwrap();
        }
        let stamp = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_714_564_800);
        for entry in std::fs::read_dir(temp.path()).unwrap() {
            let file = std::fs::File::options().write(true).open(entry.unwrap().path()).unwrap();
            file.set_modified(stamp).unwrap();
        }

        let versions: Vec<_> = store
            .list_backups(Path::new("delta"))
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.version)
            .collect();
        assert_eq!(versions, vec!["1.1.0", "1.0.0"]);
    }

    #[tokio::test]
    async fn test_restore_backup() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("delta");
        std::fs::write(&exe, b"good").unwrap();

        let store = store(&temp.path().join("backups"));
        let info = store.create_backup(&exe, &Version::new(1, 0, 0)).await.unwrap();
        std::fs::write(&exe, b"broken").unwrap();

        store.restore_backup(&info.backup_path, &exe).await.unwrap();
        assert_eq!(std::fs::read(&exe).unwrap(), b"good");
        assert!(info.backup_path.exists());
    }
}
