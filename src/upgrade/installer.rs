//! Installs a downloaded release over the live executable.
//!
//! [`UpdateInstaller::install_update`] runs a fixed pipeline and journals each
//! step into the returned [`InstallResult`]:
//!
//! ```text
//! extract ─► validate ─► backup ─► install ─► verify ─► cleanup
//!                                    │          │
//!                                    └─► rollback ◄─┘
//! ```
//!
//! - Failures before the backup leave the live executable untouched and no backup behind.
//! - Failures after the backup trigger a rollback; the rollback outcome is
//!   recorded separately and never replaces the original error.
//! - The per-attempt extraction directory is always removed.
//!
//! On failure the error is an [`InstallFailure`] carrying the full journal, so
//! callers can still report the backup path.

use super::archive::{ArtifactMatcher, extract_archive};
use super::backup::{BackupInfo, BackupStore};
use super::download::DownloadResult;
use super::replace::{ReplaceStrategy, replace_executable};
use super::validation::BinaryValidator;
use crate::constants::PRODUCT_NAME;
use crate::core::UpdateError;
use crate::utils::fs::ensure_dir;
use crate::utils::platform::{Platform, get_data_dir};
use crate::version::Version;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// State of one journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// Step started
    Progress,
    /// Step finished
    Success,
    /// Step failed
    Error,
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Progress => "progress",
            Self::Success => "success",
            Self::Error => "error",
        })
    }
}

/// One line of the install journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallLogEntry {
    pub timestamp: DateTime<Utc>,
    pub step: String,
    pub status: LogStatus,
    pub message: String,
    pub error: Option<String>,
}

/// What happened when restoring the backup after a failed install.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub attempted: bool,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Outcome of one install attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallResult {
    pub success: bool,
    /// Backup of the previous executable, once taken
    pub backup_path: Option<PathBuf>,
    /// Path of the installed executable
    pub new_binary_path: Option<PathBuf>,
    /// Version replaced (e.g. `v1.0.0`)
    pub old_version: String,
    /// Version installed (e.g. `v1.1.0`)
    pub new_version: String,
    pub install_time: Duration,
    pub error: Option<String>,
    /// Ordered journal of pipeline steps
    pub log_entries: Vec<InstallLogEntry>,
    /// Present only when a rollback was needed
    pub rollback: Option<RollbackOutcome>,
}

impl InstallResult {
    fn new(old_version: String, new_version: String) -> Self {
        Self {
            success: false,
            backup_path: None,
            new_binary_path: None,
            old_version,
            new_version,
            install_time: Duration::ZERO,
            error: None,
            log_entries: Vec::new(),
            rollback: None,
        }
    }

    fn log(&mut self, step: &str, status: LogStatus, message: impl Into<String>) {
        let message = message.into();
        match status {
            LogStatus::Error => error!("[{}] {}", step, message),
            _ => debug!("[{}] {}: {}", step, status, message),
        }
        self.log_entries.push(InstallLogEntry {
            timestamp: Utc::now(),
            step: step.to_string(),
            status,
            message,
            error: None,
        });
    }

    fn log_error(&mut self, step: &str, message: impl Into<String>, err: &anyhow::Error) {
        self.log(step, LogStatus::Error, message);
        if let Some(entry) = self.log_entries.last_mut() {
            entry.error = Some(format!("{err:#}"));
        }
    }

    /// Steps in journal order, deduplicated.
    #[must_use]
    pub fn steps(&self) -> Vec<&str> {
        let mut steps: Vec<&str> = Vec::new();
        for entry in &self.log_entries {
            if steps.last() != Some(&entry.step.as_str()) {
                steps.push(&entry.step);
            }
        }
        steps
    }
}

/// Install error carrying the journal of the failed attempt.
#[derive(Debug, Error)]
#[error("update installation failed")]
pub struct InstallFailure {
    pub result: Box<InstallResult>,
    #[source]
    pub source: anyhow::Error,
}

/// Paths and identity the installer works with.
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Live executable to replace
    pub current_exe: PathBuf,
    /// Where backups are kept
    pub backup_dir: PathBuf,
    /// Parent of per-attempt extraction directories
    pub temp_dir: PathBuf,
    pub product_name: String,
    pub platform: Platform,
    /// Version of the live executable at start-up
    pub current_version: Version,
}

impl InstallerConfig {
    /// Configuration for replacing the running process's own executable.
    pub fn for_current_process(current_version: Version) -> Result<Self> {
        let current_exe =
            std::env::current_exe().context("Failed to determine current executable path")?;
        let data_dir = get_data_dir()?;

        Ok(Self {
            current_exe,
            backup_dir: data_dir.join("backups"),
            temp_dir: std::env::temp_dir(),
            product_name: PRODUCT_NAME.to_string(),
            platform: Platform::current(),
            current_version,
        })
    }
}

/// Runs the install pipeline and manages backups.
pub struct UpdateInstaller {
    config: InstallerConfig,
    validator: Arc<dyn BinaryValidator>,
    matcher: ArtifactMatcher,
    backups: BackupStore,
    /// Version currently at `current_exe`; moves with installs and rollbacks
    live_version: RwLock<Version>,
}

impl UpdateInstaller {
    pub fn new(config: InstallerConfig, validator: Arc<dyn BinaryValidator>) -> Self {
        let matcher = ArtifactMatcher::new(config.product_name.clone());
        let backups =
            BackupStore::new(config.backup_dir.clone(), config.product_name.clone(), &config.platform);
        let live_version = RwLock::new(config.current_version.clone());
        Self {
            config,
            validator,
            matcher,
            backups,
            live_version,
        }
    }

    /// Version of the executable now installed at the live path.
    #[must_use]
    pub fn current_version(&self) -> Version {
        match self.live_version.read() {
            Ok(version) => version.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_current_version(&self, version: Version) {
        let mut guard = match self.live_version.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!("Live executable is now {}", version);
        *guard = version;
    }

    /// Replaces the live executable with the binary in `download`.
    ///
    /// # Errors
    ///
    /// An [`InstallFailure`] wrapping the stage error and the journal.
    pub async fn install_update(&self, download: &DownloadResult) -> Result<InstallResult> {
        let started = Instant::now();
        let live_version = self.current_version();
        let mut result = InstallResult::new(live_version.to_tag(), download.version.clone());
        result.log("start", LogStatus::Success, "Starting installation process");

        let outcome = match self.create_workdir() {
            Ok(workdir) => {
                let outcome =
                    self.run_pipeline(download, &live_version, workdir.path(), &mut result).await;

                result.log("cleanup", LogStatus::Progress, "Cleaning up temporary files");
                let workdir_path = workdir.path().to_path_buf();
                match workdir.close() {
                    Ok(()) => result.log("cleanup", LogStatus::Success, "Cleanup completed"),
                    Err(e) => {
                        warn!("Failed to remove {}: {}", workdir_path.display(), e);
                        result.log(
                            "cleanup",
                            LogStatus::Error,
                            format!("Failed to remove {}: {e}", workdir_path.display()),
                        );
                    }
                }
                outcome
            }
            Err(e) => Err(e),
        };

        result.install_time = started.elapsed();
        match outcome {
            Ok(()) => {
                match Version::from_tag(&download.version) {
                    Ok(installed) => self.set_current_version(installed),
                    Err(_) => warn!("Installed release {} has no parsable version", download.version),
                }
                result.success = true;
                result.log(
                    "complete",
                    LogStatus::Success,
                    format!("Installation completed successfully in {:?}", result.install_time),
                );
                info!("Installed {} over {}", result.new_version, result.old_version);
                Ok(result)
            }
            Err(source) => {
                result.error = Some(format!("{source:#}"));
                Err(InstallFailure {
                    result: Box::new(result),
                    source,
                }
                .into())
            }
        }
    }

    fn create_workdir(&self) -> Result<tempfile::TempDir> {
        ensure_dir(&self.config.temp_dir)?;
        tempfile::Builder::new()
            .prefix(&format!("{}-install-", self.config.product_name))
            .tempdir_in(&self.config.temp_dir)
            .with_context(|| {
                format!("Failed to create extraction directory in {}", self.config.temp_dir.display())
            })
    }

    async fn run_pipeline(
        &self,
        download: &DownloadResult,
        live_version: &Version,
        workdir: &Path,
        result: &mut InstallResult,
    ) -> Result<()> {
        result.log("extract", LogStatus::Progress, "Extracting downloaded file");
        let binary = match self.extract(&download.file_path, workdir).await {
            Ok(binary) => binary,
            Err(e) => {
                result.log_error("extract", "Failed to extract", &e);
                return Err(e);
            }
        };
        result.log("extract", LogStatus::Success, format!("Extracted to: {}", binary.display()));

        result.log("validate", LogStatus::Progress, "Validating extracted binary");
        if let Err(e) = self.validator.validate(&binary).await {
            result.log_error("validate", "Binary validation failed", &e);
            return Err(e);
        }
        result.log("validate", LogStatus::Success, "Binary validation passed");

        result.log("backup", LogStatus::Progress, "Creating backup of current binary");
        let backup = match self.create_validated_backup(live_version).await {
            Ok(backup) => backup,
            Err(e) => {
                result.log_error("backup", "Backup failed", &e);
                return Err(e);
            }
        };
        result.backup_path = Some(backup.backup_path.clone());
        result.log(
            "backup",
            LogStatus::Success,
            format!("Backup created: {}", backup.backup_path.display()),
        );

        result.log("install", LogStatus::Progress, "Installing new binary");
        let installed = match self.install_binary(&binary).await {
            Ok(installed) => installed,
            Err(e) => {
                result.log_error("install", "Installation failed", &e);
                self.rollback_after_failure(&backup.backup_path, result).await;
                return Err(e);
            }
        };
        result.new_binary_path = Some(installed.clone());
        result.log(
            "install",
            LogStatus::Success,
            format!("Installation completed: {}", installed.display()),
        );

        result.log("verify", LogStatus::Progress, "Verifying installation");
        if let Err(e) = self.verify_installation(&installed).await {
            result.log_error("verify", "Installation verification failed", &e);
            self.rollback_after_failure(&backup.backup_path, result).await;
            return Err(e);
        }
        result.log("verify", LogStatus::Success, "Installation verification passed");

        Ok(())
    }

    async fn extract(&self, archive: &Path, workdir: &Path) -> Result<PathBuf> {
        let archive = archive.to_path_buf();
        let dest = workdir.to_path_buf();
        let matcher = self.matcher.clone();
        let platform = self.config.platform.clone();

        tokio::task::spawn_blocking(move || extract_archive(&archive, &dest, &matcher, &platform))
            .await
            .context("Extraction task panicked")?
    }

    async fn create_validated_backup(&self, live_version: &Version) -> Result<BackupInfo> {
        let backup = self.backups.create_backup(&self.config.current_exe, live_version).await?;

        if let Err(e) = self.validator.validate(&backup.backup_path).await {
            let _ = tokio::fs::remove_file(&backup.backup_path).await;
            return Err(UpdateError::BackupFailed {
                reason: format!("backup does not run: {e:#}"),
            }
            .into());
        }
        Ok(backup)
    }

    async fn install_binary(&self, binary: &Path) -> Result<PathBuf> {
        let target = &self.config.current_exe;
        let strategy = ReplaceStrategy::probe(target);
        debug!("Replacing {} using {:?}", target.display(), strategy);

        replace_executable(binary, target, strategy).await.map_err(|e| UpdateError::InstallFailed {
            reason: format!("{e:#}"),
        })?;
        Ok(target.clone())
    }

    async fn verify_installation(&self, installed: &Path) -> Result<()> {
        if installed != self.config.current_exe {
            return Err(UpdateError::VerificationFailed {
                reason: format!(
                    "installed at {} instead of {}",
                    installed.display(),
                    self.config.current_exe.display()
                ),
            }
            .into());
        }

        self.validator.validate(installed).await.map_err(|e| {
            UpdateError::VerificationFailed {
                reason: format!("{e:#}"),
            }
            .into()
        })
    }

    async fn rollback_after_failure(&self, backup: &Path, result: &mut InstallResult) {
        result.log("rollback", LogStatus::Progress, "Attempting rollback");
        let outcome = match self.rollback(backup).await {
            Ok(()) => {
                result.log("rollback", LogStatus::Success, "Rollback completed");
                RollbackOutcome {
                    attempted: true,
                    succeeded: true,
                    error: None,
                }
            }
            Err(e) => {
                result.log_error("rollback", "Rollback failed", &e);
                RollbackOutcome {
                    attempted: true,
                    succeeded: false,
                    error: Some(format!("{e:#}")),
                }
            }
        };
        result.rollback = Some(outcome);
    }

    /// Restores `backup_path` over the live executable after re-validating it.
    pub async fn rollback(&self, backup_path: &Path) -> Result<()> {
        self.validator
            .validate(backup_path)
            .await
            .with_context(|| format!("Refusing to restore {}", backup_path.display()))?;

        self.backups.restore_backup(backup_path, &self.config.current_exe).await?;
        if let Some(restored) = self.backups.version_of(backup_path) {
            self.set_current_version(restored);
        }
        Ok(())
    }

    /// Version a backup file holds, read from its name.
    #[must_use]
    pub fn backup_version(&self, backup_path: &Path) -> Option<Version> {
        self.backups.version_of(backup_path)
    }

    /// Backups of this product, newest first.
    pub async fn get_backup_info(&self) -> Result<Vec<BackupInfo>> {
        self.backups.list_backups(&self.config.current_exe).await
    }

    /// Deletes all but the `keep` newest backups (0 means 5).
    pub async fn cleanup_old_backups(&self, keep: usize) -> Result<usize> {
        self.backups.cleanup_old_backups(keep, &self.config.current_exe).await
    }

    #[must_use]
    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }
}
