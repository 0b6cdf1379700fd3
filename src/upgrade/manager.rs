//! The update manager: configuration owner and install entry point.
//!
//! The checker, the scheduler and the CLI all depend on [`UpdateManager`]
//! rather than on each other. [`ReleaseUpdateManager`] is built once per
//! process and shared as `Arc<dyn UpdateManager>`.

use super::backup::BackupInfo;
use super::download::{DownloadResult, Downloader};
use super::history::{UpdateHistory, UpdateRecord};
use super::installer::{InstallFailure, InstallResult, UpdateInstaller};
use super::release::ReleaseProvider;
use crate::config::ConfigStore;
use crate::constants::DEFAULT_BACKUP_KEEP;
use crate::core::UpdateError;
use crate::upgrade::config::UpdateConfig;
use crate::utils::platform::Platform;
use crate::version::{BuildInfo, Version};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Owns update configuration and performs installs.
#[async_trait]
pub trait UpdateManager: Send + Sync {
    /// Downloads the release tagged `version` and installs it.
    ///
    /// `"latest"` resolves to the newest release on the configured channel.
    ///
    /// # Errors
    ///
    /// [`UpdateError::UpdatesDisabled`] when updates are switched off, a
    /// release/download error, or an
    /// [`InstallFailure`](super::installer::InstallFailure).
    async fn download_and_install_update(&self, version: &str) -> Result<InstallResult>;

    /// Snapshot of the current configuration.
    fn get_config(&self) -> UpdateConfig;

    /// Replaces and persists the configuration.
    async fn update_config(&self, config: UpdateConfig) -> Result<()>;

    /// Version of the live executable, tracking installs and rollbacks.
    fn current_version(&self) -> Version;

    /// Build stamp of the running executable.
    fn build_info(&self) -> BuildInfo;

    /// Restores the newest backup over the live executable.
    ///
    /// # Errors
    ///
    /// [`UpdateError::UpdatesDisabled`], or [`UpdateError::NoBackupsAvailable`]
    /// when there is nothing to restore.
    async fn rollback_to_previous_version(&self) -> Result<BackupInfo>;
}

/// Default [`UpdateManager`] wiring a release provider, a downloader and the installer.
pub struct ReleaseUpdateManager {
    store: Arc<dyn ConfigStore>,
    config: RwLock<UpdateConfig>,
    provider: Arc<dyn ReleaseProvider>,
    downloader: Arc<dyn Downloader>,
    installer: UpdateInstaller,
    build: BuildInfo,
    platform: Platform,
    history: Arc<UpdateHistory>,
}

impl ReleaseUpdateManager {
    /// Loads configuration from `store` and assembles the manager.
    pub async fn new(
        store: Arc<dyn ConfigStore>,
        provider: Arc<dyn ReleaseProvider>,
        downloader: Arc<dyn Downloader>,
        installer: UpdateInstaller,
        build: BuildInfo,
    ) -> Result<Self> {
        let config = store.load().await.context("Failed to load update configuration")?;
        let platform = installer.config().platform.clone();

        Ok(Self {
            store,
            config: RwLock::new(config),
            provider,
            downloader,
            installer,
            build,
            platform,
            history: Arc::new(UpdateHistory::in_memory()),
        })
    }

    /// Records every install and rollback in `history`.
    #[must_use]
    pub fn with_history(mut self, history: Arc<UpdateHistory>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn history(&self) -> &Arc<UpdateHistory> {
        &self.history
    }

    #[must_use]
    pub fn installer(&self) -> &UpdateInstaller {
        &self.installer
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn ReleaseProvider> {
        &self.provider
    }

    fn ensure_enabled(&self) -> Result<UpdateConfig> {
        let config = self.get_config();
        if !config.enabled {
            return Err(UpdateError::UpdatesDisabled.into());
        }
        Ok(config)
    }

    async fn fetch_release(&self, version: &str, config: &UpdateConfig) -> Result<DownloadResult> {
        let release = if version.eq_ignore_ascii_case("latest") {
            self.provider.get_latest_release(&config.channel).await?
        } else {
            self.provider
                .get_release_by_tag(version)
                .await
                .with_context(|| format!("Failed to find release {version}"))?
        };
        let asset = self.provider.select_asset_for_platform(&release.assets, &self.platform)?;
        debug!("Selected asset {} for {}", asset.name, self.platform);

        self.downloader.download(&release, &asset).await
    }

    fn record_history(&self, record: UpdateRecord) {
        let record = record.with_environment(self.get_config().channel.to_string(), self.platform.to_string());
        if let Err(e) = self.history.record(record) {
            warn!("Failed to record update history: {:#}", e);
        }
    }

    /// Restores `backup_path` over the live executable and records the rollback.
    pub async fn restore_backup(&self, backup_path: &Path) -> Result<()> {
        let from = self.installer.current_version().to_tag();
        let to = self
            .installer
            .backup_version(backup_path)
            .map(|v| v.to_string())
            .unwrap_or_else(|| backup_path.display().to_string());

        let outcome = self.installer.rollback(backup_path).await;
        self.record_history(UpdateRecord::rollback(&from, &to, outcome.as_ref().map(|_| ())));
        outcome
    }
}

#[async_trait]
impl UpdateManager for ReleaseUpdateManager {
    async fn download_and_install_update(&self, version: &str) -> Result<InstallResult> {
        let config = self.ensure_enabled()?;

        info!("Preparing update to {}", version);
        let from = self.installer.current_version().to_tag();
        let download = match self.fetch_release(version, &config).await {
            Ok(download) => download,
            Err(e) => {
                self.record_history(UpdateRecord::failed_before_install(&from, version, &e));
                return Err(e);
            }
        };

        let mut result = match self.installer.install_update(&download).await {
            Ok(result) => result,
            Err(e) => {
                let record = match e.chain().find_map(|c| c.downcast_ref::<InstallFailure>()) {
                    Some(failure) => UpdateRecord::from_install(&failure.result),
                    None => UpdateRecord::failed_before_install(&from, &download.version, &e),
                };
                self.record_history(record.with_download_size(download.size));
                return Err(e);
            }
        };

        if !config.backup_before_update
            && let Some(backup) = result.backup_path.take()
        {
            // the install always takes a rollback point; drop it when not wanted
            if let Err(e) = tokio::fs::remove_file(&backup).await {
                warn!("Failed to remove backup {}: {}", backup.display(), e);
            }
        }

        if let Err(e) = self.installer.cleanup_old_backups(DEFAULT_BACKUP_KEEP).await {
            warn!("Failed to prune old backups: {}", e);
        }

        self.record_history(UpdateRecord::from_install(&result).with_download_size(download.size));

        let mut updated = self.get_config();
        updated.last_version = download.version.clone();
        if !updated.postponed_version.is_empty()
            && Version::from_tag(&updated.postponed_version).ok()
                == Version::from_tag(&download.version).ok()
        {
            updated.clear_postponement();
        }
        if let Err(e) = self.update_config(updated).await {
            warn!("Failed to record installed version: {}", e);
        }

        Ok(result)
    }

    fn get_config(&self) -> UpdateConfig {
        self.config.read().map(|c| c.clone()).unwrap_or_default()
    }

    async fn update_config(&self, config: UpdateConfig) -> Result<()> {
        config.validate()?;
        self.store.save(&config).await?;
        let mut guard =
            self.config.write().map_err(|_| anyhow::anyhow!("update config lock poisoned"))?;
        *guard = config;
        Ok(())
    }

    fn current_version(&self) -> Version {
        self.installer.current_version()
    }

    fn build_info(&self) -> BuildInfo {
        BuildInfo {
            version: self.installer.current_version(),
            ..self.build.clone()
        }
    }

    async fn rollback_to_previous_version(&self) -> Result<BackupInfo> {
        self.ensure_enabled()?;

        let backup = self
            .installer
            .get_backup_info()
            .await?
            .into_iter()
            .next()
            .ok_or(UpdateError::NoBackupsAvailable)?;

        info!("Rolling back to {} from {}", backup.version, backup.backup_path.display());
        self.restore_backup(&backup.backup_path).await?;
        Ok(backup)
    }
}
