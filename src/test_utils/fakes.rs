//! In-memory implementations of the update seams.

use crate::core::UpdateError;
use crate::upgrade::backup::BackupInfo;
use crate::upgrade::config::UpdateConfig;
use crate::upgrade::download::{DownloadResult, Downloader};
use crate::upgrade::installer::InstallResult;
use crate::upgrade::manager::UpdateManager;
use crate::upgrade::release::{Asset, RateLimitStatus, Release, ReleaseProvider};
use crate::upgrade::validation::BinaryValidator;
use crate::upgrade::verification::ChecksumVerifier;
use crate::version::{BuildInfo, ReleaseChannel, Version};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Serves a fixed list of releases; the last one is "latest".
#[derive(Default)]
pub struct FakeReleaseProvider {
    releases: Mutex<Vec<Release>>,
    delay: Mutex<Option<Duration>>,
    failing: AtomicBool,
    latest_calls: AtomicUsize,
    token: Mutex<Option<String>>,
}

impl FakeReleaseProvider {
    pub fn with_releases(releases: Vec<Release>) -> Self {
        Self {
            releases: Mutex::new(releases),
            ..Self::default()
        }
    }

    /// Makes every request wait `delay` first.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Makes every request fail with [`UpdateError::ReleaseFetch`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn push_release(&self, release: Release) {
        self.releases.lock().unwrap().push(release);
    }

    /// Number of `get_latest_release` calls so far.
    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    async fn simulate_request(&self) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpdateError::ReleaseFetch {
                reason: "simulated network failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl ReleaseProvider for FakeReleaseProvider {
    async fn get_latest_release(&self, _channel: &ReleaseChannel) -> Result<Release> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_request().await?;

        self.releases.lock().unwrap().iter().rev().find(|r| !r.draft).cloned().ok_or_else(|| {
            UpdateError::ReleaseFetch {
                reason: "no releases".to_string(),
            }
            .into()
        })
    }

    async fn get_release_by_tag(&self, tag: &str) -> Result<Release> {
        self.simulate_request().await?;

        let releases = self.releases.lock().unwrap();
        let wanted = Version::from_tag(tag).ok();
        releases
            .iter()
            .find(|r| {
                r.tag_name == tag
                    || (wanted.is_some() && Version::from_tag(&r.tag_name).ok() == wanted)
                    || (tag == "latest" && !r.draft)
            })
            .cloned()
            .ok_or_else(|| {
                UpdateError::ReleaseFetch {
                    reason: format!("release {tag} not found"),
                }
                .into()
            })
    }

    fn get_rate_limit_status(&self) -> RateLimitStatus {
        let authenticated = self.token.lock().unwrap().is_some();
        RateLimitStatus {
            limit: if authenticated { 5000 } else { 60 },
            remaining: if authenticated { 5000 } else { 60 },
            reset_at: None,
            authenticated,
        }
    }

    fn set_token(&self, token: Option<String>) {
        *self.token.lock().unwrap() = token;
    }
}

/// Writes fixed bytes to `<dir>/<asset name>` instead of downloading.
pub struct FakeDownloader {
    dir: PathBuf,
    contents: Vec<u8>,
}

impl FakeDownloader {
    pub fn new(dir: impl Into<PathBuf>, contents: Vec<u8>) -> Self {
        Self {
            dir: dir.into(),
            contents,
        }
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, release: &Release, asset: &Asset) -> Result<DownloadResult> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let file_path = self.dir.join(&asset.name);
        tokio::fs::write(&file_path, &self.contents).await?;

        Ok(DownloadResult {
            file_path,
            version: release.tag_name.clone(),
            size: self.contents.len() as u64,
            checksum: ChecksumVerifier::checksum_bytes(&self.contents),
            verified: false,
            download_time: Duration::ZERO,
        })
    }
}

/// Accepts any existing regular file.
pub struct AcceptAllValidator;

#[async_trait]
impl BinaryValidator for AcceptAllValidator {
    async fn validate(&self, path: &Path) -> Result<()> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => Ok(()),
            _ => Err(UpdateError::InvalidBinary {
                path: path.display().to_string(),
                reason: "not a regular file".to_string(),
            }
            .into()),
        }
    }
}

/// Records install attempts and fails the first N of them.
pub struct FakeUpdateManager {
    config: Mutex<UpdateConfig>,
    build: BuildInfo,
    attempts: Mutex<Vec<String>>,
    failures_left: AtomicU32,
    install_delay: Mutex<Option<Duration>>,
}

impl FakeUpdateManager {
    pub fn new(config: UpdateConfig, build: BuildInfo) -> Self {
        Self {
            config: Mutex::new(config),
            build,
            attempts: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(0),
            install_delay: Mutex::new(None),
        }
    }

    /// Replaces the configuration without validation.
    pub fn set_config(&self, config: UpdateConfig) {
        *self.config.lock().unwrap() = config;
    }

    /// Fails the next `count` installs; `u32::MAX` fails forever.
    pub fn fail_installs(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn set_install_delay(&self, delay: Duration) {
        *self.install_delay.lock().unwrap() = Some(delay);
    }

    /// Versions passed to `download_and_install_update`, in call order.
    pub fn install_attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    fn should_fail(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl UpdateManager for FakeUpdateManager {
    async fn download_and_install_update(&self, version: &str) -> Result<InstallResult> {
        self.attempts.lock().unwrap().push(version.to_string());
        let delay = *self.install_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail() {
            return Err(UpdateError::InstallFailed {
                reason: "simulated install failure".to_string(),
            }
            .into());
        }

        Ok(InstallResult {
            success: true,
            backup_path: None,
            new_binary_path: None,
            old_version: self.build.version_tag(),
            new_version: version.to_string(),
            install_time: Duration::ZERO,
            error: None,
            log_entries: Vec::new(),
            rollback: None,
        })
    }

    fn get_config(&self) -> UpdateConfig {
        self.config.lock().unwrap().clone()
    }

    async fn update_config(&self, config: UpdateConfig) -> Result<()> {
        config.validate()?;
        self.set_config(config);
        Ok(())
    }

    fn current_version(&self) -> Version {
        self.build.version.clone()
    }

    fn build_info(&self) -> BuildInfo {
        self.build.clone()
    }

    async fn rollback_to_previous_version(&self) -> Result<BackupInfo> {
        Err(UpdateError::NoBackupsAvailable.into())
    }
}
