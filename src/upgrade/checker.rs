//! Update availability checks.
//!
//! [`UpdateChecker`] fetches the latest release for the configured channel and
//! applies the update policy to it. Only one check runs at a time per checker;
//! a concurrent call fails fast with [`UpdateError::CheckInProgress`] instead of
//! queueing behind the network request. Successful results are cached for 30
//! minutes and the check time is persisted through the manager.

use super::manager::UpdateManager;
use super::metrics::{CheckObservation, MetricsSink};
use super::release::ReleaseProvider;
use crate::constants::CHECK_CACHE_TTL;
use crate::core::UpdateError;
use crate::utils::platform::Platform;
use crate::version::{Version, VersionComparator};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of one update check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub has_update: bool,
    pub current_version: String,
    pub latest_version: String,
    /// Download URL of the platform asset; absent when no asset matched
    pub download_url: Option<String>,
    pub asset_name: Option<String>,
    pub asset_size: Option<u64>,
    pub release_notes: String,
    pub is_prerelease: bool,
    pub published_at: Option<DateTime<Utc>>,
}

/// Clears the in-flight flag when the check finishes, however it finishes.
struct CheckGuard<'a>(&'a AtomicBool);

impl<'a> CheckGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, UpdateError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| UpdateError::CheckInProgress)
    }
}

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Decides whether an update is available.
pub struct UpdateChecker {
    manager: Arc<dyn UpdateManager>,
    provider: Arc<dyn ReleaseProvider>,
    platform: Platform,
    metrics: Option<Arc<dyn MetricsSink>>,
    checking: AtomicBool,
    last_result: Mutex<Option<(UpdateInfo, Instant)>>,
}

impl UpdateChecker {
    pub fn new(manager: Arc<dyn UpdateManager>, provider: Arc<dyn ReleaseProvider>) -> Self {
        Self {
            manager,
            provider,
            platform: Platform::current(),
            metrics: None,
            checking: AtomicBool::new(false),
            last_result: Mutex::new(None),
        }
    }

    /// Checks assets against `platform` instead of the host.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether a check is running right now.
    #[must_use]
    pub fn is_checking(&self) -> bool {
        self.checking.load(Ordering::Acquire)
    }

    /// Fetches the latest release and applies the update policy.
    ///
    /// # Errors
    ///
    /// [`UpdateError::CheckInProgress`] when another check is running,
    /// [`UpdateError::InvalidVersion`] for an unparseable release tag, or a
    /// release fetch error.
    pub async fn check_for_updates(&self) -> Result<UpdateInfo> {
        let _guard = CheckGuard::acquire(&self.checking)?;
        let started = Instant::now();

        let outcome = self.perform_check().await;

        if let Some(metrics) = &self.metrics {
            metrics.record_check(CheckObservation {
                success: outcome.is_ok(),
                duration: started.elapsed(),
                has_update: outcome.as_ref().is_ok_and(|info| info.has_update),
                latest_version: outcome.as_ref().ok().map(|info| info.latest_version.clone()),
            });
        }

        let info = outcome?;
        if let Ok(mut cache) = self.last_result.lock() {
            *cache = Some((info.clone(), Instant::now()));
        }

        let mut config = self.manager.get_config();
        config.set_last_check(Utc::now());
        if let Err(e) = self.manager.update_config(config).await {
            warn!("Failed to record update check time: {}", e);
        }

        Ok(info)
    }

    async fn perform_check(&self) -> Result<UpdateInfo> {
        let config = self.manager.get_config();
        let current = self.manager.current_version();

        debug!("Checking for updates on the {} channel", config.channel);
        let release = self
            .provider
            .get_latest_release(&config.channel)
            .await
            .context("Failed to fetch the latest release")?;
        let latest = Version::from_tag(&release.tag_name)?;

        let mut has_update = latest > current;

        if has_update
            && let Some(skip) = config.skip_version()
            && Version::from_tag(skip).is_ok_and(|skip| skip == latest)
        {
            debug!("Version {} is skipped", latest);
            has_update = false;
        }
        if has_update && !config.channel.matches(&latest) {
            debug!("Version {} is not on the {} channel", latest, config.channel);
            has_update = false;
        }
        if has_update && !config.allow_prerelease && latest.is_prerelease() {
            debug!("Version {} is a prerelease and prereleases are disabled", latest);
            has_update = false;
        }
        if has_update
            && self.manager.build_info().is_development()
            && VersionComparator::is_patch_only_bump(&current, &latest)
        {
            debug!("Development build: ignoring patch-level update to {}", latest);
            has_update = false;
        }

        let mut info = UpdateInfo {
            has_update,
            current_version: current.to_string(),
            latest_version: latest.to_string(),
            download_url: None,
            asset_name: None,
            asset_size: None,
            release_notes: release.body.clone().unwrap_or_default(),
            is_prerelease: latest.is_prerelease(),
            published_at: release.published_at,
        };

        if has_update && !release.assets.is_empty() {
            match self.provider.select_asset_for_platform(&release.assets, &self.platform) {
                Ok(asset) => {
                    info.download_url = Some(asset.browser_download_url);
                    info.asset_name = Some(asset.name);
                    info.asset_size = Some(asset.size);
                }
                Err(e) => warn!("No downloadable asset for {}: {}", self.platform, e),
            }
        }

        if info.has_update {
            info!("Update available: {} -> {}", info.current_version, info.latest_version);
        }
        Ok(info)
    }

    /// Whether a background check is due now.
    #[must_use]
    pub fn should_check(&self) -> bool {
        self.should_check_at(Utc::now())
    }

    /// Whether a background check is due at `now`.
    #[must_use]
    pub fn should_check_at(&self, now: DateTime<Utc>) -> bool {
        let config = self.manager.get_config();
        if !config.enabled || self.is_checking() {
            return false;
        }

        match config.last_check_time() {
            // a last_check in the future yields a negative delta, so not due
            Some(last) => {
                (now - last).to_std().is_ok_and(|elapsed| elapsed >= config.check_interval.duration())
            }
            None => true,
        }
    }

    /// Cached result if younger than 30 minutes, otherwise a fresh check.
    pub async fn get_available_update(&self) -> Result<UpdateInfo> {
        if let Some(info) = self.cached_update() {
            return Ok(info);
        }
        self.check_for_updates().await
    }

    /// The cached result, if still fresh.
    #[must_use]
    pub fn cached_update(&self) -> Option<UpdateInfo> {
        let cache = self.last_result.lock().ok()?;
        cache
            .as_ref()
            .filter(|(_, at)| at.elapsed() < CHECK_CACHE_TTL)
            .map(|(info, _)| info.clone())
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<dyn UpdateManager> {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeReleaseProvider, FakeUpdateManager, release_with_assets};
    use crate::upgrade::config::UpdateConfig;
    use crate::upgrade::metrics::InMemoryMetrics;
    use crate::version::{BuildInfo, ReleaseChannel};
    use std::time::Duration;

    fn setup(
        current: &str,
        latest: &str,
        config: UpdateConfig,
        build_dev: bool,
    ) -> (UpdateChecker, Arc<FakeUpdateManager>, Arc<FakeReleaseProvider>) {
        let version = Version::parse(current).unwrap();
        let build = if build_dev {
            BuildInfo::development(version)
        } else {
            BuildInfo::release(version)
        };
        let manager = Arc::new(FakeUpdateManager::new(config, build));
        let provider = Arc::new(FakeReleaseProvider::with_releases(vec![release_with_assets(
            latest,
            &["delta-linux-amd64.tar.gz", "delta-darwin-arm64.tar.gz"],
        )]));
        let checker = UpdateChecker::new(manager.clone(), provider.clone())
            .with_platform(Platform::new("linux", "x86_64"));
        (checker, manager, provider)
    }

    #[tokio::test]
    async fn test_update_available() {
        let (checker, manager, _) = setup("1.0.0", "v1.1.0", UpdateConfig::default(), false);

        let info = checker.check_for_updates().await.unwrap();
        assert!(info.has_update);
        assert_eq!(info.current_version, "1.0.0");
        assert_eq!(info.latest_version, "1.1.0");
        assert_eq!(info.asset_name.as_deref(), Some("delta-linux-amd64.tar.gz"));
        assert!(manager.get_config().last_check_time().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_check_fails_fast() {
        let (checker, _, provider) = setup("1.0.0", "v1.1.0", UpdateConfig::default(), false);
        provider.set_delay(Duration::from_millis(200));

        let (first, second) = tokio::join!(checker.check_for_updates(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            checker.check_for_updates().await
        });

        assert!(first.is_ok());
        let err = second.unwrap_err();
        assert!(matches!(err.downcast_ref::<UpdateError>(), Some(UpdateError::CheckInProgress)));
        assert!(!checker.is_checking());
    }

    #[tokio::test]
    async fn test_skip_version_suppresses_update() {
        let config = UpdateConfig {
            skip_version: "1.1.0".to_string(),
            ..UpdateConfig::default()
        };
        let (checker, _, _) = setup("1.0.0", "v1.1.0", config, false);

        let info = checker.check_for_updates().await.unwrap();
        assert!(!info.has_update);
        assert!(info.download_url.is_none());
    }

    #[tokio::test]
    async fn test_development_build_ignores_patch_bump() {
        let (checker, _, _) = setup("1.0.0", "v1.0.1", UpdateConfig::default(), true);
        assert!(!checker.check_for_updates().await.unwrap().has_update);

        let (checker, _, _) = setup("1.0.0", "v1.1.0", UpdateConfig::default(), true);
        assert!(checker.check_for_updates().await.unwrap().has_update);
    }

    #[tokio::test]
    async fn test_prerelease_policy() {
        let (checker, _, _) = setup("1.0.0", "v1.1.0-beta.1", UpdateConfig::default(), false);
        let info = checker.check_for_updates().await.unwrap();
        assert!(!info.has_update);
        assert!(info.is_prerelease);

        let config = UpdateConfig {
            channel: ReleaseChannel::Beta,
            allow_prerelease: true,
            ..UpdateConfig::default()
        };
        let (checker, _, _) = setup("1.0.0", "v1.1.0-beta.1", config, false);
        assert!(checker.check_for_updates().await.unwrap().has_update);
    }

    #[tokio::test]
    async fn test_invalid_tag() {
        let (checker, _, _) = setup("1.0.0", "nightly", UpdateConfig::default(), false);
        let err = checker.check_for_updates().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::InvalidVersion { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_platform_asset_is_not_fatal() {
        let (checker, _, _) = setup("1.0.0", "v1.1.0", UpdateConfig::default(), false);
        let checker = checker.with_platform(Platform::new("plan9", "mips"));

        let info = checker.check_for_updates().await.unwrap();
        assert!(info.has_update);
        assert!(info.download_url.is_none());
    }

    #[tokio::test]
    async fn test_metrics_and_failures() {
        let (checker, _, provider) = setup("1.0.0", "v1.1.0", UpdateConfig::default(), false);
        let metrics = Arc::new(InMemoryMetrics::new());
        let checker = checker.with_metrics(metrics.clone());

        checker.check_for_updates().await.unwrap();
        provider.set_failing(true);
        assert!(checker.check_for_updates().await.is_err());

        let checks = metrics.checks();
        assert_eq!(checks.len(), 2);
        assert!(checks[0].success && checks[0].has_update);
        assert_eq!(checks[0].latest_version.as_deref(), Some("1.1.0"));
        assert_eq!(metrics.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_cached_result_is_reused() {
        let (checker, _, provider) = setup("1.0.0", "v1.1.0", UpdateConfig::default(), false);

        checker.get_available_update().await.unwrap();
        provider.set_failing(true);
        let info = checker.get_available_update().await.unwrap();

        assert!(info.has_update);
        assert_eq!(provider.latest_calls(), 1);
    }

    #[tokio::test]
    async fn test_should_check() {
        let (checker, manager, _) = setup("1.0.0", "v1.1.0", UpdateConfig::default(), false);
        let now = Utc::now();
        assert!(checker.should_check_at(now));

        let mut config = manager.get_config();
        config.set_last_check(now - chrono::Duration::hours(2));
        manager.update_config(config.clone()).await.unwrap();
        assert!(!checker.should_check_at(now));
        assert!(checker.should_check_at(now + chrono::Duration::hours(23)));

        config.last_check = "yesterday-ish".to_string();
        manager.set_config(config.clone());
        assert!(checker.should_check_at(now));

        config.enabled = false;
        manager.set_config(config);
        assert!(!checker.should_check_at(now));
    }
}
