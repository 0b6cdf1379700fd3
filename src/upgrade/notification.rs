//! Skip and postpone decisions for available updates.

use super::checker::UpdateInfo;
use super::config::NotificationLevel;
use super::manager::UpdateManager;
use crate::version::Version;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Persists the user's answers to an update prompt through the manager.
pub struct UpdateNotifier {
    manager: Arc<dyn UpdateManager>,
}

fn same_version(a: &str, b: &str) -> bool {
    match (Version::from_tag(a), Version::from_tag(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

impl UpdateNotifier {
    pub fn new(manager: Arc<dyn UpdateManager>) -> Self {
        Self { manager }
    }

    /// Never offer `version` again.
    pub async fn skip_version(&self, version: &str) -> Result<()> {
        let mut config = self.manager.get_config();
        config.skip_version = version.to_string();
        if same_version(&config.postponed_version, version) {
            config.clear_postponement();
        }
        self.manager.update_config(config).await?;
        info!("Skipping version {}", version);
        Ok(())
    }

    /// Suppress `version` until `until`.
    pub async fn postpone(&self, version: &str, until: DateTime<Utc>) -> Result<()> {
        let mut config = self.manager.get_config();
        config.set_postponement(version, until);
        self.manager.update_config(config).await?;
        info!("Postponed {} until {}", version, until);
        Ok(())
    }

    /// Whether `info`'s latest version is postponed at `now`.
    #[must_use]
    pub fn is_postponed(&self, info: &UpdateInfo, now: DateTime<Utc>) -> bool {
        let config = self.manager.get_config();
        !config.postponed_version.is_empty()
            && same_version(&config.postponed_version, &info.latest_version)
            && config.postponed_until_time().is_some_and(|until| now < until)
    }

    /// Returns the postponed version once its postponement has expired, and clears it.
    pub async fn check_postponement_reminders(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        let mut config = self.manager.get_config();
        if config.postponed_version.is_empty() {
            return Ok(None);
        }
        let expired = config.postponed_until_time().is_none_or(|until| now >= until);
        if !expired {
            return Ok(None);
        }

        let version = config.postponed_version.clone();
        config.clear_postponement();
        self.manager.update_config(config).await?;
        Ok(Some(version))
    }

    /// Whether the user should hear about `info` at `now`.
    #[must_use]
    pub fn should_notify(&self, info: &UpdateInfo, now: DateTime<Utc>) -> bool {
        info.has_update
            && self.manager.get_config().notification_level != NotificationLevel::Silent
            && !self.is_postponed(info, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeUpdateManager;
    use crate::upgrade::config::UpdateConfig;
    use crate::version::BuildInfo;
    use chrono::Duration;

    fn info(latest: &str) -> UpdateInfo {
        UpdateInfo {
            has_update: true,
            current_version: "1.0.0".to_string(),
            latest_version: latest.to_string(),
            download_url: None,
            asset_name: None,
            asset_size: None,
            release_notes: String::new(),
            is_prerelease: false,
            published_at: None,
        }
    }

    fn setup(config: UpdateConfig) -> (UpdateNotifier, Arc<FakeUpdateManager>) {
        let manager =
            Arc::new(FakeUpdateManager::new(config, BuildInfo::release(Version::new(1, 0, 0))));
        (UpdateNotifier::new(manager.clone()), manager)
    }

    #[tokio::test]
    async fn test_postpone_and_reminder() {
        let (notifier, manager) = setup(UpdateConfig::default());
        let now = Utc::now();

        notifier.postpone("v1.1.0", now + Duration::hours(4)).await.unwrap();
        assert!(notifier.is_postponed(&info("1.1.0"), now));
        assert!(!notifier.should_notify(&info("1.1.0"), now));
        assert!(!notifier.is_postponed(&info("1.2.0"), now));
        assert_eq!(notifier.check_postponement_reminders(now).await.unwrap(), None);

        let later = now + Duration::hours(5);
        assert!(!notifier.is_postponed(&info("1.1.0"), later));
        assert_eq!(
            notifier.check_postponement_reminders(later).await.unwrap().as_deref(),
            Some("v1.1.0")
        );
        assert!(manager.get_config().postponed_version.is_empty());
        assert_eq!(notifier.check_postponement_reminders(later).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_silent_never_notifies() {
        let config = UpdateConfig {
            notification_level: NotificationLevel::Silent,
            ..UpdateConfig::default()
        };
        let (notifier, _) = setup(config);
        assert!(!notifier.should_notify(&info("1.1.0"), Utc::now()));

        let (notifier, _) = setup(UpdateConfig::default());
        assert!(notifier.should_notify(&info("1.1.0"), Utc::now()));
        let mut no_update = info("1.1.0");
        no_update.has_update = false;
        assert!(!notifier.should_notify(&no_update, Utc::now()));
    }

    #[tokio::test]
    async fn test_skip_clears_matching_postponement() {
        let (notifier, manager) = setup(UpdateConfig::default());
        notifier.postpone("1.1.0", Utc::now() + Duration::days(1)).await.unwrap();

        notifier.skip_version("v1.1.0").await.unwrap();
        let config = manager.get_config();
        assert_eq!(config.skip_version, "v1.1.0");
        assert!(config.postponed_version.is_empty());
    }
}
