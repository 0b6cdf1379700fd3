//! Shared wiring and output helpers for CLI commands.

use crate::config::{ConfigStore, JsonConfigStore};
use crate::upgrade::{
    GitHubClient, HttpDownloader, InMemoryMetrics, InstallerConfig, ProcessValidator,
    ReleaseProvider, ReleaseUpdateManager, UpdateChecker, UpdateHistory, UpdateInstaller,
    UpdateManager, UpdateNotifier, UpdateScheduler,
};
use crate::utils::platform::{get_data_dir, get_download_dir};
use crate::version::BuildInfo;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Environment variable holding a GitHub token for authenticated API requests.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Every update component, wired for the running executable.
///
/// Built once per command invocation. Construction reads the configuration
/// file, the update history and the scheduler state file but never touches
/// the network.
pub struct UpdateContext {
    pub store: Arc<JsonConfigStore>,
    pub manager: Arc<ReleaseUpdateManager>,
    pub provider: Arc<GitHubClient>,
    pub downloader: Arc<HttpDownloader>,
    pub checker: UpdateChecker,
    pub notifier: UpdateNotifier,
    pub scheduler: UpdateScheduler,
    pub metrics: Arc<InMemoryMetrics>,
}

impl UpdateContext {
    /// Builds the context from the configuration at `config_path` (or the default location).
    pub async fn load(config_path: Option<PathBuf>, show_progress: bool) -> Result<Self> {
        let path = match config_path {
            Some(path) => path,
            None => JsonConfigStore::default_path()?,
        };
        debug!("Using update configuration at {}", path.display());
        let store = Arc::new(JsonConfigStore::new(path));
        let config = store.load().await?;

        let (owner, repo) = config.repository_parts()?;
        let provider = Arc::new(GitHubClient::new(owner, repo)?);
        provider.set_token(std::env::var(GITHUB_TOKEN_ENV).ok().filter(|t| !t.is_empty()));

        let download_dir = if config.download_directory.is_empty() {
            get_download_dir()?
        } else {
            PathBuf::from(&config.download_directory)
        };
        let downloader =
            Arc::new(HttpDownloader::new(download_dir)?.with_progress(show_progress));

        let build = BuildInfo::current();
        let installer = UpdateInstaller::new(
            InstallerConfig::for_current_process(build.version.clone())?,
            Arc::new(ProcessValidator::default()),
        );

        let data_dir = get_data_dir()?;
        let history = UpdateHistory::open(data_dir.join("history.json"))
            .context("Failed to load update history")?;

        let manager = Arc::new(
            ReleaseUpdateManager::new(
                store.clone(),
                provider.clone(),
                downloader.clone(),
                installer,
                build,
            )
            .await?
            .with_history(Arc::new(history)),
        );
        let shared: Arc<dyn UpdateManager> = manager.clone();

        let metrics = Arc::new(InMemoryMetrics::new());
        let checker = UpdateChecker::new(shared.clone(), provider.clone())
            .with_metrics(metrics.clone());
        let notifier = UpdateNotifier::new(shared.clone());

        let scheduler =
            UpdateScheduler::new(shared).with_state_file(data_dir.join("schedule.json"));
        scheduler.load_state().context("Failed to load scheduled updates")?;

        Ok(Self {
            store,
            manager,
            provider,
            downloader,
            checker,
            notifier,
            scheduler,
            metrics,
        })
    }
}

/// Asks a yes/no question on stdin. Anything but `y`/`yes` (including EOF) is no.
pub fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Formats a timestamp in local time for terminal output.
#[must_use]
pub fn format_local(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_local_shape() {
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let formatted = format_local(time);
        assert_eq!(formatted.len(), "2024-03-01 12:30:00".len());
        assert!(formatted.ends_with(":30:00"));
    }
}
