//! Self-update functionality for delta.
//!
//! This module lets the delta binary discover, download, verify, and install
//! newer releases of itself, either on demand or on a schedule, with a backup
//! of the running executable taken before every replacement.
//!
//! # Architecture Overview
//!
//! The components talk to each other through a handful of traits so that each
//! one can be exercised with in-memory fakes:
//!
//! - **[`ReleaseProvider`]**: where release metadata comes from ([`GitHubClient`])
//! - **[`Downloader`]**: fetches and verifies one release asset ([`HttpDownloader`])
//! - **[`BinaryValidator`]**: decides whether a file is a runnable delta ([`ProcessValidator`])
//! - **[`UpdateManager`]**: owns configuration and performs installs ([`ReleaseUpdateManager`])
//! - **[`MetricsSink`]**: receives one observation per update check
//!
//! On top of those sit the [`UpdateChecker`] (is there something newer?), the
//! [`UpdateNotifier`] (should the user hear about it?), the [`UpdateInstaller`]
//! (swap the binary safely), and the [`UpdateScheduler`] (install it later,
//! possibly on a recurring schedule).
//!
//! ## Update Process Flow
//!
//! ```text
//! 1. Check
//!    ├── Fetch latest release for the configured channel
//!    ├── Drop skipped, off-channel, and prerelease versions
//!    └── Compare against the running version
//!
//! 2. Download
//!    ├── Select the asset for this os/arch
//!    ├── Stream to <download dir>/<asset>.part, then rename
//!    └── Verify SHA-256 against the release checksum manifest
//!
//! 3. Install
//!    ├── Extract (tar.gz / zip / raw) into a private work dir
//!    ├── Run the candidate with --version
//!    ├── Back up the live executable
//!    ├── Replace it (direct or rename-aside)
//!    └── Verify; restore the backup on failure
//!
//! 4. Post-install
//!    ├── Prune backups to the newest five
//!    ├── Append the attempt to the update history
//!    └── Record the installed version, clear a matching postponement
//! ```
//!
//! # Module Structure
//!
//! - [`release`], [`github`]: release metadata and the GitHub provider
//! - [`download`], [`verification`]: asset download and checksums
//! - [`archive`], [`validation`], [`replace`], [`backup`], [`installer`]: the install pipeline
//! - [`manager`], [`config`]: configuration ownership and the install entry point
//! - [`history`]: persistent record of installs and rollbacks
//! - [`checker`], [`notification`], [`metrics`]: update discovery and user prompts
//! - [`scheduler`], [`cron`]: deferred and recurring installs
//!
//! # Example
//!
//! ```rust,no_run
//! use delta_update::upgrade::UpdateChecker;
//!
//! # async fn example(checker: UpdateChecker) -> anyhow::Result<()> {
//! let info = checker.check_for_updates().await?;
//! if info.has_update {
//!     println!("{} -> {}", info.current_version, info.latest_version);
//!     checker.manager().download_and_install_update(&info.latest_version).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
/// Backups of the live executable, taken before each install.
pub mod backup;
pub mod checker;
/// Persistent update preferences.
pub mod config;
pub mod cron;
pub mod download;
/// GitHub Releases implementation of [`ReleaseProvider`].
pub mod github;
pub mod history;
pub mod installer;
pub mod manager;
pub mod metrics;
pub mod notification;
pub mod release;
pub mod replace;
pub mod scheduler;
pub mod validation;
/// SHA-256 checksums and checksum manifests.
pub mod verification;

pub use backup::{BackupInfo, BackupStore};
pub use checker::{UpdateChecker, UpdateInfo};
pub use config::{CheckInterval, NotificationLevel, UpdateConfig};
pub use cron::CronSchedule;
pub use download::{DownloadResult, DownloadStats, Downloader, HttpDownloader};
pub use github::GitHubClient;
pub use history::{
    AuditFormat, HistoryFilter, HistorySummary, UpdateHistory, UpdateKind, UpdateRecord, UpdateStatus,
};
pub use installer::{
    InstallFailure, InstallLogEntry, InstallResult, InstallerConfig, LogStatus, RollbackOutcome,
    UpdateInstaller,
};
pub use manager::{ReleaseUpdateManager, UpdateManager};
pub use metrics::{CheckObservation, InMemoryMetrics, MetricsSink};
pub use notification::UpdateNotifier;
pub use release::{Asset, RateLimitStatus, Release, ReleaseProvider};
pub use scheduler::{
    ScheduleOptions, ScheduleStatus, ScheduledUpdate, SchedulerStats, UpdateScheduler,
};
pub use validation::{BinaryValidator, ProcessValidator};
pub use verification::ChecksumVerifier;
