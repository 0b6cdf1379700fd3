//! Global constants used throughout the update subsystem.
//!
//! This module contains intervals, retry parameters, retention counts, and
//! naming constants that are shared by the checker, scheduler, and installer.
//! Defining them centrally keeps the policies discoverable in one place.

use std::time::Duration;

/// Name of the product whose binary is being updated.
///
/// Used for artifact detection inside archives, backup file names, and the
/// fallback name of raw binary downloads.
pub const PRODUCT_NAME: &str = "delta";

/// Default GitHub repository (`owner/name`) that publishes releases.
pub const DEFAULT_GITHUB_REPOSITORY: &str = "delta-cli/delta";

/// How long a completed update check stays valid in the checker cache (30 minutes).
pub const CHECK_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// How long release metadata responses are cached by the GitHub client (10 minutes).
pub const RELEASE_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Interval between scheduler sweeps (60 seconds).
pub const SCHEDULER_TICK: Duration = Duration::from_secs(60);

/// Delay before a failed scheduled task is retried (10 minutes).
pub const SCHEDULER_RETRY_DELAY: Duration = Duration::from_secs(10 * 60);

/// Default number of attempts a scheduled update gets before it is marked failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Number of backups kept by retention when no explicit count is given.
pub const DEFAULT_BACKUP_KEEP: usize = 5;

/// Number of downloaded artifacts kept when no explicit count is given.
pub const DEFAULT_DOWNLOAD_KEEP: usize = 3;

/// Unauthenticated GitHub API requests per hour.
pub const GITHUB_ANON_RATE_LIMIT: u32 = 60;

/// Authenticated GitHub API requests per hour.
pub const GITHUB_AUTH_RATE_LIMIT: u32 = 5000;

/// Timeout for a single release metadata request.
pub const GITHUB_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a whole asset download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Number of retries for transient network failures.
pub const NETWORK_RETRY_ATTEMPTS: usize = 3;

/// Starting delay for exponential backoff on network retries (200ms).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 200;

/// Maximum backoff delay between network retries (5 seconds).
pub const MAX_BACKOFF_DELAY_MS: u64 = 5_000;

/// Timeout for running a candidate binary with a version flag.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Attempts made when restoring a backup over a briefly locked executable.
pub const RESTORE_ATTEMPTS: usize = 3;

/// Delay between restore attempts.
pub const RESTORE_RETRY_DELAY_MS: u64 = 1_000;

/// Environment variable that overrides the update configuration file location.
pub const CONFIG_PATH_ENV: &str = "DELTA_UPDATE_CONFIG";

/// Environment variable that overrides the data directory (backups, schedule state).
pub const DATA_DIR_ENV: &str = "DELTA_UPDATE_HOME";
