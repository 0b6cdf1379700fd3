//! delta-update - self-update subsystem for the delta CLI
//!
//! Discovers new delta releases on GitHub, downloads and verifies them, and
//! replaces the running executable safely: every install is preceded by a
//! backup and followed by verification, with automatic restore on failure.
//! Installs can also be deferred to a time or a recurring schedule.
//!
//! # Architecture Overview
//!
//! ```text
//!            ┌──────────────┐      ┌─────────────────┐
//!  check ──▶ │ UpdateChecker│ ───▶ │ ReleaseProvider │ (GitHub Releases API)
//!            └──────┬───────┘      └─────────────────┘
//!                   │ UpdateInfo
//!            ┌──────▼───────┐      ┌─────────────────┐
//! install ─▶ │ UpdateManager│ ───▶ │   Downloader    │ (stream + SHA-256)
//!            └──────┬───────┘      └─────────────────┘
//!                   │ DownloadResult
//!            ┌──────▼────────┐
//!            │UpdateInstaller│  extract → validate → backup → replace → verify
//!            └───────────────┘
//!
//!  UpdateScheduler ── runs UpdateManager::download_and_install_update at a set time
//! ```
//!
//! # Core Modules
//!
//! - [`upgrade`] - Checker, installer, manager, scheduler, and their seams
//! - [`version`] - Release tag parsing, ordering, channels, and build info
//! - [`config`] - Persistence of the update configuration
//! - [`core`] - Error types and user-facing error rendering
//! - [`cli`] - The `delta-update` command-line interface
//! - [`utils`] - Filesystem, platform, and progress helpers
//! - [`constants`] - Intervals, retry counts, and retention limits
//!
//! # Command-Line Usage
//!
//! ```bash
//! # Check for and install the latest release
//! delta-update check
//! delta-update install --yes
//!
//! # Install overnight, and keep doing so weekly
//! delta-update schedule latest --at 02:00 --cron @weekly --auto-confirm
//! delta-update daemon
//!
//! # Something went wrong
//! delta-update history
//! delta-update rollback
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod upgrade;
pub mod utils;
pub mod version;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
