//! Command-line interface for delta-update.
//!
//! This module defines the `delta-update` binary's argument structure with
//! `clap` derive and dispatches each subcommand to its handler. Commands share
//! one [`UpdateContext`](common::UpdateContext) that wires the configuration
//! store, the GitHub release provider, the downloader, the installer, and the
//! scheduler for the running executable.
//!
//! # Commands
//!
//! ## Updating
//! - `status` - Current version, configuration, and last check
//! - `check` - Look for a newer release
//! - `install [VERSION] [--yes]` - Download and install a release
//! - `skip <VERSION>` - Never offer a release again
//! - `postpone <DURATION>` - Stop reminding about the current update for a while
//!
//! ## Recovery
//! - `history` - Show past updates and backups
//! - `rollback [--backup PATH]` - Restore a backup
//!
//! ## Scheduling
//! - `schedule <VERSION> --at <TIME> [--cron EXPR]` - Install later
//! - `cancel <ID>` - Cancel a scheduled install
//! - `pending [--all]` - List scheduled installs
//! - `cleanup` - Prune backups, downloads, and finished tasks
//! - `daemon` - Run scheduled installs until Ctrl-C
//!
//! ## Settings
//! - `config [--set KEY=VALUE]` - Show or change settings
//!
//! # Global Options
//!
//! - `--verbose` - Enable debug output
//! - `--quiet` - Only log errors
//! - `--config <PATH>` - Use an alternate configuration file
//! - `--no-progress` - Disable the download progress bar
//!
//! `RUST_LOG` takes precedence over `--verbose` and `--quiet` when set.

mod common;
mod config;
mod schedule;
mod upgrade;

pub use common::UpdateContext;
pub use schedule::{parse_duration, parse_schedule_time};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Runtime settings derived from global flags.
///
/// Separated from [`Cli`] so tests and embedders can run commands with a
/// chosen configuration file and output mode.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Tracing filter directive (`debug`, `warn`, ...) used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Whether to hide the download progress bar.
    pub no_progress: bool,

    /// Alternate configuration file.
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Self-update manager for delta.
#[derive(Parser)]
#[command(
    name = "delta-update",
    about = "Check for, install, schedule, and roll back delta updates",
    version,
    long_about = "delta-update keeps the delta binary current: it checks GitHub releases, \
                  verifies and installs new versions with automatic backups, and can run \
                  installs on a schedule."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the update configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Disable the download progress bar
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the running version, configuration, and last check
    Status(upgrade::StatusCommand),
    /// Check for a newer release
    Check(upgrade::CheckCommand),
    /// Download and install a release
    Install(upgrade::InstallCommand),
    /// Show past updates and backups available for rollback
    History(upgrade::HistoryCommand),
    /// Restore a previous version from backup
    Rollback(upgrade::RollbackCommand),
    /// Schedule an update for later
    Schedule(schedule::ScheduleCommand),
    /// Cancel a pending scheduled update
    Cancel(schedule::CancelCommand),
    /// List scheduled updates
    Pending(schedule::PendingCommand),
    /// Remove old backups, downloads, and finished scheduled tasks
    Cleanup(schedule::CleanupCommand),
    /// Never offer a release again
    Skip(upgrade::SkipCommand),
    /// Stop reminding about the available update for a while
    Postpone(upgrade::PostponeCommand),
    /// Run scheduled updates in the foreground until Ctrl-C
    Daemon(schedule::DaemonCommand),
    /// Show or change update settings
    Config(config::ConfigCommand),
}

impl Cli {
    /// Execute the parsed command with settings derived from the global flags.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate global flags into a [`CliConfig`].
    ///
    /// `--verbose` maps to `debug`, `--quiet` to `error`, and the default is `warn`.
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        };

        CliConfig {
            log_level: log_level.to_string(),
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }

    /// Execute the parsed command with an explicit configuration.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        // config only touches the settings file
        let command = match self.command {
            Commands::Config(cmd) => return cmd.execute(config.config_path).await,
            command => command,
        };

        let ctx = UpdateContext::load(config.config_path, !config.no_progress).await?;
        match command {
            Commands::Status(cmd) => cmd.execute(&ctx).await,
            Commands::Check(cmd) => cmd.execute(&ctx).await,
            Commands::Install(cmd) => cmd.execute(&ctx).await,
            Commands::History(cmd) => cmd.execute(&ctx).await,
            Commands::Rollback(cmd) => cmd.execute(&ctx).await,
            Commands::Schedule(cmd) => cmd.execute(&ctx),
            Commands::Cancel(cmd) => cmd.execute(&ctx),
            Commands::Pending(cmd) => cmd.execute(&ctx),
            Commands::Cleanup(cmd) => cmd.execute(&ctx).await,
            Commands::Skip(cmd) => cmd.execute(&ctx).await,
            Commands::Postpone(cmd) => cmd.execute(&ctx).await,
            Commands::Daemon(cmd) => cmd.execute(ctx).await,
            Commands::Config(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_flags() {
        let cli = Cli::parse_from(["delta-update", "--verbose", "status"]);
        assert_eq!(cli.build_config().log_level, "debug");

        let cli = Cli::parse_from(["delta-update", "pending", "--quiet"]);
        assert_eq!(cli.build_config().log_level, "error");

        let cli = Cli::parse_from(["delta-update", "check"]);
        let config = cli.build_config();
        assert_eq!(config.log_level, "warn");
        assert!(!config.no_progress);
        assert!(config.config_path.is_none());
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["delta-update", "-v", "-q", "status"]).is_err());
    }

    #[test]
    fn test_global_config_path() {
        let cli = Cli::parse_from(["delta-update", "config", "--config", "/tmp/u.json"]);
        assert_eq!(cli.build_config().config_path, Some(PathBuf::from("/tmp/u.json")));
    }

    #[test]
    fn test_schedule_arguments() {
        let cli = Cli::parse_from([
            "delta-update",
            "schedule",
            "v1.2.0",
            "--at",
            "+2h",
            "--cron",
            "@weekly",
            "--auto-confirm",
            "--max-retries",
            "5",
        ]);
        let Commands::Schedule(cmd) = cli.command else {
            panic!("expected schedule");
        };
        assert_eq!(cmd.version, "v1.2.0");
        assert_eq!(cmd.at.as_deref(), Some("+2h"));
        assert_eq!(cmd.cron.as_deref(), Some("@weekly"));
        assert!(cmd.auto_confirm);
        assert_eq!(cmd.max_retries, 5);
    }

    #[test]
    fn test_install_defaults_to_latest() {
        let cli = Cli::parse_from(["delta-update", "install", "-y"]);
        let Commands::Install(cmd) = cli.command else {
            panic!("expected install");
        };
        assert!(cmd.version.is_none());
        assert!(cmd.yes);
    }
}
