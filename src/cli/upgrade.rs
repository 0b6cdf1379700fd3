//! Update commands: `status`, `check`, `install`, `history`, `rollback`, `skip`, and `postpone`.
//!
//! # Examples
//!
//! ```bash
//! delta-update check                 # Is there a newer release?
//! delta-update install               # Install the latest release (asks first)
//! delta-update install v1.4.2 --yes  # Install a specific release without asking
//! delta-update history               # Show past updates and available backups
//! delta-update history --format csv  # Export the full audit trail
//! delta-update rollback              # Restore the newest backup
//! delta-update postpone 1d           # Ask again tomorrow
//! ```

use super::common::{UpdateContext, confirm, format_local};
use super::schedule::{add_offset, parse_duration};
use crate::upgrade::{
    AuditFormat, HistoryFilter, InstallFailure, InstallResult, ReleaseProvider, UpdateManager,
    UpdateStatus,
};
use crate::utils::fs::format_size;
use anyhow::{Result, bail};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use tracing::debug;

/// Show the running version, configuration, and last check.
#[derive(Args, Debug)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn execute(self, ctx: &UpdateContext) -> Result<()> {
        let build = ctx.manager.build_info();
        let config = ctx.manager.get_config();

        println!("{} {}", "delta".bold(), build.version_tag());
        if build.is_development() {
            println!("  build: development ({})", build.git_commit);
        } else {
            println!("  build: {} ({})", build.git_commit, build.build_date);
        }

        let enabled = if config.enabled {
            "enabled".green()
        } else {
            "disabled".red()
        };
        println!("  updates: {enabled}");
        println!("  channel: {}", config.channel);
        println!("  check interval: {}", config.check_interval);
        println!("  repository: {}", config.github_repository);

        match config.last_check_time() {
            Some(at) => println!("  last check: {}", format_local(at)),
            None => println!("  last check: never"),
        }
        if !config.last_version.is_empty() {
            println!("  last installed: {}", config.last_version);
        }
        if let Some(skip) = config.skip_version() {
            println!("  skipping: {skip}");
        }
        if let Some(until) = config.postponed_until_time() {
            println!("  postponed: {} until {}", config.postponed_version, format_local(until));
        }

        if let Some(info) = ctx.checker.cached_update() {
            if info.has_update {
                println!("  available: {}", info.latest_version.green());
            }
        } else if ctx.checker.should_check() {
            println!("{}", "  A check is due; run `delta-update check`.".dimmed());
        }

        let stats = ctx.scheduler.get_scheduler_stats();
        if stats.pending > 0 {
            println!("  scheduled: {} pending", stats.pending);
        }

        let backups = ctx.manager.installer().get_backup_info().await?;
        println!("  backups: {}", backups.len());

        let rate = ctx.provider.get_rate_limit_status();
        debug!(
            "GitHub rate limit: {}/{} remaining (authenticated: {})",
            rate.remaining, rate.limit, rate.authenticated
        );
        Ok(())
    }
}

/// Check for a newer release.
#[derive(Args, Debug)]
pub struct CheckCommand {}

impl CheckCommand {
    pub async fn execute(self, ctx: &UpdateContext) -> Result<()> {
        println!("{}", "Checking for updates...".cyan());
        let info = ctx.checker.check_for_updates().await?;

        if info.has_update {
            println!(
                "{}",
                format!("Update available: {} -> {}", info.current_version, info.latest_version)
                    .green()
            );
            if let (Some(name), Some(size)) = (&info.asset_name, info.asset_size) {
                println!("  {} ({})", name, format_size(size));
            } else {
                println!("  {}", "No download is published for this platform".yellow());
            }
            if info.is_prerelease {
                println!("  {}", "This is a prerelease".yellow());
            }
            if ctx.notifier.is_postponed(&info, Utc::now()) {
                println!("  postponed; run `delta-update install` to install anyway");
            } else {
                println!("Run `delta-update install` to install it");
            }
        } else {
            println!(
                "{}",
                format!("You are on the latest version ({})", info.current_version).green()
            );
        }

        if let Some(observation) = ctx.metrics.checks().last() {
            debug!("Update check took {:?}", observation.duration);
        }
        Ok(())
    }
}

/// Download and install a release.
#[derive(Args, Debug)]
pub struct InstallCommand {
    /// Release tag to install (default: the latest release)
    #[arg(value_name = "VERSION")]
    pub version: Option<String>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

impl InstallCommand {
    pub async fn execute(self, ctx: &UpdateContext) -> Result<()> {
        let target = match self.version {
            Some(version) => version,
            None => {
                let info = ctx.checker.check_for_updates().await?;
                if !info.has_update {
                    println!(
                        "{}",
                        format!("Already on the latest version ({})", info.current_version).green()
                    );
                    return Ok(());
                }
                println!("Update available: {} -> {}", info.current_version, info.latest_version);
                info.latest_version
            }
        };

        if !self.yes && !confirm(&format!("Install {target}?"))? {
            println!("Installation cancelled");
            return Ok(());
        }

        println!("{}", format!("Installing {target}...").cyan());
        match ctx.manager.download_and_install_update(&target).await {
            Ok(result) => {
                print_success(&result);
                Ok(())
            }
            Err(err) => {
                if let Some(failure) = err.chain().find_map(|e| e.downcast_ref::<InstallFailure>()) {
                    print_failure(&failure.result);
                }
                Err(err)
            }
        }
    }
}

fn print_success(result: &InstallResult) {
    println!(
        "{}",
        format!("Updated {} -> {}", result.old_version, result.new_version).green()
    );
    if let Some(backup) = &result.backup_path {
        println!("  backup: {}", backup.display());
    }
    debug!("Install took {:?} ({} steps)", result.install_time, result.steps().len());
}

fn print_failure(result: &InstallResult) {
    eprintln!(
        "{}",
        format!("Update to {} failed", result.new_version).red()
    );
    if let Some(last) = result.log_entries.last() {
        eprintln!("  failed during: {}", last.step);
    }

    match &result.rollback {
        Some(rollback) if rollback.succeeded => {
            eprintln!("  {}", "The previous version was restored".green());
        }
        Some(rollback) => {
            let reason = rollback.error.as_deref().unwrap_or("unknown error");
            eprintln!("  {} {}", "Automatic restore failed:".red(), reason);
        }
        None => {}
    }

    if let Some(backup) = &result.backup_path {
        eprintln!("  backup: {}", backup.display());
        eprintln!(
            "  To restore manually, run: delta-update rollback --backup {}",
            backup.display()
        );
    }
}

/// Show past updates and the backups available for rollback.
#[derive(Args, Debug)]
pub struct HistoryCommand {
    /// Show failed attempts only
    #[arg(long)]
    pub failed: bool,

    /// Number of recent updates to show
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub limit: usize,

    /// Print the full audit trail as text, json, or csv instead
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<AuditFormat>,
}

impl HistoryCommand {
    pub async fn execute(self, ctx: &UpdateContext) -> Result<()> {
        let history = ctx.manager.history();
        if let Some(format) = self.format {
            print!("{}", history.audit_trail(format)?);
            return Ok(());
        }

        let filter = HistoryFilter {
            status: self.failed.then_some(UpdateStatus::Failed),
            limit: Some(self.limit),
            ..HistoryFilter::default()
        };
        let records = history.records(&filter);
        if records.is_empty() {
            println!("No updates recorded");
        } else {
            let summary = history.summary();
            println!(
                "{} update(s), {:.0}% successful",
                summary.total.to_string().bold(),
                summary.success_rate
            );
            for record in records {
                let status = match record.status {
                    UpdateStatus::Success => record.status.to_string().green(),
                    UpdateStatus::RolledBack => record.status.to_string().yellow(),
                    UpdateStatus::Failed => record.status.to_string().red(),
                };
                println!(
                    "{}  {:<8}  {} -> {}  {}",
                    format_local(record.timestamp),
                    record.kind,
                    record.from_version,
                    record.to_version,
                    status
                );
                if let Some(error) = &record.error {
                    println!("    {}", error.dimmed());
                }
            }
        }
        println!();

        let backups = ctx.manager.installer().get_backup_info().await?;
        if backups.is_empty() {
            println!("No backups");
            return Ok(());
        }

        println!("{}", "Backups:".bold());

        for backup in backups {
            println!(
                "{}  {}  {}  {}",
                backup.version.bold(),
                format_local(backup.backup_time),
                format_size(backup.size),
                backup.backup_path.display()
            );
        }
        Ok(())
    }
}

/// Restore a previous version from backup.
#[derive(Args, Debug)]
pub struct RollbackCommand {
    /// Backup file to restore (default: the newest backup)
    #[arg(long, value_name = "PATH")]
    pub backup: Option<PathBuf>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

impl RollbackCommand {
    pub async fn execute(self, ctx: &UpdateContext) -> Result<()> {
        if !self.yes && !confirm("Replace the current executable with a backup?")? {
            println!("Rollback cancelled");
            return Ok(());
        }

        println!("{}", "Rolling back...".yellow());
        match self.backup {
            Some(path) => {
                if !path.is_file() {
                    bail!("Backup {} does not exist", path.display());
                }
                ctx.manager.restore_backup(&path).await?;
                println!("{} from {}", "Restored".green(), path.display());
            }
            None => {
                let backup = ctx.manager.rollback_to_previous_version().await?;
                println!("{} version {}", "Restored".green(), backup.version);
            }
        }
        Ok(())
    }
}

/// Never offer a release again.
#[derive(Args, Debug)]
pub struct SkipCommand {
    /// Release to skip
    #[arg(value_name = "VERSION")]
    pub version: String,
}

impl SkipCommand {
    pub async fn execute(self, ctx: &UpdateContext) -> Result<()> {
        crate::version::Version::from_tag(&self.version)?;
        ctx.notifier.skip_version(&self.version).await?;
        println!("Skipping {}", self.version.bold());
        Ok(())
    }
}

/// Stop reminding about the available update for a while.
#[derive(Args, Debug)]
pub struct PostponeCommand {
    /// How long to wait, e.g. `4h`, `1d`, `1w`
    #[arg(value_name = "DURATION")]
    pub duration: String,

    /// Release to postpone (default: the latest available release)
    #[arg(long, value_name = "VERSION")]
    pub release: Option<String>,
}

impl PostponeCommand {
    pub async fn execute(self, ctx: &UpdateContext) -> Result<()> {
        let duration = parse_duration(&self.duration)?;

        let version = match self.release {
            Some(version) => version,
            None => {
                let info = ctx.checker.get_available_update().await?;
                if !info.has_update {
                    println!("No update to postpone");
                    return Ok(());
                }
                info.latest_version
            }
        };

        let until = add_offset(Utc::now(), duration)?;
        ctx.notifier.postpone(&version, until).await?;
        println!("Postponed {} until {}", version.bold(), format_local(until));
        Ok(())
    }
}
