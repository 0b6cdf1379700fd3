//! Scheduling commands: `schedule`, `cancel`, `pending`, `cleanup`, and `daemon`.
//!
//! One-shot invocations record tasks in the scheduler state file; a running
//! `delta-update daemon` picks them up on its next sweep.
//!
//! # Time formats
//!
//! `--at` accepts any of:
//!
//! ```text
//! now                      immediately
//! +30m, +2h, +1d, +1w      relative offsets (s, m, h, d, w)
//! 2024-06-01T02:00:00Z     RFC3339
//! 2024-06-01 02:00         local date and time
//! 02:00                    today, or tomorrow if already past
//! tomorrow                 tomorrow at 02:00 local time
//! next week / next month   one week / one month from now
//! @daily, @weekly, ...     the next trigger of that schedule
//! ```

use super::common::{UpdateContext, format_local};
use crate::upgrade::{
    CronSchedule, ScheduleOptions, ScheduleStatus, UpdateChecker, UpdateManager, UpdateNotifier,
    UpdateScheduler,
};
use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use clap::Args;
use colored::Colorize;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

/// Local hour used for `tomorrow`.
const DEFAULT_SCHEDULE_HOUR: u32 = 2;

/// How often the daemon considers a background update check.
const DAEMON_CHECK_TICK: StdDuration = StdDuration::from_secs(60 * 60);

/// Schedule an update for later.
#[derive(Args, Debug)]
pub struct ScheduleCommand {
    /// Release tag to install, or `latest`
    #[arg(value_name = "VERSION")]
    pub version: String,

    /// When to install (see `delta-update schedule --help` for formats).
    ///
    /// Defaults to the next trigger of `--cron` when a cron expression is given.
    #[arg(long, value_name = "TIME")]
    pub at: Option<String>,

    /// Repeat on a schedule (`@daily`, `@weekly`, `@monthly`, `@yearly` or their five-field forms)
    #[arg(long, value_name = "EXPR")]
    pub cron: Option<String>,

    /// Install without asking when the task runs
    #[arg(long)]
    pub auto_confirm: bool,

    /// Attempts before the task is marked failed
    #[arg(long, value_name = "N", default_value_t = crate::constants::DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,
}

impl ScheduleCommand {
    pub fn execute(self, ctx: &UpdateContext) -> Result<()> {
        let now = Local::now();
        let time = match (&self.at, &self.cron) {
            (Some(at), _) => parse_schedule_time(at, now)?,
            (None, Some(cron)) => cron.parse::<CronSchedule>()?.next_after(now.with_timezone(&Utc)),
            (None, None) => bail!("Specify when to install with --at (or a recurrence with --cron)"),
        };

        let task = ctx.scheduler.schedule_update(
            &self.version,
            time,
            ScheduleOptions {
                auto_confirm: self.auto_confirm,
                max_retries: self.max_retries,
                cron_expression: self.cron.clone(),
                ..ScheduleOptions::default()
            },
        )?;

        println!(
            "{} {} for {}",
            "Scheduled".green(),
            task.version.bold(),
            format_local(task.scheduled_time)
        );
        println!("  id: {}", task.id);
        if let Some(cron) = &task.cron_expression {
            println!("  repeats: {cron}");
        }
        if !ctx.scheduler.is_running() {
            println!(
                "{}",
                "Scheduled updates run while `delta-update daemon` is running.".dimmed()
            );
        }
        Ok(())
    }
}

/// Cancel a pending scheduled update.
#[derive(Args, Debug)]
pub struct CancelCommand {
    /// Task id as shown by `delta-update pending`
    #[arg(value_name = "ID")]
    pub id: String,
}

impl CancelCommand {
    pub fn execute(self, ctx: &UpdateContext) -> Result<()> {
        ctx.scheduler.cancel_scheduled_update(&self.id)?;
        println!("{} {}", "Cancelled".yellow(), self.id);
        Ok(())
    }
}

/// List scheduled updates.
#[derive(Args, Debug)]
pub struct PendingCommand {
    /// Include completed, failed, and cancelled tasks
    #[arg(long)]
    pub all: bool,
}

impl PendingCommand {
    pub fn execute(self, ctx: &UpdateContext) -> Result<()> {
        let tasks = if self.all {
            ctx.scheduler.get_scheduled_updates()
        } else {
            ctx.scheduler.get_pending_updates()
        };

        if tasks.is_empty() {
            println!("No scheduled updates");
            return Ok(());
        }

        for task in &tasks {
            let status = match task.status {
                ScheduleStatus::Pending => task.status.to_string().cyan(),
                ScheduleStatus::Running => task.status.to_string().yellow(),
                ScheduleStatus::Completed => task.status.to_string().green(),
                ScheduleStatus::Failed => task.status.to_string().red(),
                ScheduleStatus::Cancelled => task.status.to_string().dimmed(),
            };
            println!(
                "{}  {}  {}  {}",
                task.id,
                task.version.bold(),
                format_local(task.scheduled_time),
                status
            );
            if let Some(cron) = &task.cron_expression {
                println!("    repeats {cron}");
            }
            if task.retry_count > 0 {
                println!("    attempt {}/{}", task.retry_count, task.max_retries);
            }
            if let Some(err) = &task.last_error {
                println!("    last error: {}", err.red());
            }
        }

        let stats = ctx.scheduler.get_scheduler_stats();
        println!(
            "\n{} total, {} pending, {} recurring",
            stats.total, stats.pending, stats.recurring
        );
        Ok(())
    }
}

/// Remove old backups, downloads, and finished scheduled tasks.
#[derive(Args, Debug)]
pub struct CleanupCommand {
    /// Backups to keep
    #[arg(long, value_name = "N", default_value_t = crate::constants::DEFAULT_BACKUP_KEEP)]
    pub keep: usize,

    /// Remove finished tasks last updated more than D days ago
    #[arg(long, value_name = "D", default_value_t = 7)]
    pub older_than_days: u64,

    /// Remove update history records more than D days old
    #[arg(long, value_name = "D", default_value_t = 90)]
    pub history_days: u64,
}

impl CleanupCommand {
    pub async fn execute(self, ctx: &UpdateContext) -> Result<()> {
        let backups = ctx.manager.installer().cleanup_old_backups(self.keep).await?;
        let downloads = ctx.downloader.cleanup_old_downloads(0).await?;
        let tasks = ctx
            .scheduler
            .cleanup_completed_tasks(StdDuration::from_secs(self.older_than_days.saturating_mul(24 * 60 * 60)));
        let records = ctx
            .manager
            .history()
            .cleanup_old_records(StdDuration::from_secs(self.history_days.saturating_mul(24 * 60 * 60)))?;

        println!(
            "{} {} backup(s), {} download(s), {} finished task(s), {} history record(s)",
            "Removed".green(),
            backups,
            downloads,
            tasks,
            records
        );

        let stats = ctx.downloader.download_stats().await?;
        println!(
            "Download cache: {} file(s), {} in {}",
            stats.file_count,
            stats.total_size_formatted(),
            stats.download_directory.display()
        );
        Ok(())
    }
}

/// Run the scheduler in the foreground until interrupted.
#[derive(Args, Debug)]
pub struct DaemonCommand {
    /// Seconds between scheduler sweeps
    #[arg(long, value_name = "SECS", default_value_t = crate::constants::SCHEDULER_TICK.as_secs())]
    pub tick: u64,
}

impl DaemonCommand {
    pub async fn execute(self, ctx: UpdateContext) -> Result<()> {
        let UpdateContext {
            checker,
            notifier,
            scheduler,
            ..
        } = ctx;
        let scheduler = scheduler.with_tick(StdDuration::from_secs(self.tick.max(1)));

        scheduler.start()?;
        println!(
            "{} ({} pending). Press Ctrl-C to stop.",
            "Update daemon running".green(),
            scheduler.get_pending_updates().len()
        );

        let mut checks = tokio::time::interval(DAEMON_CHECK_TICK);
        loop {
            tokio::select! {
                _ = checks.tick() => {
                    if let Err(e) = background_check(&checker, &notifier, &scheduler).await {
                        warn!("Background update check failed: {:#}", e);
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for Ctrl-C")?;
                    break;
                }
            }
        }

        scheduler.stop().await?;
        println!("Update daemon stopped");
        Ok(())
    }
}

async fn background_check(
    checker: &UpdateChecker,
    notifier: &UpdateNotifier,
    scheduler: &UpdateScheduler,
) -> Result<()> {
    let now = Utc::now();
    if let Some(version) = notifier.check_postponement_reminders(now).await? {
        println!("Reminder: update {} was postponed and is available again", version.bold());
    }

    if !checker.should_check_at(now) {
        debug!("Background update check not due");
        return Ok(());
    }

    let info = checker.check_for_updates().await?;
    if !notifier.should_notify(&info, now) {
        return Ok(());
    }

    let config = checker.manager().get_config();
    if config.auto_install {
        let task = scheduler.schedule_update(
            &info.latest_version,
            now,
            ScheduleOptions {
                auto_confirm: true,
                ..ScheduleOptions::default()
            },
        )?;
        info!("Auto-install of {} scheduled as {}", info.latest_version, task.id);
    } else {
        println!(
            "Update available: {} -> {}. Run `delta-update install` to upgrade.",
            info.current_version,
            info.latest_version.green()
        );
    }
    Ok(())
}

/// Resolves a user-supplied schedule time relative to `now`.
///
/// # Errors
///
/// Returns an error naming the accepted formats when `input` matches none of them.
pub fn parse_schedule_time(input: &str, now: DateTime<Local>) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();
    let lower = trimmed.to_ascii_lowercase();
    let now_utc = now.with_timezone(&Utc);

    match lower.as_str() {
        "now" => return Ok(now_utc),
        "tomorrow" => {
            let date = now
                .date_naive()
                .succ_opt()
                .ok_or_else(|| anyhow!("Date out of range"))?;
            return local_at(date, NaiveTime::from_hms_opt(DEFAULT_SCHEDULE_HOUR, 0, 0));
        }
        "next week" => return add_offset(now_utc, Duration::weeks(1)),
        "next month" => {
            return now_utc
                .checked_add_months(Months::new(1))
                .ok_or_else(|| anyhow!("Date out of range"));
        }
        _ => {}
    }

    if let Some(offset) = lower.strip_prefix('+') {
        return add_offset(now_utc, parse_offset(offset)?);
    }

    if lower.starts_with('@')
        && let Ok(cron) = lower.parse::<CronSchedule>()
    {
        return Ok(cron.next_after(now_utc));
    }

    if let Ok(time) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(time.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M") {
        return local_at(naive.date(), Some(naive.time()));
    }

    if let Ok(time) = NaiveTime::parse_from_str(trimmed, "%H:%M") {
        let today = local_at(now.date_naive(), Some(time))?;
        if today > now_utc {
            return Ok(today);
        }
        let tomorrow = now
            .date_naive()
            .succ_opt()
            .ok_or_else(|| anyhow!("Date out of range"))?;
        return local_at(tomorrow, Some(time));
    }

    bail!(
        "Unrecognized time '{input}'. Use 'now', '+30m', '+2h', '+1d', 'HH:MM', \
         'YYYY-MM-DD HH:MM', an RFC3339 timestamp, 'tomorrow', 'next week', 'next month', \
         or a schedule such as '@daily'"
    )
}

fn parse_offset(offset: &str) -> Result<Duration> {
    let split = offset
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("Missing unit in offset '+{offset}' (use s, m, h, d, or w)"))?;
    let (amount, unit) = offset.split_at(split);
    let amount: i64 = amount
        .parse()
        .with_context(|| format!("Invalid amount in offset '+{offset}'"))?;

    let duration = match unit {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        other => bail!("Unknown unit '{other}' in offset '+{offset}' (use s, m, h, d, or w)"),
    };
    duration.ok_or_else(|| anyhow!("Offset '+{offset}' is out of range"))
}

/// `from + offset`, or an error when the result is past the representable range.
pub fn add_offset(from: DateTime<Utc>, offset: Duration) -> Result<DateTime<Utc>> {
    from.checked_add_signed(offset)
        .ok_or_else(|| anyhow!("Time {offset} after {} is out of range", from.to_rfc3339()))
}

/// Local wall-clock `date time` as UTC. Ambiguous times take the earlier instant.
fn local_at(date: NaiveDate, time: Option<NaiveTime>) -> Result<DateTime<Utc>> {
    let time = time.ok_or_else(|| anyhow!("Invalid time of day"))?;
    Local
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("{date} {time} does not exist in the local time zone"))
}

/// Parses a postponement length such as `4h` or `+2d`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let offset = input.trim().trim_start_matches('+').to_ascii_lowercase();
    let duration = parse_offset(&offset)?;
    if duration <= Duration::zero() {
        bail!("Duration must be positive");
    }
    Ok(duration)
}
