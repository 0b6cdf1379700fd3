//! Scheduled and recurring updates.
//!
//! [`UpdateScheduler`] keeps a map of [`ScheduledUpdate`] tasks behind a single
//! mutex and, once started, sweeps it every minute. Due tasks are marked
//! `running` under the lock, then each is executed on its own tokio task after
//! the lock is released, so a slow install never blocks scheduling.
//!
//! # Task lifecycle
//!
//! ```text
//!            ┌──────────── retry (now + 10 min) ────────────┐
//!            ▼                                               │
//!  pending ──► running ──► completed                         │
//!     │           └──────► failure ── retries left? ── yes ──┘
//!     ▼                                  └── no ──► failed
//!  cancelled
//! ```
//!
//! Retrying mutates the same task. Recurrence is separate: when a recurring
//! task completes, a new task with a fresh id and zero retries is scheduled
//! at the next cron occurrence.
//!
//! With a state file configured, every mutation writes a JSON snapshot so
//! that one-shot CLI invocations and a long-running `daemon` see the same tasks.

use super::cron::CronSchedule;
use super::manager::UpdateManager;
use crate::constants::{DEFAULT_MAX_RETRIES, SCHEDULER_RETRY_DELAY, SCHEDULER_TICK};
use crate::core::UpdateError;
use crate::utils::fs::atomic_write;
use crate::version::Version;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    /// Completed, failed and cancelled tasks never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// A scheduled update task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledUpdate {
    pub id: String,
    /// Release tag to install, or `latest`
    pub version: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub cron_expression: Option<String>,
    pub is_recurring: bool,
    pub auto_confirm: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Options for [`UpdateScheduler::schedule_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub auto_confirm: bool,
    pub max_retries: u32,
    /// Recurrence rule; setting it makes the task recurring
    pub cron_expression: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            auto_confirm: false,
            max_retries: DEFAULT_MAX_RETRIES,
            cron_expression: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// Task counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub recurring: usize,
    pub is_running: bool,
}

fn new_task_id(version: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("update_{}_{}", version, &suffix[..8])
}

struct SchedulerState {
    manager: Arc<dyn UpdateManager>,
    tasks: Mutex<HashMap<String, ScheduledUpdate>>,
    state_file: Option<PathBuf>,
    retry_delay: Duration,
}

impl SchedulerState {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ScheduledUpdate>>> {
        self.tasks.lock().map_err(|_| anyhow::anyhow!("scheduler task lock poisoned"))
    }

    /// Writes a snapshot while the caller still holds the lock, so snapshots land in order.
    fn persist(&self, tasks: &HashMap<String, ScheduledUpdate>) {
        let Some(path) = &self.state_file else {
            return;
        };
        let mut snapshot: Vec<&ScheduledUpdate> = tasks.values().collect();
        snapshot.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let written = serde_json::to_vec_pretty(&snapshot)
            .context("Failed to serialize scheduler state")
            .and_then(|bytes| atomic_write(path, &bytes));
        if let Err(e) = written {
            warn!("Failed to save scheduler state to {}: {:#}", path.display(), e);
        }
    }

    /// Picks up tasks other processes added or cancelled in the state file.
    fn merge_state_file(&self) {
        let Some(path) = &self.state_file else {
            return;
        };
        let on_disk = match read_state_file(path) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("Failed to read scheduler state: {:#}", e);
                return;
            }
        };
        let Ok(mut tasks) = self.lock() else {
            return;
        };

        let mut changed = false;
        for task in on_disk {
            match tasks.get_mut(&task.id) {
                None if task.status == ScheduleStatus::Pending => {
                    debug!("Picked up scheduled update {} from state file", task.id);
                    tasks.insert(task.id.clone(), task);
                    changed = true;
                }
                Some(existing)
                    if existing.status == ScheduleStatus::Pending
                        && task.status == ScheduleStatus::Cancelled =>
                {
                    existing.status = ScheduleStatus::Cancelled;
                    existing.updated_at = task.updated_at;
                    changed = true;
                }
                _ => {}
            }
        }
        if changed {
            self.persist(&tasks);
        }
    }

    fn sweep_at(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let due: Vec<ScheduledUpdate> = {
            let Ok(mut tasks) = self.lock() else {
                error!("Scheduler lock poisoned; skipping sweep");
                return Vec::new();
            };
            let mut due = Vec::new();
            for task in tasks.values_mut() {
                if task.status == ScheduleStatus::Pending && task.scheduled_time <= now {
                    task.status = ScheduleStatus::Running;
                    task.updated_at = now;
                    due.push(task.clone());
                }
            }
            if !due.is_empty() {
                self.persist(&tasks);
            }
            due
        };

        due.into_iter()
            .map(|task| {
                let state = Arc::clone(self);
                tokio::spawn(async move { state.execute(task).await })
            })
            .collect()
    }

    async fn execute(&self, task: ScheduledUpdate) {
        info!("Executing scheduled update {} to version {}", task.id, task.version);
        let outcome = self.manager.download_and_install_update(&task.version).await;
        let now = Utc::now();

        let Ok(mut tasks) = self.lock() else {
            error!("Scheduler lock poisoned; dropping result of {}", task.id);
            return;
        };

        let follow_up = {
            let Some(entry) = tasks.get_mut(&task.id) else {
                warn!("Scheduled update {} vanished while running", task.id);
                return;
            };
            entry.updated_at = now;

            match outcome {
                Ok(result) => {
                    entry.status = ScheduleStatus::Completed;
                    entry.last_error = None;
                    info!(
                        "Scheduled update {} completed: {} -> {}",
                        entry.id, result.old_version, result.new_version
                    );
                    recurrence_of(entry, now)
                }
                Err(e) => {
                    entry.retry_count += 1;
                    entry.last_error = Some(format!("{e:#}"));
                    if entry.retry_count < entry.max_retries {
                        entry.status = ScheduleStatus::Pending;
                        let delay = chrono::Duration::from_std(self.retry_delay)
                            .unwrap_or(chrono::Duration::minutes(10));
                        entry.scheduled_time =
                            now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
                        warn!(
                            "Scheduled update {} failed (attempt {}/{}), retrying at {}: {:#}",
                            entry.id, entry.retry_count, entry.max_retries, entry.scheduled_time, e
                        );
                    } else {
                        entry.status = ScheduleStatus::Failed;
                        error!(
                            "Scheduled update {} failed after {} attempts: {:#}",
                            entry.id, entry.retry_count, e
                        );
                    }
                    None
                }
            }
        };

        if let Some(next) = follow_up {
            info!("Next recurring update {} at {}", next.id, next.scheduled_time);
            tasks.insert(next.id.clone(), next);
        }
        self.persist(&tasks);
    }
}

/// The task that follows a completed recurring task, if any.
fn recurrence_of(task: &ScheduledUpdate, now: DateTime<Utc>) -> Option<ScheduledUpdate> {
    if !task.is_recurring {
        return None;
    }
    let cron: CronSchedule = match task.cron_expression.as_deref()?.parse() {
        Ok(cron) => cron,
        Err(e) => {
            warn!("Not rescheduling {}: {}", task.id, e);
            return None;
        }
    };

    Some(ScheduledUpdate {
        id: new_task_id(&task.version),
        version: task.version.clone(),
        scheduled_time: cron.next_after(now),
        status: ScheduleStatus::Pending,
        created_at: now,
        updated_at: now,
        retry_count: 0,
        max_retries: task.max_retries,
        last_error: None,
        cron_expression: task.cron_expression.clone(),
        is_recurring: true,
        auto_confirm: task.auto_confirm,
        metadata: task.metadata.clone(),
    })
}

struct SweepLoop {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs update tasks at their scheduled times.
pub struct UpdateScheduler {
    state: Arc<SchedulerState>,
    tick: Duration,
    sweep: Mutex<Option<SweepLoop>>,
}

impl UpdateScheduler {
    pub fn new(manager: Arc<dyn UpdateManager>) -> Self {
        Self {
            state: Arc::new(SchedulerState {
                manager,
                tasks: Mutex::new(HashMap::new()),
                state_file: None,
                retry_delay: SCHEDULER_RETRY_DELAY,
            }),
            tick: SCHEDULER_TICK,
            sweep: Mutex::new(None),
        }
    }

    /// Persists tasks to `path` after every change.
    ///
    /// Must be called before the scheduler is shared or started.
    #[must_use]
    pub fn with_state_file(self, path: impl Into<PathBuf>) -> Self {
        self.rebuild_state(|state| state.state_file = Some(path.into()))
    }

    /// Overrides the sweep interval.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Overrides the delay before a failed task is retried.
    #[must_use]
    pub fn with_retry_delay(self, delay: Duration) -> Self {
        self.rebuild_state(|state| state.retry_delay = delay)
    }

    fn rebuild_state(self, apply: impl FnOnce(&mut SchedulerState)) -> Self {
        let tasks = self.state.tasks.lock().map(|t| t.clone()).unwrap_or_default();
        let mut state = SchedulerState {
            manager: Arc::clone(&self.state.manager),
            tasks: Mutex::new(tasks),
            state_file: self.state.state_file.clone(),
            retry_delay: self.state.retry_delay,
        };
        apply(&mut state);
        Self {
            state: Arc::new(state),
            tick: self.tick,
            sweep: self.sweep,
        }
    }

    #[must_use]
    pub fn state_file(&self) -> Option<&Path> {
        self.state.state_file.as_deref()
    }

    /// Loads tasks from the state file, returning how many were read.
    ///
    /// Tasks saved as `running` were interrupted mid-install; they come back
    /// as `pending` with `last_error = "interrupted"`.
    pub fn load_state(&self) -> Result<usize> {
        let Some(path) = &self.state.state_file else {
            return Ok(0);
        };
        let loaded = read_state_file(path)?;
        let count = loaded.len();

        let mut tasks = self.state.lock()?;
        for mut task in loaded {
            if task.status == ScheduleStatus::Running {
                task.status = ScheduleStatus::Pending;
                task.last_error = Some("interrupted".to_string());
            }
            tasks.insert(task.id.clone(), task);
        }
        debug!("Loaded {} scheduled update(s) from {}", count, path.display());
        Ok(count)
    }

    /// Starts the background sweep.
    ///
    /// # Errors
    ///
    /// [`UpdateError::SchedulerAlreadyRunning`] if already started.
    pub fn start(&self) -> Result<()> {
        let mut sweep = self.sweep.lock().map_err(|_| anyhow::anyhow!("scheduler lock poisoned"))?;
        if sweep.is_some() {
            return Err(UpdateError::SchedulerAlreadyRunning.into());
        }

        let (stop, mut stopped) = watch::channel(false);
        let state = Arc::clone(&self.state);
        let tick = self.tick;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        state.merge_state_file();
                        let started = state.sweep_at(Utc::now());
                        if !started.is_empty() {
                            debug!("Sweep started {} scheduled update(s)", started.len());
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Scheduler sweep loop stopped");
        });

        *sweep = Some(SweepLoop { stop, handle });
        info!("Update scheduler started (every {:?})", self.tick);
        Ok(())
    }

    /// Stops the background sweep. Updates already executing keep running.
    ///
    /// # Errors
    ///
    /// [`UpdateError::SchedulerNotRunning`] if not started.
    pub async fn stop(&self) -> Result<()> {
        let sweep = self
            .sweep
            .lock()
            .map_err(|_| anyhow::anyhow!("scheduler lock poisoned"))?
            .take()
            .ok_or(UpdateError::SchedulerNotRunning)?;

        let _ = sweep.stop.send(true);
        if let Err(e) = sweep.handle.await {
            warn!("Scheduler sweep loop ended abnormally: {}", e);
        }
        info!("Update scheduler stopped");
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sweep.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Schedules `version` (a release tag or `latest`) to be installed at `time`.
    ///
    /// # Errors
    ///
    /// [`UpdateError::InvalidVersion`] or [`UpdateError::InvalidCronExpression`];
    /// nothing is stored in either case.
    pub fn schedule_update(
        &self,
        version: &str,
        time: DateTime<Utc>,
        options: ScheduleOptions,
    ) -> Result<ScheduledUpdate> {
        if !version.eq_ignore_ascii_case("latest") {
            Version::from_tag(version)?;
        }
        let cron = options
            .cron_expression
            .as_deref()
            .map(str::parse::<CronSchedule>)
            .transpose()?;

        let now = Utc::now();
        let task = ScheduledUpdate {
            id: new_task_id(version),
            version: version.to_string(),
            scheduled_time: time,
            status: ScheduleStatus::Pending,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            max_retries: options.max_retries,
            last_error: None,
            cron_expression: cron.map(|c| c.to_string()),
            is_recurring: cron.is_some(),
            auto_confirm: options.auto_confirm,
            metadata: options.metadata,
        };

        let mut tasks = self.state.lock()?;
        tasks.insert(task.id.clone(), task.clone());
        self.state.persist(&tasks);
        info!("Scheduled update {} to {} at {}", task.id, task.version, task.scheduled_time);
        Ok(task)
    }

    /// Cancels a pending task.
    ///
    /// # Errors
    ///
    /// [`UpdateError::TaskNotFound`] for an unknown id, [`UpdateError::TaskRunning`]
    /// while it executes, and an error for tasks that already finished.
    pub fn cancel_scheduled_update(&self, id: &str) -> Result<()> {
        let mut tasks = self.state.lock()?;
        let task = tasks.get_mut(id).ok_or_else(|| UpdateError::TaskNotFound { id: id.to_string() })?;

        match task.status {
            ScheduleStatus::Pending => {
                task.status = ScheduleStatus::Cancelled;
                task.updated_at = Utc::now();
            }
            ScheduleStatus::Running => {
                return Err(UpdateError::TaskRunning { id: id.to_string() }.into());
            }
            ScheduleStatus::Cancelled => return Ok(()),
            status => {
                return Err(UpdateError::Other {
                    message: format!("scheduled update {id} is already {status}"),
                }
                .into());
            }
        }

        self.state.persist(&tasks);
        info!("Cancelled scheduled update {}", id);
        Ok(())
    }

    /// Every task, earliest scheduled first.
    #[must_use]
    pub fn get_scheduled_updates(&self) -> Vec<ScheduledUpdate> {
        let mut all: Vec<_> = self
            .state
            .lock()
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Pending tasks, earliest first.
    #[must_use]
    pub fn get_pending_updates(&self) -> Vec<ScheduledUpdate> {
        self.get_scheduled_updates()
            .into_iter()
            .filter(|task| task.status == ScheduleStatus::Pending)
            .collect()
    }

    #[must_use]
    pub fn get_task(&self, id: &str) -> Option<ScheduledUpdate> {
        self.state.lock().ok()?.get(id).cloned()
    }

    #[must_use]
    pub fn get_scheduler_stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            is_running: self.is_running(),
            ..SchedulerStats::default()
        };
        let Ok(tasks) = self.state.lock() else {
            return stats;
        };

        for task in tasks.values() {
            stats.total += 1;
            match task.status {
                ScheduleStatus::Pending => stats.pending += 1,
                ScheduleStatus::Running => stats.running += 1,
                ScheduleStatus::Completed => stats.completed += 1,
                ScheduleStatus::Failed => stats.failed += 1,
                ScheduleStatus::Cancelled => stats.cancelled += 1,
            }
            if task.is_recurring {
                stats.recurring += 1;
            }
        }
        stats
    }

    /// Runs one sweep as of `now`, returning handles to the executions it started.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        self.state.sweep_at(now)
    }

    /// Deletes finished one-shot tasks last touched before `now - older_than`.
    pub fn cleanup_completed_tasks(&self, older_than: Duration) -> usize {
        self.cleanup_completed_tasks_at(older_than, Utc::now())
    }

    fn cleanup_completed_tasks_at(&self, older_than: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let Ok(mut tasks) = self.state.lock() else {
            return 0;
        };

        let before = tasks.len();
        tasks.retain(|_, task| {
            task.is_recurring || !task.status.is_terminal() || task.updated_at >= cutoff
        });
        let removed = before - tasks.len();

        if removed > 0 {
            self.state.persist(&tasks);
            info!("Removed {} finished scheduled update(s)", removed);
        }
        removed
    }
}

fn read_state_file(path: &Path) -> Result<Vec<ScheduledUpdate>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scheduler state from {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse scheduler state from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeUpdateManager;
    use crate::upgrade::config::UpdateConfig;
    use crate::version::BuildInfo;
    use tempfile::TempDir;

    fn manager() -> Arc<FakeUpdateManager> {
        Arc::new(FakeUpdateManager::new(
            UpdateConfig::default(),
            BuildInfo::release(Version::new(1, 0, 0)),
        ))
    }

    async fn run_sweep(scheduler: &UpdateScheduler, now: DateTime<Utc>) -> usize {
        let handles = scheduler.sweep_at(now);
        let count = handles.len();
        for handle in handles {
            handle.await.unwrap();
        }
        count
    }

    #[tokio::test]
    async fn test_schedule_and_cancel() {
        let scheduler = UpdateScheduler::new(manager());
        let task = scheduler
            .schedule_update("v1.1.0", Utc::now() + chrono::Duration::hours(1), ScheduleOptions::default())
            .unwrap();

        assert!(task.id.starts_with("update_v1.1.0_"));
        assert_eq!(task.max_retries, 3);
        assert!(!task.is_recurring);
        assert_eq!(scheduler.get_pending_updates().len(), 1);

        scheduler.cancel_scheduled_update(&task.id).unwrap();
        assert_eq!(scheduler.get_task(&task.id).unwrap().status, ScheduleStatus::Cancelled);
        assert!(scheduler.get_pending_updates().is_empty());

        let err = scheduler.cancel_scheduled_update("update_missing").unwrap_err();
        assert!(matches!(err.downcast_ref::<UpdateError>(), Some(UpdateError::TaskNotFound { .. })));
    }

    #[tokio::test]
    async fn test_invalid_input_is_not_stored() {
        let scheduler = UpdateScheduler::new(manager());
        let options = ScheduleOptions {
            cron_expression: Some("*/5 * * * *".to_string()),
            ..ScheduleOptions::default()
        };

        let err = scheduler.schedule_update("v1.1.0", Utc::now(), options).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::InvalidCronExpression { .. })
        ));
        assert!(scheduler.schedule_update("soon", Utc::now(), ScheduleOptions::default()).is_err());
        assert!(scheduler.get_scheduled_updates().is_empty());
    }

    #[tokio::test]
    async fn test_successful_run_completes() {
        let manager = manager();
        let scheduler = UpdateScheduler::new(manager.clone());
        let now = Utc::now();
        let task = scheduler.schedule_update("v1.1.0", now, ScheduleOptions::default()).unwrap();
        scheduler
            .schedule_update("v1.2.0", now + chrono::Duration::hours(1), ScheduleOptions::default())
            .unwrap();

        assert_eq!(run_sweep(&scheduler, now).await, 1);

        let done = scheduler.get_task(&task.id).unwrap();
        assert_eq!(done.status, ScheduleStatus::Completed);
        assert_eq!(manager.install_attempts(), vec!["v1.1.0"]);
        assert_eq!(scheduler.get_scheduler_stats().pending, 1);
    }

    #[tokio::test]
    async fn test_recurring_daily_spawns_next_task() {
        let scheduler = UpdateScheduler::new(manager());
        let now = Utc::now();
        let options = ScheduleOptions {
            cron_expression: Some("@daily".to_string()),
            ..ScheduleOptions::default()
        };
        let task = scheduler.schedule_update("latest", now, options).unwrap();
        assert!(task.is_recurring);

        let before_run = Utc::now();
        run_sweep(&scheduler, now).await;

        assert_eq!(scheduler.get_task(&task.id).unwrap().status, ScheduleStatus::Completed);
        let pending = scheduler.get_pending_updates();
        assert_eq!(pending.len(), 1);
        let next = &pending[0];
        assert_ne!(next.id, task.id);
        assert_eq!(next.retry_count, 0);
        assert!(next.is_recurring);
        assert!(next.scheduled_time >= before_run + chrono::Duration::hours(24));

        let stats = scheduler.get_scheduler_stats();
        assert_eq!((stats.total, stats.completed, stats.recurring), (2, 1, 2));
    }

    #[tokio::test]
    async fn test_retries_then_fails() {
        let manager = manager();
        manager.fail_installs(u32::MAX);
        let scheduler = UpdateScheduler::new(manager.clone());
        let now = Utc::now();
        let task = scheduler.schedule_update("v1.1.0", now, ScheduleOptions::default()).unwrap();

        run_sweep(&scheduler, now).await;
        let retried = scheduler.get_task(&task.id).unwrap();
        assert_eq!(retried.status, ScheduleStatus::Pending);
        assert_eq!(retried.retry_count, 1);
        assert!(retried.last_error.is_some());
        assert!(retried.scheduled_time >= now + chrono::Duration::minutes(9));
        assert_eq!(run_sweep(&scheduler, now).await, 0);

        let later = now + chrono::Duration::hours(1);
        run_sweep(&scheduler, later).await;
        run_sweep(&scheduler, later + chrono::Duration::hours(1)).await;

        let failed = scheduler.get_task(&task.id).unwrap();
        assert_eq!(failed.status, ScheduleStatus::Failed);
        assert_eq!(failed.retry_count, 3);
        assert_eq!(manager.install_attempts().len(), 3);
        assert!(scheduler.get_pending_updates().is_empty());
    }

    #[tokio::test]
    async fn test_failed_recurring_task_does_not_recur() {
        let manager = manager();
        manager.fail_installs(u32::MAX);
        let scheduler = UpdateScheduler::new(manager);
        let options = ScheduleOptions {
            cron_expression: Some("@weekly".to_string()),
            max_retries: 1,
            ..ScheduleOptions::default()
        };
        let task = scheduler.schedule_update("v1.1.0", Utc::now(), options).unwrap();

        run_sweep(&scheduler, Utc::now()).await;
        assert_eq!(scheduler.get_task(&task.id).unwrap().status, ScheduleStatus::Failed);
        assert_eq!(scheduler.get_scheduled_updates().len(), 1);
    }

    #[tokio::test]
    async fn test_cannot_cancel_running_task() {
        let manager = manager();
        manager.set_install_delay(Duration::from_millis(200));
        let scheduler = UpdateScheduler::new(manager);
        let task = scheduler.schedule_update("v1.1.0", Utc::now(), ScheduleOptions::default()).unwrap();

        let handles = scheduler.sweep_at(Utc::now());
        let err = scheduler.cancel_scheduled_update(&task.id).unwrap_err();
        assert!(matches!(err.downcast_ref::<UpdateError>(), Some(UpdateError::TaskRunning { .. })));

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(scheduler.get_task(&task.id).unwrap().status, ScheduleStatus::Completed);
        assert!(scheduler.cancel_scheduled_update(&task.id).is_err());
    }

    #[tokio::test]
    async fn test_cleanup_completed_tasks() {
        let scheduler = UpdateScheduler::new(manager());
        let now = Utc::now();
        let one_shot = scheduler.schedule_update("v1.1.0", now, ScheduleOptions::default()).unwrap();
        let recurring = scheduler
            .schedule_update(
                "v1.1.0",
                now,
                ScheduleOptions {
                    cron_expression: Some("@monthly".to_string()),
                    ..ScheduleOptions::default()
                },
            )
            .unwrap();
        let waiting = scheduler
            .schedule_update("v1.2.0", now + chrono::Duration::days(3), ScheduleOptions::default())
            .unwrap();
        run_sweep(&scheduler, now).await;

        assert_eq!(scheduler.cleanup_completed_tasks(Duration::from_secs(3600)), 0);

        let removed = scheduler
            .cleanup_completed_tasks_at(Duration::from_secs(3600), Utc::now() + chrono::Duration::hours(2));
        assert_eq!(removed, 1);
        assert!(scheduler.get_task(&one_shot.id).is_none());
        assert!(scheduler.get_task(&recurring.id).is_some());
        assert!(scheduler.get_task(&waiting.id).is_some());
    }

    #[tokio::test]
    async fn test_start_stop() {
        let scheduler = UpdateScheduler::new(manager()).with_tick(Duration::from_millis(10));

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        let err = scheduler.start().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::SchedulerAlreadyRunning)
        ));

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
        let err = scheduler.stop().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::SchedulerNotRunning)
        ));
    }

    #[tokio::test]
    async fn test_background_sweep_runs_due_tasks() {
        let manager = manager();
        let scheduler = UpdateScheduler::new(manager.clone()).with_tick(Duration::from_millis(10));
        scheduler.schedule_update("v1.1.0", Utc::now(), ScheduleOptions::default()).unwrap();

        scheduler.start().unwrap();
        for _ in 0..100 {
            if scheduler.get_scheduler_stats().completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.stop().await.unwrap();

        assert_eq!(scheduler.get_scheduler_stats().completed, 1);
        assert_eq!(manager.install_attempts(), vec!["v1.1.0"]);
    }

    #[tokio::test]
    async fn test_state_file_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("schedule.json");
        let manager = manager();
        manager.set_install_delay(Duration::from_millis(100));

        let scheduler = UpdateScheduler::new(manager.clone()).with_state_file(&path);
        let task = scheduler.schedule_update("v1.1.0", Utc::now(), ScheduleOptions::default()).unwrap();
        let handles = scheduler.sweep_at(Utc::now());

        // a second process reading the file while the install is in flight
        let reloaded = UpdateScheduler::new(manager).with_state_file(&path);
        assert_eq!(reloaded.load_state().unwrap(), 1);
        let restored = reloaded.get_task(&task.id).unwrap();
        assert_eq!(restored.status, ScheduleStatus::Pending);
        assert_eq!(restored.last_error.as_deref(), Some("interrupted"));

        for handle in handles {
            handle.await.unwrap();
        }
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"status\": \"completed\""));
    }

    #[tokio::test]
    async fn test_merge_picks_up_external_changes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("schedule.json");

        let daemon = UpdateScheduler::new(manager()).with_state_file(&path);
        let cli = UpdateScheduler::new(manager()).with_state_file(&path);
        let task = cli
            .schedule_update("v1.1.0", Utc::now() + chrono::Duration::hours(1), ScheduleOptions::default())
            .unwrap();

        daemon.state.merge_state_file();
        assert_eq!(daemon.get_pending_updates().len(), 1);

        cli.cancel_scheduled_update(&task.id).unwrap();
        daemon.state.merge_state_file();
        assert_eq!(daemon.get_task(&task.id).unwrap().status, ScheduleStatus::Cancelled);
    }
}
