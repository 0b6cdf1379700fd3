//! Persistent record of update attempts.
//!
//! Every install and rollback the manager performs, successful or not, is
//! appended to an [`UpdateHistory`]. Scheduled installs run unattended, so this
//! is where their failures surface. The history file is a JSON array written
//! atomically after each change.

use super::installer::InstallResult;
use crate::utils::fs::atomic_write;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// What kind of operation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Install,
    Rollback,
}

/// Outcome of a recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Success,
    Failed,
    /// The install failed and the previous executable was restored
    RolledBack,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Install => "install",
            Self::Rollback => "rollback",
        })
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        })
    }
}

/// One update attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: UpdateKind,
    pub from_version: String,
    pub to_version: String,
    pub status: UpdateStatus,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub download_size: u64,
    #[serde(default)]
    pub backup_path: Option<PathBuf>,
    /// Journal step that failed
    #[serde(default)]
    pub failed_step: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub platform: String,
}

impl UpdateRecord {
    fn new(kind: UpdateKind, from_version: &str, to_version: &str, status: UpdateStatus) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("upd_{}", &id[..12]),
            timestamp: Utc::now(),
            kind,
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            status,
            duration_ms: 0,
            download_size: 0,
            backup_path: None,
            failed_step: None,
            error: None,
            channel: String::new(),
            platform: String::new(),
        }
    }

    /// Summarizes an install attempt from its journal.
    #[must_use]
    pub fn from_install(result: &InstallResult) -> Self {
        let status = if result.success {
            UpdateStatus::Success
        } else if result.rollback.as_ref().is_some_and(|r| r.succeeded) {
            UpdateStatus::RolledBack
        } else {
            UpdateStatus::Failed
        };

        let mut record =
            Self::new(UpdateKind::Install, &result.old_version, &result.new_version, status);
        record.duration_ms = millis(result.install_time);
        record.backup_path = result.backup_path.clone();
        record.error = result.error.clone();
        record.failed_step = result
            .log_entries
            .iter()
            .find(|entry| entry.error.is_some() && entry.step != "rollback")
            .map(|entry| entry.step.clone());
        record
    }

    /// An install that failed before the installer ran (release lookup or download).
    #[must_use]
    pub fn failed_before_install(from_version: &str, to_version: &str, error: &anyhow::Error) -> Self {
        let mut record = Self::new(UpdateKind::Install, from_version, to_version, UpdateStatus::Failed);
        record.failed_step = Some("download".to_string());
        record.error = Some(format!("{error:#}"));
        record
    }

    /// A restore of a backup over the live executable.
    #[must_use]
    pub fn rollback(from_version: &str, to_version: &str, outcome: Result<(), &anyhow::Error>) -> Self {
        let status = if outcome.is_ok() { UpdateStatus::Success } else { UpdateStatus::Failed };
        let mut record = Self::new(UpdateKind::Rollback, from_version, to_version, status);
        if let Err(e) = outcome {
            record.failed_step = Some("rollback".to_string());
            record.error = Some(format!("{e:#}"));
        }
        record
    }

    #[must_use]
    pub fn with_download_size(mut self, bytes: u64) -> Self {
        self.download_size = bytes;
        self
    }

    #[must_use]
    pub fn with_environment(mut self, channel: impl Into<String>, platform: impl Into<String>) -> Self {
        self.channel = channel.into();
        self.platform = platform.into();
        self
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Selects records; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub kind: Option<UpdateKind>,
    pub status: Option<UpdateStatus>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    #[must_use]
    pub fn matches(&self, record: &UpdateRecord) -> bool {
        self.kind.is_none_or(|kind| record.kind == kind)
            && self.status.is_none_or(|status| record.status == status)
            && self.after.is_none_or(|after| record.timestamp >= after)
            && self.before.is_none_or(|before| record.timestamp <= before)
    }
}

/// Aggregate counts over the recorded installs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistorySummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub rolled_back: usize,
    /// Percentage of installs that succeeded
    pub success_rate: f64,
    pub average_duration_ms: u64,
    pub total_download_size: u64,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

/// Output formats for [`UpdateHistory::audit_trail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditFormat {
    #[default]
    Text,
    Json,
    Csv,
}

impl FromStr for AuditFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unsupported audit format '{other}' (expected text, json, or csv)")),
        }
    }
}

/// Append-only log of update attempts, optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct UpdateHistory {
    path: Option<PathBuf>,
    records: Mutex<Vec<UpdateRecord>>,
}

impl UpdateHistory {
    /// A history that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the history file at `path`; a missing file is an empty history.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = read_history_file(&path)?;
        debug!("Loaded {} update record(s) from {}", records.len(), path.display());
        Ok(Self {
            path: Some(path),
            records: Mutex::new(records),
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UpdateRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Appends `record` and saves the file.
    pub fn record(&self, record: UpdateRecord) -> Result<()> {
        let mut records = self.lock();
        debug!("Recording {} {} -> {}: {}", record.kind, record.from_version, record.to_version, record.status);
        records.push(record);
        self.save(&records)
    }

    /// Matching records, newest first, capped at `filter.limit`.
    #[must_use]
    pub fn records(&self, filter: &HistoryFilter) -> Vec<UpdateRecord> {
        let mut matching: Vec<UpdateRecord> =
            self.lock().iter().filter(|r| filter.matches(r)).cloned().collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }

    #[must_use]
    pub fn summary(&self) -> HistorySummary {
        let records = self.lock();
        let installs: Vec<&UpdateRecord> =
            records.iter().filter(|r| r.kind == UpdateKind::Install).collect();

        let mut summary = HistorySummary {
            total: installs.len(),
            ..HistorySummary::default()
        };
        for record in &installs {
            match record.status {
                UpdateStatus::Success => summary.successful += 1,
                UpdateStatus::Failed => summary.failed += 1,
                UpdateStatus::RolledBack => summary.rolled_back += 1,
            }
            summary.total_download_size += record.download_size;
            summary.first = Some(summary.first.map_or(record.timestamp, |t| t.min(record.timestamp)));
            summary.last = Some(summary.last.map_or(record.timestamp, |t| t.max(record.timestamp)));
        }
        if !installs.is_empty() {
            summary.success_rate = summary.successful as f64 / installs.len() as f64 * 100.0;
            let total_ms: u64 = installs.iter().map(|r| r.duration_ms).sum();
            summary.average_duration_ms = total_ms / installs.len() as u64;
        }
        summary
    }

    /// Renders every record, oldest first.
    pub fn audit_trail(&self, format: AuditFormat) -> Result<String> {
        let mut records = self.lock().clone();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        match format {
            AuditFormat::Json => {
                serde_json::to_string_pretty(&records).context("Failed to serialize update history")
            }
            AuditFormat::Csv => {
                let mut out = String::from("id,timestamp,kind,from_version,to_version,status,duration_ms,channel,error\n");
                for r in &records {
                    let _ = writeln!(
                        out,
                        "{},{},{},{},{},{},{},{},{}",
                        r.id,
                        r.timestamp.to_rfc3339(),
                        r.kind,
                        csv_field(&r.from_version),
                        csv_field(&r.to_version),
                        r.status,
                        r.duration_ms,
                        csv_field(&r.channel),
                        csv_field(r.error.as_deref().unwrap_or_default()),
                    );
                }
                Ok(out)
            }
            AuditFormat::Text => {
                let mut out = String::from("delta update audit trail\n");
                for r in &records {
                    let _ = write!(
                        out,
                        "\n{}  {}\n  {} {} -> {}: {}\n",
                        r.id,
                        r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        r.kind,
                        r.from_version,
                        r.to_version,
                        r.status
                    );
                    if let Some(step) = &r.failed_step {
                        let _ = writeln!(out, "  failed at: {step}");
                    }
                    if let Some(error) = &r.error {
                        let _ = writeln!(out, "  error: {error}");
                    }
                }
                Ok(out)
            }
        }
    }

    /// Drops records older than `max_age`, returning how many were removed.
    pub fn cleanup_old_records(&self, max_age: Duration) -> Result<usize> {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut records = self.lock();
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        let removed = before - records.len();
        if removed > 0 {
            self.save(&records)?;
        }
        Ok(removed)
    }

    fn save(&self, records: &[UpdateRecord]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(records).context("Failed to serialize update history")?;
        atomic_write(path, &bytes)
            .with_context(|| format!("Failed to save update history to {}", path.display()))
    }
}

fn read_history_file(path: &Path) -> Result<Vec<UpdateRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read update history from {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse update history from {}", path.display()))
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
