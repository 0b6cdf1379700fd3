//! Update check observations.

use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

/// One completed update check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckObservation {
    /// Whether the check completed without error
    pub success: bool,
    /// Wall time the check took
    pub duration: Duration,
    /// Whether an applicable update was found
    pub has_update: bool,
    /// Latest version seen, when the release was fetched
    pub latest_version: Option<String>,
}

/// Receives check observations.
pub trait MetricsSink: Send + Sync {
    /// Records one check.
    fn record_check(&self, observation: CheckObservation);
}

/// Keeps observations in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    checks: Mutex<Vec<CheckObservation>>,
}

impl InMemoryMetrics {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All observations so far, oldest first.
    #[must_use]
    pub fn checks(&self) -> Vec<CheckObservation> {
        self.checks.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of failed checks.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.checks().iter().filter(|c| !c.success).count()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_check(&self, observation: CheckObservation) {
        if let Ok(mut checks) = self.checks.lock() {
            checks.push(observation);
        }
    }
}
