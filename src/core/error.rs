//! Error handling for the delta update subsystem
//!
//! This module provides the strongly-typed error enum used across the checker,
//! scheduler, and installer, plus the user-facing error reporting used by the
//! CLI. The design follows two principles:
//! 1. **Strongly-typed errors** so callers can react to specific failures
//!    (for example backing off on [`UpdateError::CheckInProgress`])
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Error Categories
//!
//! - **Policy**: [`UpdateError::InvalidVersion`], [`UpdateError::ReleaseFetch`]
//! - **Concurrency**: [`UpdateError::CheckInProgress`]
//! - **Validation**: [`UpdateError::NoBinaryInArchive`], [`UpdateError::InvalidBinary`]
//! - **Backup**: [`UpdateError::BackupFailed`], [`UpdateError::NoBackupsAvailable`]
//! - **Install**: [`UpdateError::InstallFailed`], [`UpdateError::VerificationFailed`]
//! - **Scheduling**: [`UpdateError::TaskNotFound`], [`UpdateError::TaskRunning`],
//!   [`UpdateError::InvalidCronExpression`], [`UpdateError::SchedulerAlreadyRunning`],
//!   [`UpdateError::SchedulerNotRunning`]
//!
//! Operations return [`anyhow::Result`]; the variants above travel inside the
//! `anyhow::Error` and are recovered with `downcast_ref::<UpdateError>()`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use delta_update::core::{UpdateError, user_friendly_error};
//!
//! let error = anyhow::Error::from(UpdateError::CheckInProgress);
//! let context = user_friendly_error(error);
//! context.display(); // Shows the error with a suggestion to retry later
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for update operations.
#[derive(Error, Debug, Clone)]
pub enum UpdateError {
    /// Another update check is already running on this checker.
    ///
    /// Expected and non-fatal; callers should back off instead of retrying
    /// in a tight loop.
    #[error("update check already in progress")]
    CheckInProgress,

    /// A release tag or user-supplied string is not a valid semantic version.
    #[error("Invalid version '{version}': expected MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]")]
    InvalidVersion {
        /// The offending string
        version: String,
    },

    /// Fetching release metadata from the release host failed.
    #[error("Failed to fetch release information: {reason}")]
    ReleaseFetch {
        /// Underlying cause
        reason: String,
    },

    /// No release asset matches the running platform.
    #[error("No release asset available for platform {platform}")]
    NoMatchingAsset {
        /// Platform string (`os-arch`)
        platform: String,
    },

    /// An archive was extracted but contained nothing that looks like the product binary.
    #[error("No executable found in archive {archive}")]
    NoBinaryInArchive {
        /// Archive file name
        archive: String,
    },

    /// A candidate binary is missing, not a regular file, or does not run.
    #[error("Invalid binary at {path}: {reason}")]
    InvalidBinary {
        /// Binary path
        path: String,
        /// Why validation failed
        reason: String,
    },

    /// A downloaded file's checksum differs from the published one.
    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// File name
        file: String,
        /// Published checksum
        expected: String,
        /// Computed checksum
        actual: String,
    },

    /// The current executable could not be backed up. Nothing was changed.
    #[error("Failed to back up current executable: {reason}")]
    BackupFailed {
        /// Underlying cause
        reason: String,
    },

    /// Replacing the live executable failed.
    #[error("Failed to install new executable: {reason}")]
    InstallFailed {
        /// Underlying cause
        reason: String,
    },

    /// The installed executable did not pass post-install verification.
    #[error("Installed executable failed verification: {reason}")]
    VerificationFailed {
        /// Underlying cause
        reason: String,
    },

    /// No backups exist to roll back to.
    #[error("No backups available for rollback")]
    NoBackupsAvailable,

    /// The update system is disabled in configuration.
    #[error("Update system is disabled")]
    UpdatesDisabled,

    /// No scheduled task has the given ID.
    #[error("Scheduled update not found: {id}")]
    TaskNotFound {
        /// Task ID
        id: String,
    },

    /// The task is currently installing and cannot be cancelled.
    #[error("Cannot cancel running update: {id}")]
    TaskRunning {
        /// Task ID
        id: String,
    },

    /// The cron expression is not one of the supported schedules.
    #[error("Unsupported cron expression '{expression}'")]
    InvalidCronExpression {
        /// The rejected expression
        expression: String,
    },

    /// `start()` called on a running scheduler.
    #[error("Scheduler is already running")]
    SchedulerAlreadyRunning,

    /// `stop()` called on a stopped scheduler.
    #[error("Scheduler is not running")]
    SchedulerNotRunning,

    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}")]
    ConfigError {
        /// Description of the problem
        message: String,
    },

    /// I/O error with its message preserved.
    #[error("IO error: {0}")]
    IoError(String),

    /// Catch-all with a message.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

impl From<std::io::Error> for UpdateError {
    fn from(error: std::io::Error) -> Self {
        Self::IoError(error.to_string())
    }
}

impl From<semver::Error> for UpdateError {
    fn from(error: semver::Error) -> Self {
        Self::InvalidVersion {
            version: error.to_string(),
        }
    }
}

/// Error wrapper that adds user-friendly details and a suggestion.
///
/// Displayed by `main` when a command fails: the error in red, details in
/// yellow, and the suggestion in green.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: UpdateError,
    /// Actionable next step for the user
    pub suggestion: Option<String>,
    /// Additional explanation
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context without suggestion or details.
    #[must_use]
    pub const fn new(error: UpdateError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error context to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error to a user-friendly [`ErrorContext`].
///
/// Recognizes [`UpdateError`] anywhere in the error chain (so context added
/// with `.context(..)` does not hide it), [`std::io::Error`] kinds, and
/// otherwise falls back to the full error chain as the message.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(update_error) = error.chain().find_map(|e| e.downcast_ref::<UpdateError>()) {
        let mut context = create_error_context(update_error.clone());
        if error.chain().count() > 1 && context.details.is_none() {
            context.details = Some(format!("{error:#}"));
        }
        return context;
    }

    if let Some(io_error) = error.chain().find_map(|e| e.downcast_ref::<std::io::Error>()) {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(UpdateError::IoError(format!("{error:#}")))
                    .with_suggestion(
                        "Run with elevated permissions (sudo/Administrator) or check ownership of the delta executable",
                    )
                    .with_details("Replacing the executable requires write access to its directory");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(UpdateError::IoError(format!("{error:#}")))
                    .with_suggestion("Check that the file or directory exists and the path is correct");
            }
            _ => {}
        }
    }

    ErrorContext::new(UpdateError::Other {
        message: format!("{error:#}"),
    })
}

fn create_error_context(error: UpdateError) -> ErrorContext {
    match &error {
        UpdateError::CheckInProgress => ErrorContext::new(error)
            .with_suggestion("Wait for the running check to finish and try again"),

        UpdateError::ReleaseFetch { .. } => ErrorContext::new(error)
            .with_suggestion("Check your internet connection, or set GITHUB_TOKEN to raise the API rate limit")
            .with_details("Release information is fetched from the GitHub releases API"),

        UpdateError::NoMatchingAsset { .. } => ErrorContext::new(error)
            .with_suggestion("Download a build for your platform manually from the releases page"),

        UpdateError::InvalidVersion { .. } => ErrorContext::new(error)
            .with_suggestion("Use a version like 1.4.2 or v1.4.2-beta"),

        UpdateError::NoBinaryInArchive { .. } | UpdateError::InvalidBinary { .. } => {
            ErrorContext::new(error)
                .with_suggestion("The release artifact appears corrupt; delete the download directory and retry")
                .with_details("Your current installation was not modified")
        }

        UpdateError::ChecksumMismatch { .. } => ErrorContext::new(error)
            .with_suggestion("Retry the download; if it persists, report the release as corrupt")
            .with_details("The downloaded file was removed and nothing was installed"),

        UpdateError::BackupFailed { .. } => ErrorContext::new(error)
            .with_suggestion("Check free space and permissions of the backup directory")
            .with_details("The update was aborted before touching the current executable"),

        UpdateError::InstallFailed { .. } | UpdateError::VerificationFailed { .. } => {
            ErrorContext::new(error)
                .with_suggestion("Run 'delta-update history' and 'delta-update rollback' if delta no longer starts")
        }

        UpdateError::NoBackupsAvailable => ErrorContext::new(error)
            .with_details("Backups are created automatically before each update"),

        UpdateError::UpdatesDisabled => ErrorContext::new(error)
            .with_suggestion("Enable updates with 'delta-update config --set enabled=true'"),

        UpdateError::TaskNotFound { .. } => ErrorContext::new(error)
            .with_suggestion("List scheduled updates with 'delta-update pending --all'"),

        UpdateError::TaskRunning { .. } => ErrorContext::new(error)
            .with_details("An installation in progress always runs to completion, including any rollback"),

        UpdateError::InvalidCronExpression { .. } => ErrorContext::new(error).with_suggestion(
            "Use one of @daily, @weekly, @monthly, @yearly or their five-field forms such as '0 0 * * *'",
        ),

        UpdateError::SchedulerAlreadyRunning | UpdateError::SchedulerNotRunning => {
            ErrorContext::new(error)
        }

        UpdateError::ConfigError { .. } => ErrorContext::new(error)
            .with_suggestion("Inspect the configuration with 'delta-update config'"),

        UpdateError::IoError(_) | UpdateError::Other { .. } => ErrorContext::new(error),
    }
}
