use crate::constants::DEFAULT_GITHUB_REPOSITORY;
use crate::core::UpdateError;
use crate::version::ReleaseChannel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Persisted settings controlling delta's self-update behavior.
///
/// `UpdateConfig` is stored as a JSON document (see
/// [`JsonConfigStore`](crate::config::JsonConfigStore)). Timestamps are kept as
/// RFC3339 strings on disk for format stability and are parsed into
/// [`DateTime<Utc>`] through the accessor methods; domain code never compares
/// the raw strings.
///
/// # Configuration Categories
///
/// ## Checking
/// - **enabled**: master switch for the whole update system
/// - **check_on_startup** / **check_interval**: when checks happen
/// - **channel** / **allow_prerelease**: which releases are eligible
///
/// ## Installing
/// - **auto_install**: install without prompting when an update is found
/// - **backup_before_update**: keep a rollback copy of the current executable
/// - **download_directory**: where release artifacts are saved
///
/// ## User decisions
/// - **skip_version**: a release the user declined permanently
/// - **postponed_version** / **postponed_until**: a release the user deferred
/// - **notification_level**: how updates are surfaced
///
/// # JSON Example
/// ```json
/// {
///   "enabled": true,
///   "channel": "stable",
///   "check_interval": "daily",
///   "last_check": "2024-05-01T09:30:00Z",
///   "notification_level": "prompt"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Master switch for the update system.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Run a check when delta starts (if the interval has elapsed).
    #[serde(default = "default_true")]
    pub check_on_startup: bool,

    /// Install updates found by background checks without asking.
    #[serde(default)]
    pub auto_install: bool,

    /// Release channel to follow.
    #[serde(default)]
    pub channel: ReleaseChannel,

    /// How often to check for updates.
    #[serde(default)]
    pub check_interval: CheckInterval,

    /// Back up the current executable before replacing it.
    #[serde(default = "default_true")]
    pub backup_before_update: bool,

    /// Offer prerelease versions.
    #[serde(default)]
    pub allow_prerelease: bool,

    /// GitHub repository (`owner/name`) publishing releases.
    #[serde(default = "default_repository")]
    pub github_repository: String,

    /// Directory for downloaded artifacts. Empty means the platform cache directory.
    #[serde(default)]
    pub download_directory: String,

    /// RFC3339 timestamp of the last completed check.
    #[serde(default)]
    pub last_check: String,

    /// Latest version seen by the last check.
    #[serde(default)]
    pub last_version: String,

    /// Version the user chose to skip.
    #[serde(default)]
    pub skip_version: String,

    /// How update availability is surfaced.
    #[serde(default)]
    pub notification_level: NotificationLevel,

    /// Version the user postponed.
    #[serde(default)]
    pub postponed_version: String,

    /// RFC3339 timestamp until which `postponed_version` is suppressed.
    #[serde(default)]
    pub postponed_until: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_on_startup: true,
            auto_install: false,
            channel: ReleaseChannel::Stable,
            check_interval: CheckInterval::Daily,
            backup_before_update: true,
            allow_prerelease: false,
            github_repository: default_repository(),
            download_directory: String::new(),
            last_check: String::new(),
            last_version: String::new(),
            skip_version: String::new(),
            notification_level: NotificationLevel::Prompt,
            postponed_version: String::new(),
            postponed_until: String::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_repository() -> String {
    DEFAULT_GITHUB_REPOSITORY.to_string()
}

impl UpdateConfig {
    /// Time of the last completed check, if recorded and parseable.
    #[must_use]
    pub fn last_check_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.last_check)
    }

    /// Records `at` as the last check time.
    pub fn set_last_check(&mut self, at: DateTime<Utc>) {
        self.last_check = at.to_rfc3339();
    }

    /// End of the current postponement, if any.
    #[must_use]
    pub fn postponed_until_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.postponed_until)
    }

    /// Postpones `version` until `until`.
    pub fn set_postponement(&mut self, version: impl Into<String>, until: DateTime<Utc>) {
        self.postponed_version = version.into();
        self.postponed_until = until.to_rfc3339();
    }

    /// Clears any postponement.
    pub fn clear_postponement(&mut self) {
        self.postponed_version.clear();
        self.postponed_until.clear();
    }

    /// Skip marker, or `None` when unset.
    #[must_use]
    pub fn skip_version(&self) -> Option<&str> {
        (!self.skip_version.is_empty()).then_some(self.skip_version.as_str())
    }

    /// Splits `github_repository` into `(owner, name)`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::ConfigError`] unless the value has the form `owner/name`.
    pub fn repository_parts(&self) -> Result<(&str, &str), UpdateError> {
        match self.github_repository.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok((owner, name))
            }
            _ => Err(UpdateError::ConfigError {
                message: format!(
                    "github_repository must be 'owner/name', got '{}'",
                    self.github_repository
                ),
            }),
        }
    }

    /// Validates fields that cannot be checked by deserialization alone.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::ConfigError`] for a malformed repository or an
    /// unparseable timestamp.
    pub fn validate(&self) -> Result<(), UpdateError> {
        self.repository_parts()?;
        for (field, value) in [("last_check", &self.last_check), ("postponed_until", &self.postponed_until)] {
            if !value.is_empty() && parse_timestamp(value).is_none() {
                return Err(UpdateError::ConfigError {
                    message: format!("{field} is not an RFC3339 timestamp: '{value}'"),
                });
            }
        }
        Ok(())
    }

    /// Applies a `key=value` assignment as used by `delta-update config --set`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::ConfigError`] for unknown keys or invalid values.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), UpdateError> {
        let parse_bool = |value: &str| -> Result<bool, UpdateError> {
            match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(UpdateError::ConfigError {
                    message: format!("'{value}' is not a boolean for {key}"),
                }),
            }
        };

        match key {
            "enabled" => self.enabled = parse_bool(value)?,
            "check_on_startup" => self.check_on_startup = parse_bool(value)?,
            "auto_install" => self.auto_install = parse_bool(value)?,
            "backup_before_update" => self.backup_before_update = parse_bool(value)?,
            "allow_prerelease" => self.allow_prerelease = parse_bool(value)?,
            "channel" => self.channel = value.parse().unwrap_or_default(),
            "check_interval" => self.check_interval = value.parse().unwrap_or_default(),
            "notification_level" => self.notification_level = value.parse()?,
            "github_repository" => self.github_repository = value.to_string(),
            "download_directory" => self.download_directory = value.to_string(),
            "skip_version" => self.skip_version = value.to_string(),
            _ => {
                return Err(UpdateError::ConfigError {
                    message: format!("unknown configuration key '{key}'"),
                });
            }
        }
        self.validate()
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value).ok().map(|t| t.with_timezone(&Utc))
}

/// How often update checks run.
///
/// Unrecognized values deserialize as [`CheckInterval::Daily`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckInterval {
    /// Every 24 hours.
    #[default]
    Daily,
    /// Every 7 days.
    Weekly,
    /// Every 30 days.
    Monthly,
}

impl CheckInterval {
    /// Minimum time between two checks.
    #[must_use]
    pub const fn duration(self) -> Duration {
        const DAY: u64 = 24 * 60 * 60;
        match self {
            Self::Daily => Duration::from_secs(DAY),
            Self::Weekly => Duration::from_secs(7 * DAY),
            Self::Monthly => Duration::from_secs(30 * DAY),
        }
    }

    /// Name as stored in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl FromStr for CheckInterval {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "weekly" => Self::Weekly,
            "monthly" => Self::Monthly,
            _ => Self::Daily,
        })
    }
}

impl fmt::Display for CheckInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CheckInterval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CheckInterval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}

/// How available updates are surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    /// Never notify.
    Silent,
    /// Print a one-line notice.
    Notify,
    /// Ask whether to install now.
    #[default]
    Prompt,
}

impl FromStr for NotificationLevel {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(Self::Silent),
            "notify" => Ok(Self::Notify),
            "prompt" => Ok(Self::Prompt),
            other => Err(UpdateError::ConfigError {
                message: format!("notification level must be silent, notify or prompt, got '{other}'"),
            }),
        }
    }
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Silent => "silent",
            Self::Notify => "notify",
            Self::Prompt => "prompt",
        })
    }
}
