//! Recurrence rules for scheduled updates.
//!
//! Only the four fixed periods below are supported, in either their named or
//! five-field form. Anything else is rejected when a task is scheduled.
//!
//! | Named      | Five-field    |
//! |------------|---------------|
//! | `@daily`   | `0 0 * * *`   |
//! | `@weekly`  | `0 0 * * 0`   |
//! | `@monthly` | `0 0 1 * *`   |
//! | `@yearly`  | `0 0 1 1 *`   |

use crate::core::UpdateError;
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A supported recurrence period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CronSchedule {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl CronSchedule {
    /// Next run after a run at `after`: one full period later.
    #[must_use]
    pub fn next_after(self, after: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self {
            Self::Daily => after.checked_add_signed(Duration::days(1)),
            Self::Weekly => after.checked_add_signed(Duration::weeks(1)),
            Self::Monthly => after.checked_add_months(Months::new(1)),
            Self::Yearly => after.checked_add_months(Months::new(12)),
        };
        next.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Canonical named form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "@daily",
            Self::Weekly => "@weekly",
            Self::Monthly => "@monthly",
            Self::Yearly => "@yearly",
        }
    }
}

impl FromStr for CronSchedule {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.as_str() {
            "@daily" | "0 0 * * *" => Ok(Self::Daily),
            "@weekly" | "0 0 * * 0" => Ok(Self::Weekly),
            "@monthly" | "0 0 1 * *" => Ok(Self::Monthly),
            "@yearly" | "@annually" | "0 0 1 1 *" => Ok(Self::Yearly),
            _ => Err(UpdateError::InvalidCronExpression {
                expression: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CronSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CronSchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
