//! Release channels.

use super::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A named release track used to filter which releases are offered.
///
/// Unknown channel names are preserved in [`ReleaseChannel::Custom`] and
/// accept every version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ReleaseChannel {
    /// Only versions without a prerelease tag.
    #[default]
    Stable,
    /// Versions whose prerelease tag mentions `beta`.
    Beta,
    /// Versions whose prerelease tag mentions `alpha`.
    Alpha,
    /// Any other channel name.
    Custom(String),
}

impl ReleaseChannel {
    /// Whether `version` belongs to this channel.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Stable => !version.is_prerelease(),
            Self::Beta => version.prerelease.as_deref().is_some_and(|p| p.contains("beta")),
            Self::Alpha => version.prerelease.as_deref().is_some_and(|p| p.contains("alpha")),
            Self::Custom(_) => true,
        }
    }

    /// Channel name as stored in configuration.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stable => "stable",
            Self::Beta => "beta",
            Self::Alpha => "alpha",
            Self::Custom(name) => name,
        }
    }
}

impl FromStr for ReleaseChannel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "" | "stable" => Self::Stable,
            "beta" => Self::Beta,
            "alpha" => Self::Alpha,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ReleaseChannel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReleaseChannel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}
