//! Version model for release tags.
//!
//! Release tags are parsed into [`Version`] values that compare numerically
//! on `(major, minor, patch)`, rank any release above a prerelease of the same
//! triple, and then compare prerelease tags lexicographically. Build metadata
//! is carried for display but never affects equality or ordering.
//!
//! # Examples
//!
//! ```rust,no_run
//! use delta_update::version::Version;
//!
//! # fn example() -> anyhow::Result<()> {
//! let current = Version::parse("v1.2.1")?;
//! let beta = Version::from_tag("release-1.3.0-beta")?;
//! let stable = Version::parse("1.3.0")?;
//!
//! assert!(current < beta);
//! assert!(beta < stable);
//! assert!(beta.is_prerelease());
//! # Ok(())
//! # }
//! ```

pub mod build;
pub mod channel;
pub mod comparison;

pub use build::BuildInfo;
pub use channel::ReleaseChannel;
pub use comparison::VersionComparator;

use crate::core::UpdateError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A parsed semantic version.
#[derive(Debug, Clone)]
pub struct Version {
    /// Major component
    pub major: u64,
    /// Minor component
    pub minor: u64,
    /// Patch component
    pub patch: u64,
    /// Prerelease tag without the leading `-` (e.g. `beta.1`)
    pub prerelease: Option<String>,
    /// Build metadata without the leading `+`
    pub build: Option<String>,
}

impl Version {
    /// Creates a release version with no prerelease or build metadata.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Parses `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`, with an optional `v` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidVersion`] if the string is not a valid
    /// semantic version.
    pub fn parse(input: &str) -> Result<Self, UpdateError> {
        let trimmed = input.trim();
        let clean = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let parsed = semver::Version::parse(clean).map_err(|_| UpdateError::InvalidVersion {
            version: input.to_string(),
        })?;

        Ok(Self {
            major: parsed.major,
            minor: parsed.minor,
            patch: parsed.patch,
            prerelease: (!parsed.pre.is_empty()).then(|| parsed.pre.as_str().to_string()),
            build: (!parsed.build.is_empty()).then(|| parsed.build.as_str().to_string()),
        })
    }

    /// Parses a release tag, stripping `version-`, `release-`, or `v` prefixes.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidVersion`] if the remaining string is not a
    /// valid semantic version.
    pub fn from_tag(tag: &str) -> Result<Self, UpdateError> {
        Self::parse(&strip_tag_prefix(tag)).map_err(|_| UpdateError::InvalidVersion {
            version: tag.to_string(),
        })
    }

    /// Whether the version carries a prerelease tag.
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// Whether `self` and `other` differ only in the patch component (or prerelease).
    #[must_use]
    pub fn same_minor_line(&self, other: &Self) -> bool {
        self.major == other.major && self.minor == other.minor
    }

    /// Renders the version with a leading `v`, as release tags are named.
    #[must_use]
    pub fn to_tag(&self) -> String {
        format!("v{self}")
    }
}

/// Removes the common release tag prefixes (`version-`, `release-`, `v`).
#[must_use]
pub fn strip_tag_prefix(tag: &str) -> String {
    let tag = tag.trim();
    let stripped = if let Some(rest) = tag.strip_prefix("version-") {
        rest
    } else if let Some(rest) = tag.strip_prefix("release-") {
        rest
    } else if let Some(rest) = tag.strip_prefix('v') {
        rest
    } else {
        tag
    };
    stripped.to_string()
}

/// Whether `input` parses as a version (after stripping tag prefixes).
#[must_use]
pub fn is_valid_version(input: &str) -> bool {
    Version::from_tag(input).is_ok()
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.prerelease.hash(state);
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_tag(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_components() {
        let version = v("v1.4.2-beta.1+build.7");
        assert_eq!((version.major, version.minor, version.patch), (1, 4, 2));
        assert_eq!(version.prerelease.as_deref(), Some("beta.1"));
        assert_eq!(version.build.as_deref(), Some("build.7"));
        assert_eq!(version.to_string(), "1.4.2-beta.1+build.7");
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for bad in ["", "1.2", "1.2.3.4", "abc", "v", "1.x.0", "latest"] {
            let err = Version::parse(bad).unwrap_err();
            assert!(matches!(err, UpdateError::InvalidVersion { .. }), "{bad}");
        }
    }

    #[test]
    fn test_from_tag_strips_prefixes() {
        assert_eq!(Version::from_tag("v2.0.0").unwrap(), Version::new(2, 0, 0));
        assert_eq!(Version::from_tag("version-2.0.0").unwrap(), Version::new(2, 0, 0));
        assert_eq!(Version::from_tag("release-2.0.0").unwrap(), Version::new(2, 0, 0));
        assert!(is_valid_version("v1.0.0-rc1"));
        assert!(!is_valid_version("nightly"));
    }

    #[test]
    fn test_total_order_chain() {
        let chain = ["1.2.0", "1.2.1", "1.3.0-alpha", "1.3.0-beta", "1.3.0", "2.0.0"];
        for window in chain.windows(2) {
            assert!(v(window[0]) < v(window[1]), "{} < {}", window[0], window[1]);
            assert!(v(window[1]) > v(window[0]));
        }
    }

    #[test]
    fn test_release_beats_prerelease() {
        assert!(v("1.3.0") > v("1.3.0-rc9"));
        assert!(v("1.3.0-rc1") > v("1.2.99"));
    }

    #[test]
    fn test_numeric_not_lexicographic_components() {
        assert!(v("1.10.0") > v("1.9.0"));
        assert!(v("0.0.10") > v("0.0.9"));
    }

    #[test]
    fn test_build_metadata_ignored() {
        assert_eq!(v("1.0.0+a"), v("1.0.0+b"));
        assert_eq!(v("1.0.0+a").cmp(&v("1.0.0")), Ordering::Equal);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v("1.2.3-beta")).unwrap();
        assert_eq!(json, "\"1.2.3-beta\"");
        let back: Version = serde_json::from_str("\"v1.2.3-beta\"").unwrap();
        assert_eq!(back, v("1.2.3-beta"));
    }

    #[test]
    fn test_to_tag() {
        assert_eq!(Version::new(1, 1, 0).to_tag(), "v1.1.0");
    }
}
