//! Version comparison utilities for release tags.
//!
//! Helpers over [`Version`] for the comparisons the checker and CLI need:
//! newer-than checks on raw tag strings, picking the latest tag from a list,
//! and the "patch-only bump" test used for development builds.
//!
//! # Examples
//!
//! ```rust,no_run
//! use delta_update::version::VersionComparator;
//!
//! # fn example() -> anyhow::Result<()> {
//! assert!(VersionComparator::is_newer("v1.1.0", "1.0.0")?);
//!
//! let tags = vec!["v1.0.0".to_string(), "release-2.0.0".to_string()];
//! assert_eq!(VersionComparator::get_latest(&tags), Some(&"release-2.0.0".to_string()));
//! # Ok(())
//! # }
//! ```

use super::Version;
use crate::core::UpdateError;

/// Stateless comparison helpers over release tag strings.
pub struct VersionComparator;

impl VersionComparator {
    /// Whether `candidate` is strictly newer than `current`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidVersion`] if either tag does not parse.
    pub fn is_newer(candidate: &str, current: &str) -> Result<bool, UpdateError> {
        Ok(Version::from_tag(candidate)? > Version::from_tag(current)?)
    }

    /// Returns the latest tag among `versions`, skipping tags that do not parse.
    #[must_use]
    pub fn get_latest(versions: &[String]) -> Option<&String> {
        versions
            .iter()
            .filter_map(|tag| Version::from_tag(tag).ok().map(|v| (tag, v)))
            .max_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(tag, _)| tag)
    }

    /// Whether moving from `current` to `latest` changes only the patch level.
    ///
    /// Development builds are not offered patch-only bumps.
    #[must_use]
    pub fn is_patch_only_bump(current: &Version, latest: &Version) -> bool {
        current.same_minor_line(latest)
    }
}
