//! Build metadata of the running binary.

use super::Version;
use serde::{Deserialize, Serialize};

const UNKNOWN: &str = "unknown";

/// Identity of the running build.
///
/// Release pipelines stamp `DELTA_GIT_COMMIT`, `DELTA_BUILD_DATE`, and
/// `DELTA_GIT_DIRTY` at compile time. A binary missing any stamp, or built
/// from a dirty tree, is a development build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Semantic version of this build
    pub version: Version,
    /// Commit hash, or `unknown`
    pub git_commit: String,
    /// Build date, or `unknown`
    pub build_date: String,
    /// Whether the source tree had uncommitted changes
    pub dirty: bool,
}

impl BuildInfo {
    /// Build info for this binary, from compile-time environment stamps.
    #[must_use]
    pub fn current() -> Self {
        let version = Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or(Version::new(0, 0, 0));
        Self {
            version,
            git_commit: option_env!("DELTA_GIT_COMMIT").unwrap_or(UNKNOWN).to_string(),
            build_date: option_env!("DELTA_BUILD_DATE").unwrap_or(UNKNOWN).to_string(),
            dirty: option_env!("DELTA_GIT_DIRTY").is_some_and(|v| v == "true" || v == "1"),
        }
    }

    /// A stamped release build of `version`.
    #[must_use]
    pub fn release(version: Version) -> Self {
        Self {
            version,
            git_commit: "release".to_string(),
            build_date: "release".to_string(),
            dirty: false,
        }
    }

    /// An unstamped development build of `version`.
    #[must_use]
    pub fn development(version: Version) -> Self {
        Self {
            version,
            git_commit: UNKNOWN.to_string(),
            build_date: UNKNOWN.to_string(),
            dirty: false,
        }
    }

    /// Whether this is a development build.
    #[must_use]
    pub fn is_development(&self) -> bool {
        self.dirty
            || self.git_commit.is_empty()
            || self.git_commit == UNKNOWN
            || self.build_date.is_empty()
            || self.build_date == UNKNOWN
    }

    /// Version string with a `v` prefix, as recorded in install results.
    #[must_use]
    pub fn version_tag(&self) -> String {
        self.version.to_tag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_development_detection() {
        let version = Version::new(1, 0, 0);
        assert!(!BuildInfo::release(version.clone()).is_development());
        assert!(BuildInfo::development(version.clone()).is_development());

        let mut dirty = BuildInfo::release(version);
        dirty.dirty = true;
        assert!(dirty.is_development());
    }

    #[test]
    fn test_current_uses_package_version() {
        let info = BuildInfo::current();
        assert_eq!(info.version.to_string(), env!("CARGO_PKG_VERSION"));
        assert_eq!(info.version_tag(), format!("v{}", env!("CARGO_PKG_VERSION")));
    }
}
