//! Platform detection and per-platform naming conventions.
//!
//! Release artifacts are published per operating system and CPU architecture,
//! and executables follow different naming rules on Windows. This module keeps
//! those differences behind a small [`Platform`] value so that asset selection
//! and artifact detection can be tested against any target, not only the host.

use anyhow::{Result, anyhow};
use std::fmt;
use std::path::PathBuf;

/// Operating system and architecture pair, rendered as `os-arch`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    /// Operating system name as reported by [`std::env::consts::OS`].
    pub os: String,
    /// CPU architecture as reported by [`std::env::consts::ARCH`].
    pub arch: String,
}

impl Platform {
    /// Creates a platform from explicit names.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this binary was compiled for.
    #[must_use]
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Whether executables on this platform carry a `.exe` suffix.
    #[must_use]
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    /// Executable suffix for this platform (`.exe` or empty).
    #[must_use]
    pub fn exe_suffix(&self) -> &'static str {
        if self.is_windows() { ".exe" } else { "" }
    }

    /// Name fragments release assets commonly use for this operating system.
    #[must_use]
    pub fn os_aliases(&self) -> &'static [&'static str] {
        match self.os.as_str() {
            "linux" => &["linux"],
            "macos" | "darwin" => &["darwin", "macos", "apple", "mac"],
            "windows" => &["windows", "win64", "win"],
            "freebsd" => &["freebsd"],
            _ => &[],
        }
    }

    /// Name fragments release assets commonly use for this architecture.
    #[must_use]
    pub fn arch_aliases(&self) -> &'static [&'static str] {
        match self.arch.as_str() {
            "x86_64" | "amd64" => &["x86_64", "amd64", "x64"],
            "aarch64" | "arm64" => &["aarch64", "arm64"],
            "x86" | "386" | "i686" => &["i686", "i386", "386", "x86"],
            "arm" => &["armv7", "arm"],
            _ => &[],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// Returns `true` when compiled for Windows.
#[must_use]
pub const fn is_windows() -> bool {
    cfg!(windows)
}

/// Root directory for delta's data (backups, schedule state).
///
/// Honors [`DATA_DIR_ENV`](crate::constants::DATA_DIR_ENV) so tests and
/// portable installs can relocate everything under one directory.
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(crate::constants::DATA_DIR_ENV)
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }

    dirs::data_local_dir().map(|p| p.join(crate::constants::PRODUCT_NAME)).ok_or_else(|| {
        let platform_help = if is_windows() {
            "On Windows: Check that the LOCALAPPDATA environment variable is set"
        } else if cfg!(target_os = "macos") {
            "On macOS: Check that the HOME environment variable is set"
        } else {
            "On Linux: Check that the XDG_DATA_HOME or HOME environment variable is set"
        };
        anyhow!("Could not determine data directory.\n\n{platform_help}")
    })
}

/// Directory where downloaded release artifacts are stored by default.
pub fn get_download_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|p| p.join(crate::constants::PRODUCT_NAME).join("downloads"))
        .ok_or_else(|| anyhow!("Could not determine cache directory for downloads"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_display() {
        let platform = Platform::new("linux", "x86_64");
        assert_eq!(platform.to_string(), "linux-x86_64");
    }

    #[test]
    fn test_exe_suffix() {
        assert_eq!(Platform::new("windows", "x86_64").exe_suffix(), ".exe");
        assert_eq!(Platform::new("macos", "aarch64").exe_suffix(), "");
    }

    #[test]
    fn test_aliases_cover_go_style_names() {
        let platform = Platform::new("darwin", "amd64");
        assert!(platform.os_aliases().contains(&"macos"));
        assert!(platform.arch_aliases().contains(&"x86_64"));
        assert!(Platform::new("plan9", "mips").os_aliases().is_empty());
    }

    #[test]
    fn test_current_matches_consts() {
        let current = Platform::current();
        assert_eq!(current.os, std::env::consts::OS);
        assert_eq!(current.is_windows(), is_windows());
    }
}
