//! Shared helpers for integration tests.

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// An isolated home for one `delta-update` invocation sequence.
///
/// Points the configuration file and data directory into a temp dir so
/// tests never read or write the real user's settings, backups, or schedule.
pub struct TestEnv {
    pub temp: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.temp.path().join("config").join("update.json")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp.path().join("data")
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// A `delta-update` command wired to this environment.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("delta-update").unwrap();
        cmd.env("DELTA_UPDATE_CONFIG", self.config_path())
            .env("DELTA_UPDATE_HOME", self.data_dir())
            .env("DELTA_NO_PROGRESS", "1")
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .env_remove("GITHUB_TOKEN");
        cmd
    }
}
