//! Candidate executable validation.
//!
//! A binary is considered valid when it is a regular file and exits zero when
//! asked for its version. Validation runs on candidates before install, on
//! backups before they are trusted, and on the live binary after install.

use crate::constants::VALIDATION_TIMEOUT;
use crate::core::UpdateError;
use crate::utils::fs::set_executable;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Decides whether an executable on disk is usable.
#[async_trait]
pub trait BinaryValidator: Send + Sync {
    /// Returns `Ok` when `path` is a runnable executable.
    ///
    /// # Errors
    ///
    /// [`UpdateError::InvalidBinary`] describing why validation failed.
    async fn validate(&self, path: &Path) -> Result<()>;
}

/// Validates by running the binary with `--version`, then `version`.
#[derive(Debug, Clone)]
pub struct ProcessValidator {
    timeout: Duration,
}

impl Default for ProcessValidator {
    fn default() -> Self {
        Self::new(VALIDATION_TIMEOUT)
    }
}

impl ProcessValidator {
    /// Validator that gives each probe `timeout` to finish.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn probe(&self, path: &Path, arg: &str) -> std::result::Result<(), String> {
        let mut attempts = 0;
        let child = loop {
            let spawned = Command::new(path)
                .arg(arg)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();
            match spawned {
                // ETXTBSY: a concurrent fork still holds a write handle to the fresh file
                Err(e) if e.raw_os_error() == Some(26) && attempts < 5 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => return Err(format!("failed to execute: {e}")),
                Ok(child) => break child,
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => Err(format!("`{arg}` timed out after {:?}", self.timeout)),
            Ok(Err(e)) => Err(format!("failed to wait for process: {e}")),
            Ok(Ok(output)) if output.status.success() => {
                debug!(
                    "{} {} -> {}",
                    path.display(),
                    arg,
                    String::from_utf8_lossy(&output.stdout).trim()
                );
                Ok(())
            }
            Ok(Ok(output)) => Err(format!("`{arg}` exited with {}", output.status)),
        }
    }
}

#[async_trait]
impl BinaryValidator for ProcessValidator {
    async fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |reason: String| UpdateError::InvalidBinary {
            path: path.display().to_string(),
            reason,
        };

        let metadata =
            tokio::fs::metadata(path).await.map_err(|e| invalid(format!("cannot stat: {e}")))?;
        if !metadata.is_file() {
            return Err(invalid("not a regular file".to_string()).into());
        }

        set_executable(path).await?;

        let first = match self.probe(path, "--version").await {
            Ok(()) => return Ok(()),
            Err(reason) => reason,
        };
        debug!("{} rejected --version ({}), trying `version`", path.display(), first);

        self.probe(path, "version").await.map_err(|second| invalid(format!("{first}; {second}")))?;
        Ok(())
    }
}
