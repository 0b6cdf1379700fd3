//! Replacing an executable on disk.
//!
//! Whether a live executable can be overwritten depends on the platform and on
//! whether the image is currently running. [`ReplaceStrategy::probe`] asks the
//! filesystem instead of guessing from the target OS alone, except on Windows
//! where a running image can never be opened for writing.
//!
//! Both strategies stage the new binary next to the target and rename it into
//! place, so the target path never holds a partially written file.

use crate::utils::fs::set_executable;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

#[cfg(unix)]
const ETXTBSY: i32 = 26;

/// How the live executable gets replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStrategy {
    /// Rename the new binary straight over the target.
    Direct,
    /// Move the target to `<name>.old` first, then put the new binary in place.
    RenameAside,
}

impl ReplaceStrategy {
    /// Picks a strategy by trying to open `path` for writing.
    #[must_use]
    pub fn probe(path: &Path) -> Self {
        if cfg!(windows) {
            return Self::RenameAside;
        }

        match std::fs::OpenOptions::new().write(true).open(path) {
            Ok(_) => Self::Direct,
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(ETXTBSY) => {
                debug!("{} is busy, replacing via rename", path.display());
                Self::RenameAside
            }
            Err(e) => {
                debug!("Probe of {} failed ({}), assuming direct replace", path.display(), e);
                Self::Direct
            }
        }
    }
}

/// Sibling path the live executable is moved to during a rename-aside replace.
#[must_use]
pub fn aside_path(target: &Path) -> PathBuf {
    with_file_suffix(target, ".old")
}

fn staging_path(target: &Path) -> PathBuf {
    with_file_suffix(target, ".new")
}

fn with_file_suffix(path: &Path, suffix: &str) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!("{name}{suffix}"))
}

/// Replaces `target` with a copy of `source` using `strategy`.
///
/// On failure the target is left as it was before the call: under
/// [`ReplaceStrategy::RenameAside`] the aside copy is renamed back.
pub async fn replace_executable(
    source: &Path,
    target: &Path,
    strategy: ReplaceStrategy,
) -> Result<()> {
    match strategy {
        ReplaceStrategy::Direct => stage_and_swap(source, target).await,
        ReplaceStrategy::RenameAside => {
            let aside = aside_path(target);
            if fs::try_exists(&aside).await.unwrap_or(false) {
                // leftover from an earlier run whose image could not be deleted
                let _ = fs::remove_file(&aside).await;
            }

            let had_target = fs::try_exists(target).await.unwrap_or(false);
            if had_target {
                fs::rename(target, &aside).await.with_context(|| {
                    format!("Failed to move {} aside", target.display())
                })?;
            }

            match stage_and_swap(source, target).await {
                Ok(()) => {
                    if had_target && let Err(e) = fs::remove_file(&aside).await {
                        // the old image may still be mapped on Windows
                        debug!("Leaving {} in place: {}", aside.display(), e);
                    }
                    Ok(())
                }
                Err(e) => {
                    if had_target && let Err(restore) = fs::rename(&aside, target).await {
                        warn!(
                            "Failed to move {} back to {}: {}",
                            aside.display(),
                            target.display(),
                            restore
                        );
                    }
                    Err(e)
                }
            }
        }
    }
}

async fn stage_and_swap(source: &Path, target: &Path) -> Result<()> {
    let staged = staging_path(target);

    let result = async {
        fs::copy(source, &staged).await.with_context(|| {
            format!("Failed to copy {} to {}", source.display(), staged.display())
        })?;
        set_executable(&staged).await?;
        fs::rename(&staged, target)
            .await
            .with_context(|| format!("Failed to move new executable into {}", target.display()))
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&staged).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_direct_replace() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("new");
        let target = temp.path().join("delta");
        std::fs::write(&source, b"new").unwrap();
        std::fs::write(&target, b"old").unwrap();

        replace_executable(&source, &target, ReplaceStrategy::Direct).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert!(!staging_path(&target).exists());
    }

    #[tokio::test]
    async fn test_rename_aside_replace_removes_old() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("new");
        let target = temp.path().join("delta");
        std::fs::write(&source, b"new").unwrap();
        std::fs::write(&target, b"old").unwrap();

        replace_executable(&source, &target, ReplaceStrategy::RenameAside).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert!(!aside_path(&target).exists());
    }

    #[tokio::test]
    async fn test_rename_aside_restores_on_failure() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("delta");
        std::fs::write(&target, b"old").unwrap();

        let result = replace_executable(
            &temp.path().join("missing"),
            &target,
            ReplaceStrategy::RenameAside,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(&target).unwrap(), b"old");
        assert!(!aside_path(&target).exists());
    }

    #[test]
    fn test_aside_path() {
        assert_eq!(aside_path(Path::new("/usr/bin/delta")), PathBuf::from("/usr/bin/delta.old"));
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_writable_file_is_direct() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("delta");
        std::fs::write(&target, b"old").unwrap();

        assert_eq!(ReplaceStrategy::probe(&target), ReplaceStrategy::Direct);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_probe_running_image_is_rename_aside() {
        let running = std::env::current_exe().unwrap();
        assert_eq!(ReplaceStrategy::probe(&running), ReplaceStrategy::RenameAside);
    }
}
