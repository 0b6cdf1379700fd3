//! Release artifact extraction.
//!
//! Artifacts are either `.tar.gz`/`.tgz` archives, `.zip` archives, or a raw
//! executable. Extraction is synchronous and is expected to run on a blocking
//! thread; the installer wraps it in `spawn_blocking`.

use crate::constants::PRODUCT_NAME;
use crate::core::UpdateError;
use crate::utils::fs::ensure_dir;
use crate::utils::platform::Platform;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Container format of a downloaded artifact, decided by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// gzip-compressed tarball
    TarGz,
    /// zip archive
    Zip,
    /// bare executable
    Raw,
}

impl ArchiveKind {
    /// Classifies `path` by its extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::TarGz
        } else if name.ends_with(".zip") {
            Self::Zip
        } else {
            Self::Raw
        }
    }
}

/// Decides which extracted file is the executable to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMatcher {
    product: String,
}

impl Default for ArtifactMatcher {
    fn default() -> Self {
        Self::new(PRODUCT_NAME)
    }
}

impl ArtifactMatcher {
    /// Matcher for executables of `product`.
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
        }
    }

    /// Whether `name` looks like the product executable on `platform`.
    ///
    /// A basename containing the product name always matches. Otherwise an
    /// extensionless file matches off Windows and an `.exe` matches on Windows.
    #[must_use]
    pub fn matches(&self, name: &str, platform: &Platform) -> bool {
        let base = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if base.is_empty() {
            return false;
        }
        if base.contains(&self.product) {
            return true;
        }

        looks_executable(&base, platform)
    }

    /// Finds the executable under `dir`.
    ///
    /// Preference order: a product-named file that looks executable (no
    /// extension, or `.exe` on Windows), then any other product-named file
    /// such as `delta.bash`, then any executable-looking file. Ties go to the
    /// first in file-name order.
    #[must_use]
    pub fn find_binary(&self, dir: &Path, platform: &Platform) -> Option<PathBuf> {
        let mut best: Option<(u8, PathBuf)> = None;

        for entry in WalkDir::new(dir).sort_by_file_name().into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !self.matches(&name, platform) {
                continue;
            }
            let rank = match (name.contains(&self.product), looks_executable(&name, platform)) {
                (true, true) => 0,
                (true, false) => 1,
                (false, _) => 2,
            };
            if rank == 0 {
                return Some(entry.into_path());
            }
            if best.as_ref().is_none_or(|(best_rank, _)| rank < *best_rank) {
                best = Some((rank, entry.into_path()));
            }
        }

        best.map(|(_, path)| path)
    }
}

fn looks_executable(base: &str, platform: &Platform) -> bool {
    if platform.is_windows() {
        base.to_ascii_lowercase().ends_with(".exe")
    } else {
        Path::new(base).extension().is_none()
    }
}

/// Product-named or platform-executable check using the default product.
#[must_use]
pub fn is_expected_artifact(name: &str, platform: &Platform) -> bool {
    ArtifactMatcher::default().matches(name, platform)
}

/// Extracts `archive` into `dest` and returns the path of the executable found.
///
/// # Errors
///
/// Fails when the archive cannot be read, and with
/// [`UpdateError::NoBinaryInArchive`] when nothing in it matches `matcher`.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    matcher: &ArtifactMatcher,
    platform: &Platform,
) -> Result<PathBuf> {
    ensure_dir(dest)?;
    let kind = ArchiveKind::from_path(archive);
    debug!("Extracting {} as {:?} into {}", archive.display(), kind, dest.display());

    match kind {
        ArchiveKind::TarGz => extract_tar_gz(archive, dest)?,
        ArchiveKind::Zip => extract_zip(archive, dest)?,
        ArchiveKind::Raw => {
            let target = dest.join(format!("{}{}", matcher.product, platform.exe_suffix()));
            std::fs::copy(archive, &target)
                .with_context(|| format!("Failed to copy {}", archive.display()))?;
        }
    }

    matcher.find_binary(dest, platform).ok_or_else(|| {
        UpdateError::NoBinaryInArchive {
            archive: archive.display().to_string(),
        }
        .into()
    })
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file =
        File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let gz = flate2::read::GzDecoder::new(BufReader::new(file));
    let mut tarball = tar::Archive::new(gz);
    tarball.set_preserve_permissions(true);

    // unpack refuses entries that would land outside dest
    tarball
        .unpack(dest)
        .with_context(|| format!("Failed to extract tar archive {}", archive.display()))
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file =
        File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Failed to read zip archive {}", archive.display()))?;

    zip.extract(dest)
        .with_context(|| format!("Failed to extract zip archive {}", archive.display()))
}
