//! Release artifact downloads.
//!
//! [`Downloader`] is the seam between the manager and the network for binary
//! assets. [`HttpDownloader`] streams the asset to the download directory with
//! a progress bar, retries transient failures, reuses an already-downloaded
//! file of the right size, and verifies the SHA-256 checksum against the
//! release's published checksum manifest when one exists.

use super::release::{Asset, Release};
use super::verification::ChecksumVerifier;
use crate::constants::{
    DEFAULT_DOWNLOAD_KEEP, DOWNLOAD_TIMEOUT, MAX_BACKOFF_DELAY_MS, NETWORK_RETRY_ATTEMPTS,
    PRODUCT_NAME, STARTING_BACKOFF_DELAY_MS,
};
use crate::utils::fs::{ensure_dir, format_size};
use crate::utils::progress::ProgressBar;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

/// Outcome of downloading one release asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    /// Local path of the downloaded file
    pub file_path: PathBuf,
    /// Release tag the asset belongs to (e.g. `v1.1.0`)
    pub version: String,
    /// Size in bytes
    pub size: u64,
    /// `sha256:<hex>` of the file
    pub checksum: String,
    /// Whether the checksum matched a published checksum manifest
    pub verified: bool,
    /// Time spent downloading (zero when an existing file was reused)
    pub download_time: Duration,
}

/// Fetches a release asset to local disk.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Downloads `asset` of `release` and returns where it landed.
    async fn download(&self, release: &Release, asset: &Asset) -> Result<DownloadResult>;
}

/// Summary of the download directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    /// Directory inspected
    pub download_directory: PathBuf,
    /// Number of files
    pub file_count: usize,
    /// Combined size in bytes
    pub total_size: u64,
}

impl DownloadStats {
    /// Human-readable total size.
    #[must_use]
    pub fn total_size_formatted(&self) -> String {
        format_size(self.total_size)
    }
}

/// HTTP implementation of [`Downloader`].
pub struct HttpDownloader {
    download_dir: PathBuf,
    http: reqwest::Client,
    show_progress: bool,
}

impl HttpDownloader {
    /// Creates a downloader saving into `download_dir`.
    pub fn new(download_dir: impl Into<PathBuf>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("delta-update/{}", env!("CARGO_PKG_VERSION")))
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            download_dir: download_dir.into(),
            http,
            show_progress: true,
        })
    }

    /// Enables or disables the progress bar (disabled for unattended runs).
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Directory downloads are written to.
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    async fn expected_checksum(&self, release: &Release, asset: &Asset) -> Option<String> {
        let manifest_asset = release.checksum_asset()?;
        debug!("Fetching checksums from: {}", manifest_asset.browser_download_url);

        let response = match self.http.get(&manifest_asset.browser_download_url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!("Failed to fetch checksums file: HTTP {}", response.status());
                return None;
            }
            Err(e) => {
                warn!("Failed to fetch checksums file: {}", e);
                return None;
            }
        };

        let content = response.text().await.ok()?;
        ChecksumVerifier::find_in_manifest(&content, &asset.name)
    }

    async fn fetch_to(&self, url: &str, target: &Path, expected_size: u64) -> Result<u64> {
        let partial = target.with_extension("part");

        let result = async {
            let mut response = self
                .http
                .get(url)
                .send()
                .await
                .with_context(|| format!("Failed to request {url}"))?
                .error_for_status()
                .with_context(|| format!("Download of {url} was rejected"))?;

            let total = response.content_length().unwrap_or(expected_size);
            let progress = if self.show_progress {
                ProgressBar::download(total, "Downloading")
            } else {
                ProgressBar::hidden()
            };

            let mut file = tokio::fs::File::create(&partial)
                .await
                .with_context(|| format!("Failed to create {}", partial.display()))?;
            let mut written = 0u64;

            while let Some(chunk) =
                response.chunk().await.with_context(|| format!("Download of {url} interrupted"))?
            {
                file.write_all(&chunk).await.context("Failed to write download chunk")?;
                written += chunk.len() as u64;
                progress.inc(chunk.len() as u64);
            }
            file.flush().await.context("Failed to flush download")?;
            drop(file);

            if expected_size > 0 && written != expected_size {
                progress.abandon_with_message("size mismatch");
                return Err(anyhow!(
                    "Downloaded {written} bytes but the release lists {expected_size}"
                ));
            }

            progress.finish_with_message(format_size(written));
            tokio::fs::rename(&partial, target)
                .await
                .with_context(|| format!("Failed to move download into {}", target.display()))?;
            Ok(written)
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        result
    }

    /// Deletes all but the `keep` most recently modified downloads.
    ///
    /// A `keep` of zero uses the default of 3. Returns how many files were removed.
    pub async fn cleanup_old_downloads(&self, keep: usize) -> Result<usize> {
        let keep = if keep == 0 { DEFAULT_DOWNLOAD_KEEP } else { keep };
        let mut files = list_files(&self.download_dir).await?;
        if files.len() <= keep {
            return Ok(0);
        }

        files.sort_by(|a, b| b.1.cmp(&a.1));
        let mut removed = 0;
        for (path, _, _) in files.into_iter().skip(keep) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove old download {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }

    /// Counts files and bytes in the download directory.
    pub async fn download_stats(&self) -> Result<DownloadStats> {
        let files = list_files(&self.download_dir).await?;
        Ok(DownloadStats {
            download_directory: self.download_dir.clone(),
            file_count: files.len(),
            total_size: files.iter().map(|(_, _, size)| size).sum(),
        })
    }
}

async fn list_files(dir: &Path) -> Result<Vec<(PathBuf, SystemTime, u64)>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((entry.path(), modified, metadata.len()));
        }
    }
    Ok(files)
}

/// Local file name for an asset; never lets a crafted name escape the directory.
fn local_file_name(release: &Release, asset: &Asset) -> String {
    Path::new(&asset.name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && n != "..")
        .unwrap_or_else(|| format!("{PRODUCT_NAME}-{}", release.tag_name))
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, release: &Release, asset: &Asset) -> Result<DownloadResult> {
        let dir = self.download_dir.clone();
        tokio::task::spawn_blocking(move || ensure_dir(&dir))
            .await
            .context("Directory creation task panicked")??;

        let file_path = self.download_dir.join(local_file_name(release, asset));
        let expected = self.expected_checksum(release, asset).await;

        if let Ok(metadata) = tokio::fs::metadata(&file_path).await
            && metadata.is_file()
            && (asset.size == 0 || metadata.len() == asset.size)
        {
            let checksum = ChecksumVerifier::compute_sha256(&file_path).await?;
            let reusable = expected.as_ref().is_none_or(|e| e.eq_ignore_ascii_case(&checksum));
            if reusable {
                info!("Reusing existing download {}", file_path.display());
                return Ok(DownloadResult {
                    file_path,
                    version: release.tag_name.clone(),
                    size: metadata.len(),
                    checksum,
                    verified: expected.is_some(),
                    download_time: Duration::ZERO,
                });
            }
            debug!("Existing download {} is stale, fetching again", file_path.display());
        }

        info!("Downloading {} ({})", asset.name, format_size(asset.size));
        let started = Instant::now();
        let strategy = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS))
            .map(jitter)
            .take(NETWORK_RETRY_ATTEMPTS);
        let size = Retry::spawn(strategy, || {
            self.fetch_to(&asset.browser_download_url, &file_path, asset.size)
        })
        .await?;
        let download_time = started.elapsed();

        let (checksum, verified) = match &expected {
            Some(expected) => match ChecksumVerifier::verify_checksum(&file_path, expected).await {
                Ok(checksum) => (checksum, true),
                Err(e) => {
                    let _ = tokio::fs::remove_file(&file_path).await;
                    return Err(e);
                }
            },
            None => (ChecksumVerifier::compute_sha256(&file_path).await?, false),
        };

        Ok(DownloadResult {
            file_path,
            version: release.tag_name.clone(),
            size,
            checksum,
            verified,
            download_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn release_with(asset_name: &str) -> (Release, Asset) {
        let asset = Asset {
            name: asset_name.to_string(),
            browser_download_url: "http://127.0.0.1:9/unused".to_string(),
            size: 5,
            content_type: None,
        };
        let release = Release {
            tag_name: "v1.1.0".to_string(),
            name: None,
            body: None,
            draft: false,
            prerelease: false,
            published_at: None,
            assets: vec![asset.clone()],
        };
        (release, asset)
    }

    #[test]
    fn test_local_file_name_strips_directories() {
        let (release, asset) = release_with("../../etc/delta.tar.gz");
        assert_eq!(local_file_name(&release, &asset), "delta.tar.gz");

        let (release, asset) = release_with("");
        assert_eq!(local_file_name(&release, &asset), "delta-v1.1.0");
    }

    #[tokio::test]
    async fn test_reuses_existing_file_with_matching_size() {
        let temp = TempDir::new().unwrap();
        let (release, asset) = release_with("delta-linux-amd64");
        std::fs::write(temp.path().join("delta-linux-amd64"), b"hello").unwrap();

        let downloader = HttpDownloader::new(temp.path()).unwrap().with_progress(false);
        let result = downloader.download(&release, &asset).await.unwrap();

        assert_eq!(result.size, 5);
        assert_eq!(result.version, "v1.1.0");
        assert_eq!(result.download_time, Duration::ZERO);
        assert!(!result.verified);
        assert!(result.checksum.starts_with("sha256:"));
    }

    #[tokio::test]
    async fn test_cleanup_old_downloads_keeps_newest() {
        let temp = TempDir::new().unwrap();
        for i in 0..5 {
            let path = temp.path().join(format!("delta-{i}.tar.gz"));
            std::fs::write(&path, b"x").unwrap();
            let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + i * 60);
            std::fs::File::options().write(true).open(&path).unwrap().set_modified(mtime).unwrap();
        }

        let downloader = HttpDownloader::new(temp.path()).unwrap();
        assert_eq!(downloader.cleanup_old_downloads(2).await.unwrap(), 3);

        let mut remaining: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec!["delta-3.tar.gz", "delta-4.tar.gz"]);

        let stats = downloader.download_stats().await.unwrap();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.total_size, 2);
    }

    #[tokio::test]
    async fn test_stats_on_missing_directory() {
        let temp = TempDir::new().unwrap();
        let downloader = HttpDownloader::new(temp.path().join("absent")).unwrap();
        assert_eq!(downloader.download_stats().await.unwrap().file_count, 0);
    }
}
