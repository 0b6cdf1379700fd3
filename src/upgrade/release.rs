//! Release metadata and the release provider seam.
//!
//! [`ReleaseProvider`] is the boundary between update policy and the network.
//! The checker and manager only ever talk to this trait; the production
//! implementation is [`GitHubClient`](super::github::GitHubClient) and tests
//! use an in-memory fake.

use crate::core::UpdateError;
use crate::utils::platform::Platform;
use crate::version::ReleaseChannel;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A published release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Git tag the release was cut from (e.g. `v1.4.2`)
    pub tag_name: String,
    /// Human-readable title
    #[serde(default)]
    pub name: Option<String>,
    /// Release notes (markdown)
    #[serde(default)]
    pub body: Option<String>,
    /// Marked as a draft on the release host
    #[serde(default)]
    pub draft: bool,
    /// Marked as a prerelease on the release host
    #[serde(default)]
    pub prerelease: bool,
    /// Publication time
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    /// Downloadable files
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl Release {
    /// Finds an asset by exact name.
    #[must_use]
    pub fn asset_named(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.name == name)
    }

    /// Finds a published checksum manifest (`checksums.txt`, `SHA256SUMS`, ...).
    #[must_use]
    pub fn checksum_asset(&self) -> Option<&Asset> {
        self.assets.iter().find(|a| {
            let name = a.name.to_ascii_lowercase();
            name == "checksums.txt" || name == "sha256sums" || name == "sha256sums.txt"
        })
    }

    /// First paragraph of the release notes, capped at `max_chars`.
    #[must_use]
    pub fn condensed_notes(&self, max_chars: usize) -> String {
        let body = self.body.as_deref().unwrap_or_default().trim();
        let first = body.split("\n\n").next().unwrap_or_default().trim();
        if first.chars().count() <= max_chars {
            first.to_string()
        } else {
            let cut: String = first.chars().take(max_chars.saturating_sub(3)).collect();
            format!("{}...", cut.trim_end())
        }
    }
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// File name
    pub name: String,
    /// Direct download URL
    pub browser_download_url: String,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
    /// MIME type reported by the host
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Snapshot of the provider's API quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// Requests allowed per window
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the window resets, if known
    pub reset_at: Option<DateTime<Utc>>,
    /// Whether requests carry an auth token
    pub authenticated: bool,
}

/// Source of release metadata.
#[async_trait]
pub trait ReleaseProvider: Send + Sync {
    /// Latest non-draft release eligible for `channel`.
    async fn get_latest_release(&self, channel: &ReleaseChannel) -> Result<Release>;

    /// Release for an exact tag. Implementations also try the `v`-prefixed form.
    async fn get_release_by_tag(&self, tag: &str) -> Result<Release>;

    /// Picks the asset to download for `platform`.
    fn select_asset_for_platform(&self, assets: &[Asset], platform: &Platform) -> Result<Asset> {
        select_asset(assets, platform)
    }

    /// Current API quota.
    fn get_rate_limit_status(&self) -> RateLimitStatus;

    /// Sets or clears the auth token used for API requests.
    fn set_token(&self, token: Option<String>);
}

/// Scores `assets` against `platform` and returns the best match.
///
/// OS match +10, architecture match +5, archive formats +2, and names that
/// look like source bundles -10. Non-positive scores never match.
///
/// # Errors
///
/// [`UpdateError::NoMatchingAsset`] when `assets` is empty or nothing scores above zero.
pub fn select_asset(assets: &[Asset], platform: &Platform) -> Result<Asset> {
    assets
        .iter()
        .filter(|asset| !is_checksum_name(&asset.name))
        .map(|asset| (score_asset(&asset.name, platform), asset))
        .filter(|(score, _)| *score > 0)
        // max_by_key keeps the last maximum; reverse so earlier assets win ties
        .rev()
        .max_by_key(|(score, _)| *score)
        .map(|(_, asset)| asset.clone())
        .ok_or_else(|| {
            UpdateError::NoMatchingAsset {
                platform: platform.to_string(),
            }
            .into()
        })
}

fn score_asset(name: &str, platform: &Platform) -> i32 {
    let name = name.to_ascii_lowercase();
    let mut score = 0;

    if platform.os_aliases().iter().any(|alias| name.contains(alias)) {
        score += 10;
    }
    if platform.arch_aliases().iter().any(|alias| name.contains(alias)) {
        score += 5;
    }
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".zip") {
        score += 2;
    }
    if name.contains("source") || name.contains("src") {
        score -= 10;
    }

    score
}

fn is_checksum_name(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.ends_with(".sha256") || name.contains("checksums") || name.contains("sha256sums")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.to_string(),
            browser_download_url: format!("https://example.com/{name}"),
            size: 100,
            content_type: None,
        }
    }

    fn typical_assets() -> Vec<Asset> {
        vec![
            asset("delta-v1.1.0-source.tar.gz"),
            asset("delta-v1.1.0-darwin-arm64.tar.gz"),
            asset("delta-v1.1.0-linux-amd64.tar.gz"),
            asset("delta-v1.1.0-linux-arm64.tar.gz"),
            asset("delta-v1.1.0-windows-amd64.zip"),
            asset("checksums.txt"),
        ]
    }

    #[test]
    fn test_selects_linux_x86_64() {
        let chosen = select_asset(&typical_assets(), &Platform::new("linux", "x86_64")).unwrap();
        assert_eq!(chosen.name, "delta-v1.1.0-linux-amd64.tar.gz");
    }

    #[test]
    fn test_selects_macos_aarch64() {
        let chosen = select_asset(&typical_assets(), &Platform::new("macos", "aarch64")).unwrap();
        assert_eq!(chosen.name, "delta-v1.1.0-darwin-arm64.tar.gz");
    }

    #[test]
    fn test_selects_windows_zip() {
        let chosen = select_asset(&typical_assets(), &Platform::new("windows", "x86_64")).unwrap();
        assert_eq!(chosen.name, "delta-v1.1.0-windows-amd64.zip");
    }

    #[test]
    fn test_empty_assets_is_error() {
        let err = select_asset(&[], &Platform::new("linux", "x86_64")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::NoMatchingAsset { .. })
        ));
    }

    #[test]
    fn test_source_only_is_error() {
        let assets = vec![asset("delta-source.tar.gz"), asset("checksums.txt")];
        assert!(select_asset(&assets, &Platform::new("linux", "x86_64")).is_err());
    }

    #[test]
    fn test_release_json_from_github_shape() {
        let json = r#"{
            "tag_name": "v1.1.0",
            "name": "Delta 1.1.0",
            "body": "Faster startup.\n\nDetails follow.",
            "draft": false,
            "prerelease": false,
            "published_at": "2024-05-01T09:30:00Z",
            "assets": [{"name": "delta-linux-amd64.tar.gz",
                        "browser_download_url": "https://example.com/a",
                        "size": 42, "content_type": "application/gzip",
                        "download_count": 3}],
            "html_url": "https://example.com/release"
        }"#;
        let release: Release = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag_name, "v1.1.0");
        assert_eq!(release.assets[0].size, 42);
        assert_eq!(release.condensed_notes(200), "Faster startup.");
        assert!(release.checksum_asset().is_none());
    }

    #[test]
    fn test_condensed_notes_truncates() {
        let release = Release {
            tag_name: "v1.0.0".to_string(),
            name: None,
            body: Some("a".repeat(50)),
            draft: false,
            prerelease: false,
            published_at: None,
            assets: vec![],
        };
        let notes = release.condensed_notes(10);
        assert_eq!(notes.chars().count(), 10);
        assert!(notes.ends_with("..."));
    }
}
