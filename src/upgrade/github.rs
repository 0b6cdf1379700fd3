//! GitHub Releases implementation of [`ReleaseProvider`].
//!
//! Fetches release metadata from the GitHub REST API with:
//! - a 10 minute response cache keyed by request URL
//! - rate-limit tracking from the `X-RateLimit-*` response headers
//! - optional token authentication (raises the limit from 60 to 5000 requests/hour)
//! - exponential-backoff retries for transient failures (5xx, timeouts, connection errors)

use super::release::{RateLimitStatus, Release, ReleaseProvider};
use crate::constants::{
    GITHUB_ANON_RATE_LIMIT, GITHUB_AUTH_RATE_LIMIT, GITHUB_REQUEST_TIMEOUT, MAX_BACKOFF_DELAY_MS,
    NETWORK_RETRY_ATTEMPTS, RELEASE_CACHE_TTL, STARTING_BACKOFF_DELAY_MS,
};
use crate::core::UpdateError;
use crate::version::{ReleaseChannel, Version};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Failure of a single API request, classified for the retry policy.
#[derive(Debug, Error)]
enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("GitHub API rate limit exceeded")]
    RateLimited,
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

struct CachedResponse {
    fetched_at: Instant,
    body: serde_json::Value,
}

/// Client for one repository's GitHub releases.
pub struct GitHubClient {
    owner: String,
    repo: String,
    api_base: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
    rate_limit: Mutex<RateLimitStatus>,
    cache: Mutex<HashMap<String, CachedResponse>>,
    cache_ttl: Duration,
}

impl GitHubClient {
    /// Creates a client for `owner/repo` against the public GitHub API.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("delta-update/{}", env!("CARGO_PKG_VERSION")))
            .timeout(GITHUB_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            owner: owner.into(),
            repo: repo.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            http,
            token: RwLock::new(None),
            rate_limit: Mutex::new(RateLimitStatus {
                limit: GITHUB_ANON_RATE_LIMIT,
                remaining: GITHUB_ANON_RATE_LIMIT,
                reset_at: None,
                authenticated: false,
            }),
            cache: Mutex::new(HashMap::new()),
            cache_ttl: RELEASE_CACHE_TTL,
        })
    }

    /// Points the client at a different API root (GitHub Enterprise, test servers).
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Drops all cached responses.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    fn releases_url(&self) -> String {
        format!("{}/repos/{}/{}/releases?per_page=30", self.api_base, self.owner, self.repo)
    }

    fn tag_url(&self, tag: &str) -> String {
        format!("{}/repos/{}/{}/releases/tags/{}", self.api_base, self.owner, self.repo, tag)
    }

    fn cached(&self, url: &str) -> Option<serde_json::Value> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(url)
            .filter(|entry| entry.fetched_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.body.clone())
    }

    fn store(&self, url: &str, body: &serde_json::Value) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                url.to_string(),
                CachedResponse {
                    fetched_at: Instant::now(),
                    body: body.clone(),
                },
            );
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        if let Some(body) = self.cached(url) {
            debug!("Release cache hit for {}", url);
            return Ok(body);
        }

        let strategy = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS))
            .map(jitter)
            .take(NETWORK_RETRY_ATTEMPTS);

        let body =
            RetryIf::spawn(strategy, || self.request(url), FetchError::is_transient).await?;
        self.store(url, &body);
        Ok(body)
    }

    async fn request(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        {
            let status = self.get_rate_limit_status();
            if status.remaining == 0
                && status.reset_at.is_some_and(|reset| reset > Utc::now())
            {
                return Err(FetchError::RateLimited);
            }
        }

        let mut request = self.http.get(url).header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = self.token.read().ok().and_then(|t| t.clone()) {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        debug!("GET {}", url);
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                FetchError::Transient(format!("request to {url} failed: {e}"))
            } else {
                FetchError::Fatal(format!("request to {url} failed: {e}"))
            }
        })?;

        self.update_rate_limit(response.headers());

        let status = response.status();
        match status {
            s if s.is_success() => response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| FetchError::Fatal(format!("invalid JSON from {url}: {e}"))),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(url.to_string())),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
                if self.get_rate_limit_status().remaining == 0 =>
            {
                warn!("GitHub API rate limit exhausted");
                Err(FetchError::RateLimited)
            }
            s if s.is_server_error() => {
                Err(FetchError::Transient(format!("GitHub API returned {s} for {url}")))
            }
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(FetchError::Fatal(format!("GitHub API returned {s} for {url}: {body}")))
            }
        }
    }

    fn update_rate_limit(&self, headers: &HeaderMap) {
        let header = |name: &str| -> Option<i64> {
            headers.get(name).and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok())
        };

        if let Ok(mut status) = self.rate_limit.lock() {
            if let Some(limit) = header("x-ratelimit-limit") {
                status.limit = u32::try_from(limit).unwrap_or(status.limit);
            }
            if let Some(remaining) = header("x-ratelimit-remaining") {
                status.remaining = u32::try_from(remaining).unwrap_or(0);
            }
            if let Some(reset) = header("x-ratelimit-reset") {
                status.reset_at = DateTime::from_timestamp(reset, 0);
            }
        }
    }
}

/// Picks the newest non-draft release eligible for `channel`.
///
/// The stable channel additionally ignores releases the host flags as
/// prereleases even when their tag looks like a plain version.
#[must_use]
pub fn pick_latest_release(releases: &[Release], channel: &ReleaseChannel) -> Option<Release> {
    releases
        .iter()
        .filter(|release| !release.draft)
        .filter(|release| !(matches!(channel, ReleaseChannel::Stable) && release.prerelease))
        .filter_map(|release| Version::from_tag(&release.tag_name).ok().map(|v| (v, release)))
        .filter(|(version, _)| channel.matches(version))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, release)| release.clone())
}

fn into_update_error(err: FetchError) -> anyhow::Error {
    UpdateError::ReleaseFetch {
        reason: err.to_string(),
    }
    .into()
}

#[async_trait]
impl ReleaseProvider for GitHubClient {
    async fn get_latest_release(&self, channel: &ReleaseChannel) -> Result<Release> {
        let body = self.get_json(&self.releases_url()).await.map_err(into_update_error)?;
        let releases: Vec<Release> =
            serde_json::from_value(body).context("Failed to decode release list")?;

        pick_latest_release(&releases, channel).ok_or_else(|| {
            UpdateError::ReleaseFetch {
                reason: format!("no releases found for channel '{channel}'"),
            }
            .into()
        })
    }

    async fn get_release_by_tag(&self, tag: &str) -> Result<Release> {
        let mut candidates = vec![tag.to_string()];
        if !tag.starts_with('v') {
            candidates.push(format!("v{tag}"));
        }

        let mut last_error = None;
        for candidate in candidates {
            match self.get_json(&self.tag_url(&candidate)).await {
                Ok(body) => {
                    return serde_json::from_value(body)
                        .with_context(|| format!("Failed to decode release {candidate}"));
                }
                Err(err @ FetchError::NotFound(_)) => last_error = Some(err),
                Err(err) => return Err(into_update_error(err)),
            }
        }

        Err(UpdateError::ReleaseFetch {
            reason: format!(
                "release {tag} not found ({})",
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ),
        }
        .into())
    }

    fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limit.lock().map(|s| s.clone()).unwrap_or(RateLimitStatus {
            limit: GITHUB_ANON_RATE_LIMIT,
            remaining: 0,
            reset_at: None,
            authenticated: false,
        })
    }

    fn set_token(&self, token: Option<String>) {
        let token = token.filter(|t| !t.trim().is_empty());
        let authenticated = token.is_some();

        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
        if let Ok(mut status) = self.rate_limit.lock() {
            status.authenticated = authenticated;
            status.limit =
                if authenticated { GITHUB_AUTH_RATE_LIMIT } else { GITHUB_ANON_RATE_LIMIT };
            status.remaining = status.limit;
            status.reset_at = None;
        }
        self.clear_cache();
    }
}
