//! Remote repository access
//!
//! [`RemoteSource`] is the seam between the index code and the upstream
//! repository. `HttpSource` issues HTTP GETs relative to a base URL with a
//! per-request timeout, a concurrency bound and bounded retries.
//! `DirectorySource` serves the same protocol from a local directory.

use crate::concurrency::FetchLimiter;
use crate::config::RemoteConfig;
use crate::error::MirrorError;
use crate::template;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fetches raw document bytes by path relative to the repository base.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, MirrorError>;

    /// Human readable location of `path`, used in logs and errors.
    fn describe(&self, path: &str) -> String;
}

/// Retry behaviour for failed fetches
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 0,
            backoff: Duration::from_millis(250),
        }
    }
}

/// HTTP upstream (Packagist or any Composer repository)
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    limiter: FetchLimiter,
    retry: RetryPolicy,
}

impl HttpSource {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        limiter: FetchLimiter,
        retry: RetryPolicy,
    ) -> Result<Self, MirrorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("pkgmirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MirrorError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        let mut base_url = base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            client,
            base_url,
            limiter,
            retry,
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self, MirrorError> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
            FetchLimiter::new(config.max_concurrent_fetches),
            RetryPolicy {
                attempts: config.retry_attempts,
                backoff: Duration::from_millis(config.retry_backoff_ms),
            },
        )
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    /// One GET. Connect errors, timeouts and 5xx responses come back
    /// retryable; any other status fails for good.
    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, MirrorError> {
        let _permit = self.limiter.acquire().await?;
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                MirrorError::transient_fetch(url, e)
            } else {
                MirrorError::fetch(url, e)
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(MirrorError::transient_fetch(url, format!("HTTP {}", status)));
        }
        if status != reqwest::StatusCode::OK {
            return Err(MirrorError::fetch(url, format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| MirrorError::transient_fetch(url, e))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, MirrorError> {
        let url = self.url_for(path);
        let mut attempt = 0;
        loop {
            match self.fetch_once(&url).await {
                Ok(body) => {
                    debug!(url = %url, bytes = body.len(), "Fetched document");
                    return Ok(body);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.attempts => {
                    attempt += 1;
                    let delay = self.retry.backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(url = %url, attempt, error = %err, "Fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn describe(&self, path: &str) -> String {
        self.url_for(path)
    }
}

/// Upstream laid out on the local filesystem (e.g. a synced snapshot)
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RemoteSource for DirectorySource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, MirrorError> {
        let full = self.root.join(template::relative_path(path)?);
        tokio::fs::read(&full)
            .await
            .map_err(|e| MirrorError::fetch(full.display().to_string(), e))
    }

    fn describe(&self, path: &str) -> String {
        self.root.join(path).display().to_string()
    }
}

/// Pick the source implementation for a configured base URL.
pub fn source_from_config(config: &RemoteConfig) -> Result<Arc<dyn RemoteSource>, MirrorError> {
    if let Some(dir) = config.base_url.strip_prefix("file://") {
        return Ok(Arc::new(DirectorySource::new(dir)));
    }
    Ok(Arc::new(HttpSource::from_config(config)?))
}
