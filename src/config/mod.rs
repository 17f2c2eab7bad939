//! Configuration
//!
//! Layered configuration for build, mirror and logging runs. Sources are
//! merged by [`merge::service::MergeService`]: serde defaults, then an
//! optional TOML file, then `PKGMIRROR__*` environment variables.

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;

use crate::error::MirrorError;
use crate::logging::LoggingConfig;
use crate::transform::TransformSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream repository access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the upstream repository (`file://` for a local snapshot)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum number of requests in flight
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Extra attempts after a failed fetch
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Initial backoff between attempts, doubled on each retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Index build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Working directory for a build run (None: platform cache dir)
    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,

    /// Published index location (None: platform data dir)
    #[serde(default)]
    pub index_dir: Option<PathBuf>,

    /// Prefix for rewritten `dist.url` values
    #[serde(default = "default_download_url_prefix")]
    pub download_url_prefix: String,

    /// Rewrite package dist/source metadata
    #[serde(default = "default_true")]
    pub parse_packages: bool,

    /// Leave dev versions untouched when rewriting
    #[serde(default = "default_true")]
    pub stable_only: bool,

    /// `notify` template written to the root index (empty: remove the key)
    #[serde(default = "default_notify")]
    pub notify: String,

    /// `notify-batch` URL written to the root index (empty: remove the key)
    #[serde(default = "default_notify_batch")]
    pub notify_batch: String,

    /// First uid handed out in a run
    #[serde(default = "default_uid_start")]
    pub uid_start: u64,

    /// Merge privately hosted packages into the attach points
    #[serde(default)]
    pub attach_private_packages: bool,

    /// JSON document with the privately hosted packages
    #[serde(default)]
    pub private_packages_file: Option<PathBuf>,

    /// Reference names of the provider documents that receive private packages
    #[serde(default = "default_attach_points")]
    pub attach_points: Vec<String>,

    /// Name of the combined private provider file when there is no `providers-url`
    #[serde(default = "default_private_provider_name")]
    pub private_provider_name: String,

    /// Sibling documents rebuilt concurrently
    #[serde(default = "default_child_concurrency")]
    pub child_concurrency: usize,

    /// Keep the working directory after publishing
    #[serde(default)]
    pub keep_work_dir: bool,
}

/// Mirror cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory (None: platform cache dir)
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Serve from cache before going upstream
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Ignore cached digests and fetch everything on sync
    #[serde(default)]
    pub force_full_refresh: bool,

    /// Rewrite package metadata of served documents
    #[serde(default = "default_true")]
    pub serve_transform: bool,

    /// Overlay private packages onto the served root index
    #[serde(default)]
    pub attach_private_packages: bool,
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://packagist.org".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_download_url_prefix() -> String {
    "http://localhost/downloads/".to_string()
}

fn default_notify() -> String {
    "/notify/%package%".to_string()
}

fn default_notify_batch() -> String {
    "/notify/".to_string()
}

fn default_uid_start() -> u64 {
    99_999_999
}

fn default_attach_points() -> Vec<String> {
    vec![
        "p/provider-active$%hash%.json".to_string(),
        "p/providers-active.json".to_string(),
        "p/provider-latest$%hash%.json".to_string(),
        "p/providers-latest.json".to_string(),
    ]
}

fn default_private_provider_name() -> String {
    "p/private-packages.json".to_string()
}

fn default_child_concurrency() -> usize {
    16
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            tmp_dir: None,
            index_dir: None,
            download_url_prefix: default_download_url_prefix(),
            parse_packages: true,
            stable_only: true,
            notify: default_notify(),
            notify_batch: default_notify_batch(),
            uid_start: default_uid_start(),
            attach_private_packages: false,
            private_packages_file: None,
            attach_points: default_attach_points(),
            private_provider_name: default_private_provider_name(),
            child_concurrency: default_child_concurrency(),
            keep_work_dir: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            enabled: true,
            force_full_refresh: false,
            serve_transform: true,
            attach_private_packages: false,
        }
    }
}

impl BuildConfig {
    pub fn transform_settings(&self) -> TransformSettings {
        TransformSettings {
            enabled: self.parse_packages,
            stable_only: self.stable_only,
            download_url_prefix: self.download_url_prefix.clone(),
        }
    }
}

impl MirrorConfig {
    /// Reject configurations that would fail halfway through a run.
    pub fn validate(&self) -> Result<(), MirrorError> {
        let base_url = self.remote.base_url.trim();
        if !(base_url.starts_with("http://")
            || base_url.starts_with("https://")
            || base_url.starts_with("file://"))
        {
            return Err(MirrorError::ConfigError(format!(
                "remote.base_url must be http(s):// or file://, got '{}'",
                base_url
            )));
        }
        if self.remote.max_concurrent_fetches == 0 {
            return Err(MirrorError::ConfigError(
                "remote.max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        if self.remote.timeout_secs == 0 {
            return Err(MirrorError::ConfigError(
                "remote.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.build.child_concurrency == 0 {
            return Err(MirrorError::ConfigError(
                "build.child_concurrency must be at least 1".to_string(),
            ));
        }
        if self.build.parse_packages && self.build.download_url_prefix.trim().is_empty() {
            return Err(MirrorError::ConfigError(
                "build.download_url_prefix is required when build.parse_packages is set"
                    .to_string(),
            ));
        }
        let attaching = self.build.attach_private_packages || self.cache.attach_private_packages;
        if attaching && self.build.private_packages_file.is_none() {
            return Err(MirrorError::ConfigError(
                "build.private_packages_file is required to attach private packages".to_string(),
            ));
        }
        if self.build.private_provider_name.trim().is_empty() {
            return Err(MirrorError::ConfigError(
                "build.private_provider_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
