//! Error types for index building and mirroring.
//!
//! `StorageError` covers disk-level failures and always carries the path that
//! failed. `MirrorError` is the crate-wide error; every fatal condition of a
//! build or sync run is one of its variants.

use std::path::PathBuf;
use thiserror::Error;

/// Disk-level failures
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StorageError {
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Read {
            path: path.into(),
            source,
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Write {
            path: path.into(),
            source,
        }
    }

    pub fn remove(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Remove {
            path: path.into(),
            source,
        }
    }

    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::CreateDir {
            path: path.into(),
            source,
        }
    }
}

/// Crate-wide error
#[derive(Error, Debug)]
pub enum MirrorError {
    /// No local file and no remote to fetch it from.
    #[error("Document not found locally and no remote source configured: {path}")]
    MissingSource { path: PathBuf },

    /// Non-200 response, network error or timeout. `retryable` is set for
    /// connect errors, timeouts and 5xx responses.
    #[error("Fetch failed for {url}: {reason}")]
    FetchFailure {
        url: String,
        reason: String,
        retryable: bool,
    },

    /// The document is not valid JSON (or not a JSON object).
    #[error("Failed to parse {path}: {reason}")]
    ParseFailure { path: String, reason: String },

    /// The document parsed but does not have the expected shape.
    #[error("Invalid document {path}: {reason}")]
    InvalidDocument { path: String, reason: String },

    #[error("Unsupported hash method: {0} (expected sha1 or sha256)")]
    HashMethodUnsupported(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<config::ConfigError> for MirrorError {
    fn from(err: config::ConfigError) -> Self {
        MirrorError::ConfigError(err.to_string())
    }
}

impl MirrorError {
    /// Fetch failure that a second attempt will not fix (404, bad URL).
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        MirrorError::FetchFailure {
            url: url.into(),
            reason: reason.to_string(),
            retryable: false,
        }
    }

    /// Fetch failure that may go away (connect error, timeout, 5xx).
    pub fn transient_fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        MirrorError::FetchFailure {
            url: url.into(),
            reason: reason.to_string(),
            retryable: true,
        }
    }

    pub fn parse(path: impl Into<String>, reason: impl ToString) -> Self {
        MirrorError::ParseFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid(path: impl Into<String>, reason: impl ToString) -> Self {
        MirrorError::InvalidDocument {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that may succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MirrorError::FetchFailure { retryable: true, .. })
    }
}
