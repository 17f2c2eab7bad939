//! Index documents
//!
//! The repository index is a tree of JSON documents: the root index refers
//! to provider documents, which refer to package documents. Every kind
//! implements [`IndexDocument`]; the rename-on-write and hash propagation
//! they share lives in [`engine`].

pub mod engine;
pub mod package;
pub mod provider;
pub mod root;

pub use package::PackageDocument;
pub use provider::ProviderDocument;
pub use root::RootIndexDocument;

use crate::concurrency::{CancelFlag, Turn};
use crate::config::BuildConfig;
use crate::error::MirrorError;
use crate::hash::ShaMethod;
use crate::private::PrivatePackages;
use crate::store::DocumentStore;
use crate::transform::{TransformSettings, TransformStats, UidCounter};
use crate::types::HexDigest;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Build-side lifecycle of one document. A document value exists only once
/// it has been loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Loaded,
    ChildrenRebuilt,
    SelfHashed,
    Persisted,
}

/// A node of the index tree that can be rebuilt and written back.
#[async_trait]
pub trait IndexDocument: Send {
    /// Current logical name
    fn name(&self) -> &str;

    fn state(&self) -> DocumentState;

    /// Rebuild children (post-order) and rewrite own content. Uids are
    /// assigned only while `turn` is due.
    async fn rebuild(&mut self, ctx: &BuildContext, turn: Turn) -> Result<(), MirrorError>;

    /// Write the document under its final name and report where it went.
    fn finalize(&mut self, ctx: &BuildContext) -> Result<Persisted, MirrorError>;
}

/// `{ "<name>": { "<method>": "<digest>" } }` entry held by a parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Key in the parent map; may contain `%hash%` (and for `providers-url` children, is the package name)
    pub name: String,
    pub sha_method: ShaMethod,
    pub declared_hash: HexDigest,
}

impl Reference {
    pub fn new(name: impl Into<String>, sha_method: ShaMethod, declared_hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sha_method,
            declared_hash: declared_hash.into(),
        }
    }

    /// Parse one map entry. The first `method: digest` pair wins.
    pub fn parse(name: &str, value: &Value) -> Result<Self, MirrorError> {
        let Value::Object(entry) = value else {
            return Err(MirrorError::invalid(
                name,
                "reference entry must be an object of {method: digest}",
            ));
        };
        let Some((method, hash)) = entry.iter().next() else {
            return Err(MirrorError::invalid(name, "reference entry has no digest"));
        };
        let sha_method: ShaMethod = method.parse()?;
        let declared_hash = hash
            .as_str()
            .ok_or_else(|| MirrorError::invalid(name, "reference digest must be a string"))?;
        Ok(Self::new(name, sha_method, declared_hash))
    }

    pub fn to_value(&self) -> Value {
        let mut entry = Map::new();
        entry.insert(
            self.sha_method.as_str().to_string(),
            Value::String(self.declared_hash.clone()),
        );
        Value::Object(entry)
    }
}

/// Parse every entry of the reference map stored under `key`.
///
/// A missing key or an empty list (`[]`) means no references.
pub fn parse_references(
    document: &str,
    content: &Map<String, Value>,
    key: &str,
) -> Result<Vec<Reference>, MirrorError> {
    match content.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) if items.is_empty() => Ok(Vec::new()),
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(name, value)| Reference::parse(name, value))
            .collect(),
        Some(_) => Err(MirrorError::invalid(
            document,
            format!("'{}' must be a map of references", key),
        )),
    }
}

/// Where a finalized document ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persisted {
    pub name: String,
    pub path: PathBuf,
    pub digest: HexDigest,
    /// Previous file, still on disk until the parent has been written
    pub stale: Option<PathBuf>,
}

/// Fixed settings of one build run
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub transform: TransformSettings,
    pub notify: String,
    pub notify_batch: String,
    pub attach_points: Vec<String>,
    pub private_provider_name: String,
    pub child_concurrency: usize,
}

impl BuildSettings {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            transform: config.transform_settings(),
            notify: config.notify.clone(),
            notify_batch: config.notify_batch.clone(),
            attach_points: config.attach_points.clone(),
            private_provider_name: config.private_provider_name.clone(),
            child_concurrency: config.child_concurrency.max(1),
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self::from_config(&BuildConfig::default())
    }
}

/// Counters collected while a run progresses
#[derive(Debug, Default)]
pub struct BuildStats {
    persisted: AtomicUsize,
    renamed: AtomicUsize,
    versions_rewritten: AtomicUsize,
    uids_assigned: AtomicUsize,
    private_attached: AtomicUsize,
}

/// Point-in-time copy of [`BuildStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub persisted: usize,
    pub renamed: usize,
    pub versions_rewritten: usize,
    pub uids_assigned: usize,
    pub private_attached: usize,
}

impl BuildStats {
    pub fn record_persisted(&self, renamed: bool) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
        if renamed {
            self.renamed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_transform(&self, stats: TransformStats) {
        self.versions_rewritten
            .fetch_add(stats.rewritten, Ordering::Relaxed);
        self.uids_assigned
            .fetch_add(stats.uids_assigned, Ordering::Relaxed);
    }

    pub fn record_private(&self, count: usize) {
        self.private_attached.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BuildSummary {
        BuildSummary {
            persisted: self.persisted.load(Ordering::Relaxed),
            renamed: self.renamed.load(Ordering::Relaxed),
            versions_rewritten: self.versions_rewritten.load(Ordering::Relaxed),
            uids_assigned: self.uids_assigned.load(Ordering::Relaxed),
            private_attached: self.private_attached.load(Ordering::Relaxed),
        }
    }
}

/// Everything a document needs while it is rebuilt
pub struct BuildContext {
    pub store: DocumentStore,
    pub settings: BuildSettings,
    pub uids: UidCounter,
    pub cancel: CancelFlag,
    /// Set when private packages are attached in this run
    pub private: Option<PrivatePackages>,
    pub stats: BuildStats,
}

impl BuildContext {
    pub fn new(store: DocumentStore, settings: BuildSettings, uid_start: u64, cancel: CancelFlag) -> Self {
        Self {
            store,
            settings,
            uids: UidCounter::new(uid_start),
            cancel,
            private: None,
            stats: BuildStats::default(),
        }
    }

    pub fn with_private_packages(mut self, private: PrivatePackages) -> Self {
        self.private = Some(private);
        self
    }

    /// Whether the document referenced as `reference_name` receives private packages.
    pub fn is_attach_point(&self, reference_name: &str) -> bool {
        self.settings
            .attach_points
            .iter()
            .any(|point| point == reference_name)
    }
}
