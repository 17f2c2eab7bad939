//! Mirror cache
//!
//! Read-side counterpart of the index builder. A sync walks the upstream
//! tree from the root index and fetches only the documents whose declared
//! digest differs from the digest of the cached copy. Serving reads from
//! the cache, fetches through on a miss, and can rewrite package metadata
//! and overlay the private packages on the way out.

pub mod driver;

pub use driver::{CacheDriver, FileCacheDriver};

use crate::concurrency::CancelFlag;
use crate::config::paths::xdg_root;
use crate::config::MirrorConfig;
use crate::document::{parse_references, Reference};
use crate::error::MirrorError;
use crate::hash::{self, ShaMethod};
use crate::private::PrivatePackages;
use crate::remote::RemoteSource;
use crate::stability::parse_stability;
use crate::store::parse_content;
use crate::template::{self, Substitutions};
use crate::transform::{self, TransformSettings};
use crate::types::{HexDigest, ROOT_INDEX};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Behaviour of a [`MirrorCache`]
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    /// Serve from the cache before going upstream
    pub enabled: bool,
    /// Ignore cached digests on sync
    pub force_full_refresh: bool,
    /// Metadata rewrite applied to served documents
    pub serve_transform: Option<TransformSettings>,
    /// Hide dev versions from package lookups
    pub stable_only: bool,
    /// Documents synced concurrently per sibling set
    pub concurrency: usize,
}

impl MirrorSettings {
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            enabled: config.cache.enabled,
            force_full_refresh: config.cache.force_full_refresh,
            serve_transform: config
                .cache
                .serve_transform
                .then(|| config.build.transform_settings()),
            stable_only: config.build.stable_only,
            concurrency: config.remote.max_concurrent_fetches.max(1),
        }
    }
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self::from_config(&MirrorConfig::default())
    }
}

/// Failed document of a sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub name: String,
    pub reason: String,
}

/// Outcome of a sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub skipped: usize,
    pub failed: Vec<SyncFailure>,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.fetched += other.fetched;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }

    fn failure(name: &str, err: &MirrorError) -> Self {
        warn!(document = name, error = %err, "Keeping previously cached copy");
        Self {
            failed: vec![SyncFailure {
                name: name.to_string(),
                reason: err.to_string(),
            }],
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What a synced document contains
#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeKind {
    /// Leaf holding package metadata
    Packages,
    /// `providers` map; children located through `providers_url` if set
    Providers { providers_url: Option<String> },
}

/// One referenced document to sync
#[derive(Debug, Clone)]
struct SyncNode {
    /// File named by the reference
    name: String,
    /// Name of the node across versions; keeps `%hash%` unresolved
    logical: String,
    reference: Reference,
    kind: NodeKind,
}

impl SyncNode {
    fn from_key(reference: Reference, kind: NodeKind) -> Self {
        Self::resolved(reference.name.clone(), reference, kind)
    }

    fn child_of(providers_url: Option<&str>, reference: Reference) -> Self {
        match providers_url {
            Some(url) => {
                let logical =
                    template::resolve(url, &Substitutions::new().package(&reference.name));
                Self::resolved(logical, reference, NodeKind::Packages)
            }
            None => Self::from_key(reference, NodeKind::Packages),
        }
    }

    fn resolved(logical: String, reference: Reference, kind: NodeKind) -> Self {
        let name = template::resolve(
            &logical,
            &Substitutions::new().hash(&reference.declared_hash),
        );
        Self {
            name,
            logical,
            reference,
            kind,
        }
    }
}

/// Cached mirror of an upstream repository
pub struct MirrorCache {
    driver: Arc<dyn CacheDriver>,
    remote: Arc<dyn RemoteSource>,
    settings: MirrorSettings,
    private: Option<PrivatePackages>,
    cancel: CancelFlag,
}

impl MirrorCache {
    pub fn new(
        driver: Arc<dyn CacheDriver>,
        remote: Arc<dyn RemoteSource>,
        settings: MirrorSettings,
    ) -> Self {
        Self {
            driver,
            remote,
            settings,
            private: None,
            cancel: CancelFlag::new(),
        }
    }

    /// Cache below the configured (or default) cache directory.
    pub fn from_config(
        config: &MirrorConfig,
        remote: Arc<dyn RemoteSource>,
        cancel: CancelFlag,
    ) -> Result<Self, MirrorError> {
        let dir = match &config.cache.dir {
            Some(dir) => dir.clone(),
            None => xdg_root::default_cache_dir()?,
        };
        let driver = Arc::new(FileCacheDriver::new(dir)?);
        let mut cache = Self::new(driver, remote, MirrorSettings::from_config(config))
            .with_cancel_flag(cancel);
        if config.cache.attach_private_packages {
            if let Some(path) = &config.build.private_packages_file {
                cache = cache.with_private_packages(PrivatePackages::load(path)?);
            }
        }
        Ok(cache)
    }

    pub fn with_private_packages(mut self, private: PrivatePackages) -> Self {
        self.private = Some(private);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &MirrorSettings {
        &self.settings
    }

    /// Sync with the configured refresh mode.
    pub async fn sync(&self) -> Result<SyncReport, MirrorError> {
        self.sync_with(self.settings.force_full_refresh).await
    }

    /// Fetch the root index and every referenced document whose cached
    /// digest differs from the declared one (all of them with `force`).
    ///
    /// Failure to fetch the root is an error. Failures below the root are
    /// reported and leave the previously cached copy in place.
    pub async fn sync_with(&self, force: bool) -> Result<SyncReport, MirrorError> {
        self.cancel.check()?;
        let bytes = self.remote.fetch(ROOT_INDEX).await?;
        let root = parse_content(ROOT_INDEX, &bytes)?;
        self.driver.add_file(ROOT_INDEX, &bytes)?;

        let providers_url = root
            .get("providers-url")
            .and_then(Value::as_str)
            .map(template::normalize_providers_url)
            .filter(|url| !url.is_empty());

        let mut nodes = Vec::new();
        for reference in parse_references(ROOT_INDEX, &root, "includes")? {
            nodes.push(SyncNode::from_key(reference, NodeKind::Packages));
        }
        for reference in parse_references(ROOT_INDEX, &root, "provider-includes")? {
            let kind = NodeKind::Providers {
                providers_url: providers_url.clone(),
            };
            nodes.push(SyncNode::from_key(reference, kind));
        }
        for reference in parse_references(ROOT_INDEX, &root, "providers-includes")? {
            let kind = NodeKind::Providers {
                providers_url: None,
            };
            nodes.push(SyncNode::from_key(reference, kind));
        }

        let mut report = SyncReport {
            fetched: 1,
            ..SyncReport::default()
        };
        report.merge(self.sync_nodes(nodes, force).await?);

        info!(
            fetched = report.fetched,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Mirror sync finished"
        );
        Ok(report)
    }

    async fn sync_nodes(&self, nodes: Vec<SyncNode>, force: bool) -> Result<SyncReport, MirrorError> {
        let reports: Vec<SyncReport> = stream::iter(nodes)
            .map(|node| self.sync_node(node, force))
            .buffer_unordered(self.settings.concurrency)
            .try_collect()
            .await?;
        let mut total = SyncReport::default();
        for report in reports {
            total.merge(report);
        }
        Ok(total)
    }

    /// Only cancellation is returned as an error; everything else is reported.
    fn sync_node(&self, node: SyncNode, force: bool) -> BoxFuture<'_, Result<SyncReport, MirrorError>> {
        async move {
            self.cancel.check()?;

            if !force {
                let cached = self
                    .driver
                    .current_file(&node.logical)
                    .unwrap_or_else(|| node.name.clone());
                match self
                    .driver
                    .digest_for_file(&cached, node.reference.sha_method)
                {
                    Ok(Some(cached)) if cached == node.reference.declared_hash => {
                        debug!(document = %node.name, "Cached copy is current");
                        return Ok(SyncReport {
                            skipped: 1,
                            ..SyncReport::default()
                        });
                    }
                    Ok(_) => {}
                    Err(err) => return Ok(SyncReport::failure(&node.name, &err)),
                }
            }

            let bytes = match self.remote.fetch(&node.name).await {
                Ok(bytes) => bytes,
                Err(err) => return Ok(SyncReport::failure(&node.name, &err)),
            };
            let content = match parse_content(&node.name, &bytes) {
                Ok(content) => content,
                Err(err) => return Ok(SyncReport::failure(&node.name, &err)),
            };

            let digest = hash::digest(&bytes, node.reference.sha_method);
            if digest != node.reference.declared_hash {
                warn!(
                    document = %node.name,
                    declared = %node.reference.declared_hash,
                    actual = %digest,
                    "Fetched document does not match its declared digest"
                );
            }
            if let Err(err) = self.driver.replace_file(&node.logical, &node.name, &bytes) {
                return Ok(SyncReport::failure(&node.name, &err));
            }

            let mut report = SyncReport {
                fetched: 1,
                ..SyncReport::default()
            };

            if let NodeKind::Providers { providers_url } = &node.kind {
                let references = match parse_references(&node.name, &content, "providers") {
                    Ok(references) => references,
                    Err(err) => return Ok(SyncReport::failure(&node.name, &err)),
                };
                let children = references
                    .into_iter()
                    .map(|reference| SyncNode::child_of(providers_url.as_deref(), reference))
                    .collect();
                report.merge(self.sync_nodes(children, force).await?);
            }

            Ok(report)
        }
        .boxed()
    }

    /// Digest of the cached copy of a document.
    pub fn digest_for_file(
        &self,
        name: &str,
        method: ShaMethod,
    ) -> Result<Option<HexDigest>, MirrorError> {
        self.driver.digest_for_file(name, method)
    }

    /// Cached bytes of a document.
    pub fn get_file(&self, name: &str) -> Result<Option<Vec<u8>>, MirrorError> {
        self.driver.file_content(name)
    }

    /// Cache first, then upstream. When upstream fails, the previously cached
    /// version of the same node is served; without one the result is `None`.
    async fn raw_file(&self, name: &str) -> Result<Option<Vec<u8>>, MirrorError> {
        if self.settings.enabled {
            if let Some(bytes) = self.driver.file_content(name)? {
                return Ok(Some(bytes));
            }
        }
        match self.remote.fetch(name).await {
            Ok(bytes) => {
                if self.settings.enabled {
                    self.driver.add_file(name, &bytes)?;
                }
                Ok(Some(bytes))
            }
            Err(err) => {
                if self.settings.enabled {
                    if let Some(previous) = self.driver.previous_version(name) {
                        warn!(
                            document = name,
                            served = %previous,
                            error = %err,
                            "Serving previously cached version"
                        );
                        return self.driver.file_content(&previous);
                    }
                }
                warn!(document = name, error = %err, "Document unavailable");
                Ok(None)
            }
        }
    }

    /// Document as served to clients.
    ///
    /// The root index gets the private packages overlaid; with a serve
    /// transform configured, package metadata is rewritten. Documents that
    /// need no change are returned byte for byte.
    pub async fn served_file(&self, name: &str) -> Result<Option<Vec<u8>>, MirrorError> {
        let Some(bytes) = self.raw_file(name).await? else {
            return Ok(None);
        };

        let overlay = name == ROOT_INDEX && self.private.as_ref().is_some_and(|p| !p.is_empty());
        if !overlay && self.settings.serve_transform.is_none() {
            return Ok(Some(bytes));
        }

        let mut content = parse_content(name, &bytes)?;
        if overlay {
            if let Some(private) = &self.private {
                private.overlay(&mut content);
            }
        }
        let rewritten = match &self.settings.serve_transform {
            Some(settings) => transform::rewrite_document(&mut content, settings, None)?.rewritten,
            None => 0,
        };
        if !overlay && rewritten == 0 {
            return Ok(Some(bytes));
        }
        Ok(Some(hash::serialize(&content)?))
    }

    /// Every package of the root index and its `includes`, private packages included.
    pub async fn all_packages(&self) -> Result<Map<String, Value>, MirrorError> {
        let bytes = self
            .raw_file(ROOT_INDEX)
            .await?
            .ok_or_else(|| MirrorError::MissingSource {
                path: ROOT_INDEX.into(),
            })?;
        let mut root = parse_content(ROOT_INDEX, &bytes)?;
        if let Some(private) = &self.private {
            private.overlay(&mut root);
        }

        let mut packages = Map::new();
        for reference in parse_references(ROOT_INDEX, &root, "includes")? {
            let node = SyncNode::from_key(reference, NodeKind::Packages);
            let Some(bytes) = self.raw_file(&node.name).await? else {
                continue;
            };
            let content = parse_content(&node.name, &bytes)?;
            if let Some(Value::Object(included)) = content.get("packages") {
                merge_versions(&mut packages, included);
            }
        }
        if let Some(Value::Object(inline)) = root.get("packages") {
            for (name, versions) in inline {
                packages.insert(name.clone(), versions.clone());
            }
        }
        Ok(packages)
    }

    /// Metadata of one package version. Dev versions are hidden in stable-only mode.
    pub async fn find_package(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<Value>, MirrorError> {
        if self.settings.stable_only && parse_stability(version)?.is_dev() {
            return Ok(None);
        }
        let packages = self.all_packages().await?;
        Ok(packages
            .get(name)
            .and_then(|versions| versions.get(version))
            .cloned())
    }

    /// Remove every cached document.
    pub fn clean(&self) -> Result<usize, MirrorError> {
        let removed = self.driver.clean()?;
        info!(removed, "Mirror cache cleaned");
        Ok(removed)
    }
}

/// Merge version maps package by package; later versions win.
fn merge_versions(into: &mut Map<String, Value>, from: &Map<String, Value>) {
    for (name, versions) in from {
        match (into.get_mut(name), versions) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                for (version, metadata) in incoming {
                    existing.insert(version.clone(), metadata.clone());
                }
            }
            _ => {
                into.insert(name.clone(), versions.clone());
            }
        }
    }
}
