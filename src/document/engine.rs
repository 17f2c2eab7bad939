//! Rebuild engine
//!
//! Shared by every document kind:
//! 1. children are rebuilt first, siblings concurrently;
//! 2. a changed child digest is written back into the parent's reference;
//! 3. the parent is serialized and digested;
//! 4. a hash-templated parent is written under its new name;
//! 5. the files its renamed children left behind are removed.
//!
//! Step 5 runs only after the parent itself is on disk, so an aborted run
//! never leaves a reference to a deleted file. Writing and removal are
//! synchronous, so a dropped rebuild future cannot stop between them.
//!
//! Siblings load concurrently, but each takes a [`Turn`] so uids are handed
//! out in reference order, depth first.

use super::{BuildContext, DocumentState, Persisted, Reference};
use crate::concurrency::Turn;
use crate::error::MirrorError;
use crate::hash::{self, ShaMethod};
use crate::store::{remove_if_exists, Document};
use crate::template::{self, Substitutions};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Content and placement of one document while it is rebuilt
#[derive(Debug)]
pub struct Node {
    pub doc: Document,
    pub sha_method: ShaMethod,
    /// Name template of the finalized file. `None` keeps the loaded name.
    pub target: Option<String>,
    pub state: DocumentState,
    pending_removals: Vec<PathBuf>,
}

impl Node {
    pub fn new(doc: Document, sha_method: ShaMethod, target: Option<String>) -> Self {
        Self {
            doc,
            sha_method,
            target,
            state: DocumentState::Loaded,
            pending_removals: Vec::new(),
        }
    }

    /// Load a document through the run's store. Cancellation is honoured
    /// before anything is read or fetched.
    pub async fn load(
        ctx: &BuildContext,
        name: &str,
        sha_method: ShaMethod,
        target: Option<String>,
    ) -> Result<Self, MirrorError> {
        ctx.cancel.check()?;
        let doc = ctx.store.load(name).await?;
        Ok(Self::new(doc, sha_method, target))
    }

    pub fn content(&self) -> &Map<String, Value> {
        &self.doc.content
    }

    pub fn content_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.doc.content
    }

    /// Remove `path` once this document has been written.
    pub fn remove_after_persist(&mut self, path: PathBuf) {
        self.pending_removals.push(path);
    }

    /// A child now lives at `path`; never remove it.
    pub fn keep(&mut self, path: &Path) {
        self.pending_removals.retain(|p| p != path);
    }

    /// Name the document gets for a given digest.
    pub fn final_name(&self, digest: &str) -> String {
        match &self.target {
            Some(target) => template::resolve(target, &Substitutions::new().hash(digest)),
            None => self.doc.name.clone(),
        }
    }

    /// Rename-on-write. The previous file, if the name changed, is reported
    /// back as stale for the parent to remove.
    pub fn persist(&mut self, ctx: &BuildContext) -> Result<Persisted, MirrorError> {
        if self.state != DocumentState::ChildrenRebuilt {
            return Err(MirrorError::invalid(
                &self.doc.name,
                format!("cannot persist a document in state {:?}", self.state),
            ));
        }
        ctx.cancel.check()?;
        let (bytes, digest) = hash::digest_content(&self.doc.content, self.sha_method)?;
        self.state = DocumentState::SelfHashed;

        let final_name = self.final_name(&digest);
        let final_path = ctx.store.write(&final_name, &bytes)?;
        let stale = (final_path != self.doc.path).then(|| self.doc.path.clone());

        for path in self.pending_removals.drain(..) {
            if path != final_path {
                remove_if_exists(&path)?;
                debug!(path = %path.display(), "Removed superseded file");
            }
        }

        info!(
            document = %final_name,
            digest = %digest,
            renamed = stale.is_some(),
            "Persisted document"
        );
        ctx.stats.record_persisted(stale.is_some());

        self.doc.name = final_name.clone();
        self.doc.path = final_path.clone();
        self.state = DocumentState::Persisted;

        Ok(Persisted {
            name: final_name,
            path: final_path,
            digest,
            stale,
        })
    }
}

/// Result of rebuilding one child
#[derive(Debug, Clone)]
pub struct ChildOutcome {
    pub reference: Reference,
    pub persisted: Persisted,
}

/// Where a referenced child lives and what it is renamed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildLocation {
    pub name: String,
    pub target: Option<String>,
}

impl ChildLocation {
    /// Child named by the reference key itself (`%hash%` resolved to the declared digest).
    pub fn from_key(reference: &Reference) -> Self {
        let name = template::resolve(
            &reference.name,
            &Substitutions::new().hash(&reference.declared_hash),
        );
        let target = template::is_hash_templated(&reference.name).then(|| reference.name.clone());
        Self { name, target }
    }

    /// Package child located through `providers-url`.
    pub fn from_providers_url(providers_url: &str, reference: &Reference) -> Self {
        let package = Substitutions::new().package(&reference.name);
        let target = template::resolve(providers_url, &package);
        let name = template::resolve(&target, &package.hash(&reference.declared_hash));
        let target = template::is_hash_templated(&target).then_some(target);
        Self { name, target }
    }
}

/// Run child rebuilds concurrently and wait for all of them.
///
/// Every child gets its own slice of `turn`, in iteration order; `turn`
/// passes once the last child has. The first error stops the join.
/// Children still in flight are dropped at an await point, never between
/// writing a file and removing its predecessor.
pub async fn join_children<T, F, Fut>(
    ctx: &BuildContext,
    children: Vec<T>,
    turn: Turn,
    rebuild: F,
) -> Result<Vec<ChildOutcome>, MirrorError>
where
    F: Fn(T, Turn) -> Fut,
    Fut: Future<Output = Result<ChildOutcome, MirrorError>>,
{
    if children.is_empty() {
        turn.hand_off().await;
        return Ok(Vec::new());
    }
    let turns = turn.split(children.len());
    stream::iter(children.into_iter().zip(turns))
        .map(|(child, turn)| rebuild(child, turn))
        .buffer_unordered(ctx.settings.child_concurrency)
        .try_collect()
        .await
}

/// Write changed child digests back into the reference map under `key`.
///
/// Returns how many references changed. Stale files of renamed children
/// are queued for removal after `node` is persisted.
pub fn apply_outcomes(node: &mut Node, key: &str, outcomes: Vec<ChildOutcome>) -> usize {
    let mut changed = 0;
    for outcome in outcomes {
        if let Some(stale) = outcome.persisted.stale.clone() {
            node.remove_after_persist(stale);
        }
        node.keep(&outcome.persisted.path);
        if outcome.persisted.digest == outcome.reference.declared_hash {
            debug!(reference = %outcome.reference.name, "Reference unchanged");
            continue;
        }
        let updated = Reference {
            declared_hash: outcome.persisted.digest.clone(),
            ..outcome.reference
        };
        if let Some(Value::Object(references)) = node.content_mut().get_mut(key) {
            references.insert(updated.name.clone(), updated.to_value());
            changed += 1;
        }
    }
    if changed > 0 {
        debug!(document = %node.doc.name, key, changed, "Updated references");
    }
    changed
}
