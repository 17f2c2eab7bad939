//! Provider documents
//!
//! A provider document maps package (or provider) names to references of
//! package documents. Attach points additionally receive the private
//! packages before the references are rebuilt.

use super::engine::{self, ChildLocation, Node};
use super::package::rebuild_package_child;
use super::{parse_references, BuildContext, DocumentState, IndexDocument, Persisted, Reference};
use crate::concurrency::Turn;
use crate::error::MirrorError;
use crate::hash::{self, ShaMethod};
use crate::template::{self, Substitutions};
use crate::transform;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

const PROVIDERS_KEY: &str = "providers";

/// `{"providers": {name: {method: digest}}}`
#[derive(Debug)]
pub struct ProviderDocument {
    node: Node,
    /// Key under which the parent references this document
    reference_name: String,
    /// Normalized `providers-url` of the root, when children fan out through it
    providers_url: Option<String>,
}

impl ProviderDocument {
    /// Load the provider document a root reference points at.
    pub async fn load(
        ctx: &BuildContext,
        reference: &Reference,
        providers_url: Option<String>,
    ) -> Result<Self, MirrorError> {
        let location = ChildLocation::from_key(reference);
        let node = Node::load(ctx, &location.name, reference.sha_method, location.target).await?;
        Ok(Self {
            node,
            reference_name: reference.name.clone(),
            providers_url,
        })
    }

    /// Attach the private packages and rebuild only the entries that were added.
    ///
    /// Entries already present are neither fetched nor rehashed.
    pub async fn attach_only(&mut self, ctx: &BuildContext, turn: Turn) -> Result<usize, MirrorError> {
        let attached = self.attach_private(ctx)?;
        let count = attached.len();
        self.rebuild_entries(ctx, attached, turn).await?;
        self.node.state = DocumentState::ChildrenRebuilt;
        Ok(count)
    }

    /// Write the private packages next to this document and reference them
    /// from its `providers` map. Returns the references that were added.
    fn attach_private(&mut self, ctx: &BuildContext) -> Result<Vec<Reference>, MirrorError> {
        let Some(private) = ctx.private.as_ref() else {
            return Ok(Vec::new());
        };
        if private.is_empty() || !ctx.is_attach_point(&self.reference_name) {
            return Ok(Vec::new());
        }

        let method = self.node.sha_method;
        let previous = parse_references(&self.node.doc.name, self.node.content(), PROVIDERS_KEY)?;
        let mut attached = Vec::new();

        match self.providers_url.clone() {
            Some(providers_url) => {
                for name in private.names() {
                    let Some(mut document) = private.standalone_document(name) else {
                        continue;
                    };
                    let file_for = |hash: &str| {
                        template::resolve(
                            &providers_url,
                            &Substitutions::new().package(name).hash(hash),
                        )
                    };
                    carry_previous_uids(ctx, &previous, name, &file_for, &mut document)?;
                    let reference = self.write_private(ctx, &providers_url, name, &document, method)?;
                    self.supersede(ctx, &previous, &reference, file_for)?;
                    attached.push(reference);
                }
            }
            None => {
                let provider_name = ctx.settings.private_provider_name.clone();
                let mut document = private.combined_document();
                let file_for =
                    |hash: &str| template::resolve(&provider_name, &Substitutions::new().hash(hash));
                carry_previous_uids(ctx, &previous, &provider_name, &file_for, &mut document)?;
                let reference =
                    self.write_private(ctx, &provider_name, &provider_name, &document, method)?;
                self.supersede(ctx, &previous, &reference, file_for)?;
                attached.push(reference);
            }
        }

        insert_providers(self.node.content_mut(), &attached);

        ctx.stats.record_private(private.len());
        info!(
            document = %self.node.doc.name,
            packages = private.len(),
            entries = attached.len(),
            "Attached private packages"
        );
        Ok(attached)
    }

    fn write_private(
        &self,
        ctx: &BuildContext,
        name_template: &str,
        entry_name: &str,
        document: &Map<String, Value>,
        method: ShaMethod,
    ) -> Result<Reference, MirrorError> {
        let (bytes, digest) = hash::digest_content(document, method)?;
        let file_name = template::resolve(
            name_template,
            &Substitutions::new().package(entry_name).hash(&digest),
        );
        ctx.store.write(&file_name, &bytes)?;
        debug!(file = %file_name, "Wrote private provider file");
        Ok(Reference::new(entry_name, method, digest))
    }

    /// Queue the file of a replaced private entry for removal.
    fn supersede<F>(
        &mut self,
        ctx: &BuildContext,
        previous: &[Reference],
        reference: &Reference,
        file_for: F,
    ) -> Result<(), MirrorError>
    where
        F: Fn(&str) -> String,
    {
        let Some(old) = previous.iter().find(|r| r.name == reference.name) else {
            return Ok(());
        };
        if old.declared_hash == reference.declared_hash {
            return Ok(());
        }
        let old_name = file_for(&old.declared_hash);
        if old_name != file_for(&reference.declared_hash) {
            self.node.remove_after_persist(ctx.store.path_for(&old_name)?);
        }
        Ok(())
    }

    async fn rebuild_entries(
        &mut self,
        ctx: &BuildContext,
        references: Vec<Reference>,
        turn: Turn,
    ) -> Result<usize, MirrorError> {
        let providers_url = self.providers_url.as_deref();
        let outcomes = engine::join_children(ctx, references, turn, |reference, turn| {
            let location = match providers_url {
                Some(url) => ChildLocation::from_providers_url(url, &reference),
                None => ChildLocation::from_key(&reference),
            };
            rebuild_package_child(ctx, reference, location, turn)
        })
        .await?;
        Ok(engine::apply_outcomes(&mut self.node, PROVIDERS_KEY, outcomes))
    }
}

/// Give `document` the uids the previously attached file of `entry` recorded,
/// so attaching the same private packages again does not renumber them.
fn carry_previous_uids<F>(
    ctx: &BuildContext,
    previous: &[Reference],
    entry: &str,
    file_for: F,
    document: &mut Map<String, Value>,
) -> Result<(), MirrorError>
where
    F: Fn(&str) -> String,
{
    let Some(old) = previous.iter().find(|r| r.name == entry) else {
        return Ok(());
    };
    let old_file = file_for(&old.declared_hash);
    if let Some(recorded) = ctx.store.read_existing(&old_file)? {
        let carried = transform::carry_uids(document, &recorded);
        debug!(file = %old_file, carried, "Reused uids of previous private file");
    }
    Ok(())
}

/// Insert references into the `providers` map, creating it if absent or an empty list.
fn insert_providers(content: &mut Map<String, Value>, references: &[Reference]) {
    if !matches!(content.get(PROVIDERS_KEY), Some(Value::Object(_))) {
        content.insert(PROVIDERS_KEY.to_string(), Value::Object(Map::new()));
    }
    if let Some(Value::Object(providers)) = content.get_mut(PROVIDERS_KEY) {
        for reference in references {
            providers.insert(reference.name.clone(), reference.to_value());
        }
    }
}

#[async_trait]
impl IndexDocument for ProviderDocument {
    fn name(&self) -> &str {
        &self.node.doc.name
    }

    fn state(&self) -> DocumentState {
        self.node.state
    }

    async fn rebuild(&mut self, ctx: &BuildContext, turn: Turn) -> Result<(), MirrorError> {
        self.attach_private(ctx)?;
        let references = parse_references(&self.node.doc.name, self.node.content(), PROVIDERS_KEY)?;
        self.rebuild_entries(ctx, references, turn).await?;
        self.node.state = DocumentState::ChildrenRebuilt;
        Ok(())
    }

    fn finalize(&mut self, ctx: &BuildContext) -> Result<Persisted, MirrorError> {
        self.node.persist(ctx)
    }
}
