//! Root index document (`packages.json`)

use super::engine::{self, ChildLocation, ChildOutcome, Node};
use super::package::rebuild_package_child;
use super::{
    parse_references, BuildContext, BuildSettings, DocumentState, IndexDocument, Persisted,
    ProviderDocument, Reference,
};
use crate::concurrency::Turn;
use crate::error::MirrorError;
use crate::hash::ShaMethod;
use crate::template;
use crate::transform;
use crate::types::ROOT_INDEX;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

pub const PROVIDER_INCLUDES: &str = "provider-includes";
pub const PROVIDERS_INCLUDES: &str = "providers-includes";
pub const INCLUDES: &str = "includes";

/// Keys that only make sense on the upstream host
const DYNAMIC_KEYS: [&str; 2] = ["notify_batch", "search"];

/// Top of the index tree. Always written to the same path.
#[derive(Debug)]
pub struct RootIndexDocument {
    node: Node,
    /// `providers-url` without its leading slash
    providers_url: Option<String>,
}

impl RootIndexDocument {
    pub async fn load(ctx: &BuildContext) -> Result<Self, MirrorError> {
        let node = Node::load(ctx, ROOT_INDEX, ShaMethod::default(), None).await?;
        let providers_url = node
            .content()
            .get("providers-url")
            .and_then(Value::as_str)
            .map(template::normalize_providers_url)
            .filter(|url| !url.is_empty());
        Ok(Self {
            node,
            providers_url,
        })
    }

    /// Refresh only the private packages at the attach points.
    ///
    /// Other references are left as they are: nothing else is fetched or
    /// rehashed, and only the touched attach points propagate new digests.
    pub async fn attach_private_packages_only(
        &mut self,
        ctx: &BuildContext,
    ) -> Result<Persisted, MirrorError> {
        ctx.cancel.check()?;
        apply_notify(self.node.content_mut(), &ctx.settings);
        let providers_url = self.providers_url.clone();
        self.rebuild_providers(ctx, PROVIDER_INCLUDES, providers_url, true)
            .await?;
        self.rebuild_providers(ctx, PROVIDERS_INCLUDES, None, true)
            .await?;
        self.node.state = DocumentState::ChildrenRebuilt;
        self.finalize(ctx)
    }

    async fn rebuild_providers(
        &mut self,
        ctx: &BuildContext,
        key: &str,
        providers_url: Option<String>,
        attach_only: bool,
    ) -> Result<usize, MirrorError> {
        let mut references = parse_references(ROOT_INDEX, self.node.content(), key)?;
        if attach_only {
            references.retain(|reference| ctx.is_attach_point(&reference.name));
        }
        if references.is_empty() {
            return Ok(0);
        }
        debug!(key, children = references.len(), "Rebuilding provider documents");

        // groups run one after another, so each starts its own turn
        let outcomes = engine::join_children(ctx, references, Turn::first(), |reference, turn| {
            rebuild_provider_child(ctx, reference, providers_url.clone(), attach_only, turn)
        })
        .await?;
        Ok(engine::apply_outcomes(&mut self.node, key, outcomes))
    }

    async fn rebuild_includes(&mut self, ctx: &BuildContext) -> Result<usize, MirrorError> {
        let references = parse_references(ROOT_INDEX, self.node.content(), INCLUDES)?;
        if references.is_empty() {
            return Ok(0);
        }
        let outcomes = engine::join_children(ctx, references, Turn::first(), |reference, turn| {
            let location = ChildLocation::from_key(&reference);
            rebuild_package_child(ctx, reference, location, turn)
        })
        .await?;
        Ok(engine::apply_outcomes(&mut self.node, INCLUDES, outcomes))
    }
}

async fn rebuild_provider_child(
    ctx: &BuildContext,
    reference: Reference,
    providers_url: Option<String>,
    attach_only: bool,
    turn: Turn,
) -> Result<ChildOutcome, MirrorError> {
    let mut child = ProviderDocument::load(ctx, &reference, providers_url).await?;
    if attach_only {
        child.attach_only(ctx, turn).await?;
    } else {
        child.rebuild(ctx, turn).await?;
    }
    let persisted = child.finalize(ctx)?;
    Ok(ChildOutcome {
        reference,
        persisted,
    })
}

/// Drop host-specific keys and point notifications at this mirror.
fn apply_notify(content: &mut Map<String, Value>, settings: &BuildSettings) {
    for key in DYNAMIC_KEYS {
        content.shift_remove(key);
    }
    for (key, value) in [("notify", &settings.notify), ("notify-batch", &settings.notify_batch)] {
        if value.is_empty() {
            content.shift_remove(key);
        } else {
            content.insert(key.to_string(), Value::String(value.clone()));
        }
    }
}

#[async_trait]
impl IndexDocument for RootIndexDocument {
    fn name(&self) -> &str {
        &self.node.doc.name
    }

    fn state(&self) -> DocumentState {
        self.node.state
    }

    async fn rebuild(&mut self, ctx: &BuildContext, mut turn: Turn) -> Result<(), MirrorError> {
        ctx.cancel.check()?;
        apply_notify(self.node.content_mut(), &ctx.settings);

        turn.wait().await;
        let stats = transform::rewrite_document(
            self.node.content_mut(),
            &ctx.settings.transform,
            Some(&ctx.uids),
        )?;
        turn.pass();
        ctx.stats.record_transform(stats);

        let providers_url = self.providers_url.clone();
        let provider_includes = self
            .rebuild_providers(ctx, PROVIDER_INCLUDES, providers_url, false)
            .await?;
        let providers_includes = self
            .rebuild_providers(ctx, PROVIDERS_INCLUDES, None, false)
            .await?;
        let includes = self.rebuild_includes(ctx).await?;

        info!(
            provider_includes,
            providers_includes, includes, "Root references rebuilt"
        );
        self.node.state = DocumentState::ChildrenRebuilt;
        Ok(())
    }

    fn finalize(&mut self, ctx: &BuildContext) -> Result<Persisted, MirrorError> {
        self.node.persist(ctx)
    }
}
