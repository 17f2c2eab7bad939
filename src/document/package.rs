//! Package documents: leaves of the index tree holding version metadata.

use super::engine::{ChildLocation, ChildOutcome, Node};
use super::{BuildContext, DocumentState, IndexDocument, Persisted, Reference};
use crate::concurrency::Turn;
use crate::error::MirrorError;
use crate::hash::ShaMethod;
use crate::transform;
use async_trait::async_trait;

/// `{"packages": {name: {version: metadata}}}`
#[derive(Debug)]
pub struct PackageDocument {
    node: Node,
}

impl PackageDocument {
    pub async fn load(
        ctx: &BuildContext,
        name: &str,
        sha_method: ShaMethod,
        target: Option<String>,
    ) -> Result<Self, MirrorError> {
        Ok(Self {
            node: Node::load(ctx, name, sha_method, target).await?,
        })
    }
}

#[async_trait]
impl IndexDocument for PackageDocument {
    fn name(&self) -> &str {
        &self.node.doc.name
    }

    fn state(&self) -> DocumentState {
        self.node.state
    }

    async fn rebuild(&mut self, ctx: &BuildContext, mut turn: Turn) -> Result<(), MirrorError> {
        turn.wait().await;
        let stats = transform::rewrite_document(
            self.node.content_mut(),
            &ctx.settings.transform,
            Some(&ctx.uids),
        )?;
        turn.pass();
        ctx.stats.record_transform(stats);
        self.node.state = DocumentState::ChildrenRebuilt;
        Ok(())
    }

    fn finalize(&mut self, ctx: &BuildContext) -> Result<Persisted, MirrorError> {
        self.node.persist(ctx)
    }
}

/// Load, rebuild and finalize the package document behind `reference`.
pub(crate) async fn rebuild_package_child(
    ctx: &BuildContext,
    reference: Reference,
    location: ChildLocation,
    turn: Turn,
) -> Result<ChildOutcome, MirrorError> {
    let mut child =
        PackageDocument::load(ctx, &location.name, reference.sha_method, location.target).await?;
    child.rebuild(ctx, turn).await?;
    let persisted = child.finalize(ctx)?;
    Ok(ChildOutcome {
        reference,
        persisted,
    })
}
