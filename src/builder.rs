//! Index build runs
//!
//! A [`RepositoryBuilder`] wires configuration, the upstream source and the
//! document tree together. `build` mirrors upstream into a fresh work
//! directory and publishes it; `rebuild` and `attach_private` work on an
//! existing tree in place.

use crate::concurrency::{CancelFlag, Turn};
use crate::config::paths::xdg_root;
use crate::config::MirrorConfig;
use crate::document::{
    BuildContext, BuildSettings, BuildSummary, IndexDocument, Persisted, RootIndexDocument,
};
use crate::error::{MirrorError, StorageError};
use crate::private::PrivatePackages;
use crate::publish::{self, Published};
use crate::remote::RemoteSource;
use crate::store::DocumentStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Work directory below `tmp_dir`
const WORK_DIR_NAME: &str = "composer";

/// Outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Directory the tree was built in
    pub dir: PathBuf,
    pub root_digest: String,
    pub summary: BuildSummary,
    /// Published location, for full builds
    pub published: Option<PathBuf>,
    pub duration_ms: u128,
}

pub struct RepositoryBuilder {
    config: MirrorConfig,
    remote: Option<Arc<dyn RemoteSource>>,
    cancel: CancelFlag,
}

impl RepositoryBuilder {
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            config,
            remote: None,
            cancel: CancelFlag::new(),
        }
    }

    /// Source that missing documents are fetched from.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteSource>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Work directory of a full build.
    pub fn work_dir(&self) -> Result<PathBuf, MirrorError> {
        let tmp = match &self.config.build.tmp_dir {
            Some(dir) => dir.clone(),
            None => xdg_root::default_tmp_dir()?,
        };
        Ok(tmp.join(WORK_DIR_NAME))
    }

    pub fn index_dir(&self) -> Result<PathBuf, MirrorError> {
        match &self.config.build.index_dir {
            Some(dir) => Ok(dir.clone()),
            None => xdg_root::default_index_dir(),
        }
    }

    fn context(&self, dir: &Path, remote: Option<Arc<dyn RemoteSource>>) -> Result<BuildContext, MirrorError> {
        let build = &self.config.build;
        let store = DocumentStore::new(dir, remote);
        let ctx = BuildContext::new(
            store,
            BuildSettings::from_config(build),
            build.uid_start,
            self.cancel.clone(),
        );
        if !build.attach_private_packages {
            return Ok(ctx);
        }
        match &build.private_packages_file {
            Some(path) => Ok(ctx.with_private_packages(PrivatePackages::load(path)?)),
            None => Err(MirrorError::ConfigError(
                "attach_private_packages requires private_packages_file".to_string(),
            )),
        }
    }

    /// Mirror upstream into a fresh work directory and publish it.
    ///
    /// A failed or cancelled run leaves the published index untouched.
    pub async fn build(&self) -> Result<BuildReport, MirrorError> {
        let remote = self.remote.clone().ok_or_else(|| {
            MirrorError::ConfigError("a full build needs an upstream source".to_string())
        })?;
        let work_dir = self.work_dir()?;
        if work_dir.exists() {
            std::fs::remove_dir_all(&work_dir).map_err(|e| StorageError::remove(&work_dir, e))?;
        }
        std::fs::create_dir_all(&work_dir).map_err(|e| StorageError::create_dir(&work_dir, e))?;

        let mut report = self.run(&work_dir, Some(remote), false).await?;

        let index_dir = self.index_dir()?;
        let Published { target, .. } = publish::publish(&work_dir, &index_dir)?;
        report.published = Some(target);

        if !self.config.build.keep_work_dir {
            if let Err(e) = std::fs::remove_dir_all(&work_dir) {
                warn!(path = %work_dir.display(), error = %e, "Could not remove work directory");
            }
        }
        Ok(report)
    }

    /// Rebuild the tree below `dir` in place.
    pub async fn rebuild(&self, dir: &Path) -> Result<BuildReport, MirrorError> {
        self.run(dir, self.remote.clone(), false).await
    }

    /// Refresh only the private packages of the tree below `dir`.
    pub async fn attach_private(&self, dir: &Path) -> Result<BuildReport, MirrorError> {
        if !self.config.build.attach_private_packages {
            return Err(MirrorError::ConfigError(
                "attach_private_packages is disabled".to_string(),
            ));
        }
        self.run(dir, self.remote.clone(), true).await
    }

    async fn run(
        &self,
        dir: &Path,
        remote: Option<Arc<dyn RemoteSource>>,
        attach_only: bool,
    ) -> Result<BuildReport, MirrorError> {
        let started = Instant::now();
        let ctx = self.context(dir, remote)?;
        info!(dir = %dir.display(), attach_only, "Starting index run");

        let mut root = RootIndexDocument::load(&ctx).await?;
        let Persisted { digest, .. } = if attach_only {
            root.attach_private_packages_only(&ctx).await?
        } else {
            root.rebuild(&ctx, Turn::first()).await?;
            root.finalize(&ctx)?
        };

        let summary = ctx.stats.snapshot();
        let duration_ms = started.elapsed().as_millis();
        info!(
            root_digest = %digest,
            persisted = summary.persisted,
            renamed = summary.renamed,
            versions_rewritten = summary.versions_rewritten,
            duration_ms,
            "Index run finished"
        );
        Ok(BuildReport {
            dir: dir.to_path_buf(),
            root_digest: digest,
            summary,
            published: None,
            duration_ms,
        })
    }
}
