//! CLI Tooling
//!
//! Command-line interface for building, rebuilding and mirroring a package
//! repository index.

use crate::builder::{BuildReport, RepositoryBuilder};
use crate::concurrency::CancelFlag;
use crate::config::{ConfigLoader, MirrorConfig};
use crate::error::MirrorError;
use crate::logging::LoggingConfig;
use crate::mirror::{MirrorCache, SyncReport};
use crate::remote::{self, RemoteSource};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// pkgmirror - Composer repository index builder and mirror
#[derive(Parser)]
#[command(name = "pkgmirror")]
#[command(about = "Build and mirror content-addressed Composer repository indexes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Logging configuration with command-line overrides applied.
    pub fn logging_config(&self, config: &MirrorConfig) -> LoggingConfig {
        let mut logging = config.logging.clone();
        if let Some(level) = &self.log_level {
            logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            logging.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            logging.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            logging.file = Some(file.clone());
        }
        logging
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mirror upstream into a fresh tree and publish it
    Build {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Rebuild an existing tree in place
    Rebuild {
        /// Directory holding packages.json
        dir: PathBuf,
        /// Fetch missing documents from upstream
        #[arg(long)]
        fetch: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Refresh only the private packages of an existing tree
    AttachPrivate {
        /// Directory holding packages.json
        dir: PathBuf,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Bring the mirror cache up to date with upstream
    Sync {
        /// Refetch every document regardless of cached digests
        #[arg(long)]
        force: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Mirror cache commands
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Package lookups through the mirror cache
    Packages {
        #[command(subcommand)]
        command: PackageCommands,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Remove every cached document
    Clean,
    /// Print a document as it is served
    Get {
        /// Logical document name, e.g. packages.json
        name: String,
    },
}

#[derive(Subcommand)]
pub enum PackageCommands {
    /// Show the metadata of one package version
    Show {
        name: String,
        version: String,
    },
    /// List every known package name
    List,
}

/// CLI context holding loaded configuration and the upstream source
pub struct CliContext {
    config: MirrorConfig,
    remote: Arc<dyn RemoteSource>,
    cancel: CancelFlag,
}

impl CliContext {
    /// Create a new CLI context
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, MirrorError> {
        let config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        Self::with_config(config)
    }

    pub fn with_config(config: MirrorConfig) -> Result<Self, MirrorError> {
        let remote = remote::source_from_config(&config.remote)?;
        Ok(Self {
            config,
            remote,
            cancel: CancelFlag::new(),
        })
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Flag that aborts the running command when set.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn builder(&self) -> RepositoryBuilder {
        RepositoryBuilder::new(self.config.clone()).with_cancel_flag(self.cancel.clone())
    }

    fn mirror(&self) -> Result<MirrorCache, MirrorError> {
        MirrorCache::from_config(&self.config, Arc::clone(&self.remote), self.cancel.clone())
    }

    /// Execute a CLI command
    pub async fn execute(&self, command: &Commands) -> Result<String, MirrorError> {
        let started = Instant::now();
        let result = self.execute_inner(command).await;
        info!(
            command = command_name(command),
            ok = result.is_ok(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );
        result
    }

    async fn execute_inner(&self, command: &Commands) -> Result<String, MirrorError> {
        match command {
            Commands::Build { format } => {
                let report = self
                    .builder()
                    .with_remote(Arc::clone(&self.remote))
                    .build()
                    .await?;
                render(format, &report, format_build_report)
            }
            Commands::Rebuild { dir, fetch, format } => {
                let mut builder = self.builder();
                if *fetch {
                    builder = builder.with_remote(Arc::clone(&self.remote));
                }
                let report = builder.rebuild(dir).await?;
                render(format, &report, format_build_report)
            }
            Commands::AttachPrivate { dir, format } => {
                let report = self.builder().attach_private(dir).await?;
                render(format, &report, format_build_report)
            }
            Commands::Sync { force, format } => {
                let mirror = self.mirror()?;
                let force = *force || mirror.settings().force_full_refresh;
                let report = mirror.sync_with(force).await?;
                render(format, &report, format_sync_report)
            }
            Commands::Cache { command } => self.handle_cache_command(command).await,
            Commands::Packages { command } => self.handle_package_command(command).await,
        }
    }

    async fn handle_cache_command(&self, command: &CacheCommands) -> Result<String, MirrorError> {
        let mirror = self.mirror()?;
        match command {
            CacheCommands::Clean => {
                let removed = mirror.clean()?;
                Ok(format!("Removed {} cached documents", removed))
            }
            CacheCommands::Get { name } => match mirror.served_file(name).await? {
                Some(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
                None => Err(MirrorError::MissingSource { path: name.into() }),
            },
        }
    }

    async fn handle_package_command(
        &self,
        command: &PackageCommands,
    ) -> Result<String, MirrorError> {
        let mirror = self.mirror()?;
        match command {
            PackageCommands::Show { name, version } => {
                match mirror.find_package(name, version).await? {
                    Some(metadata) => to_pretty_json(&metadata),
                    None => Ok(format!("Package {} {} not found", name, version)),
                }
            }
            PackageCommands::List => {
                let packages = mirror.all_packages().await?;
                Ok(packages.keys().cloned().collect::<Vec<_>>().join("\n"))
            }
        }
    }
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Build { .. } => "build",
        Commands::Rebuild { .. } => "rebuild",
        Commands::AttachPrivate { .. } => "attach-private",
        Commands::Sync { .. } => "sync",
        Commands::Cache { .. } => "cache",
        Commands::Packages { .. } => "packages",
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, MirrorError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| MirrorError::ConfigError(format!("Failed to serialize output: {}", e)))
}

fn render<T: Serialize>(
    format: &str,
    value: &T,
    text: impl Fn(&T) -> String,
) -> Result<String, MirrorError> {
    if format == "json" {
        to_pretty_json(value)
    } else {
        Ok(text(value))
    }
}

pub fn format_build_report(report: &BuildReport) -> String {
    let mut out = format!(
        "Built {} ({} documents written, {} renamed, {} versions rewritten) in {} ms\nRoot digest: {}",
        report.dir.display(),
        report.summary.persisted,
        report.summary.renamed,
        report.summary.versions_rewritten,
        report.duration_ms,
        report.root_digest,
    );
    if report.summary.private_attached > 0 {
        out.push_str(&format!(
            "\nPrivate packages attached: {}",
            report.summary.private_attached
        ));
    }
    if let Some(published) = &report.published {
        out.push_str(&format!("\nPublished: {}", published.display()));
    }
    out
}

pub fn format_sync_report(report: &SyncReport) -> String {
    let mut out = format!(
        "Fetched {}, unchanged {}, failed {}",
        report.fetched,
        report.skipped,
        report.failed.len()
    );
    for failure in &report.failed {
        out.push_str(&format!("\n  {}: {}", failure.name, failure.reason));
    }
    out
}
