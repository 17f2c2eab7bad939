//! ConfigLoader facade delegating to merge service.

use super::merge::service::MergeService;
use super::MirrorConfig;
use crate::error::MirrorError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the default file location and environment.
    pub fn load() -> Result<MirrorConfig, MirrorError> {
        let config = MergeService::load(super::paths::xdg_root::config_file().as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<MirrorConfig, MirrorError> {
        if !path.exists() {
            return Err(MirrorError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config = MergeService::load(Some(path))?;
        config.validate()?;
        Ok(config)
    }

    /// Create default configuration.
    pub fn default() -> MirrorConfig {
        MirrorConfig::default()
    }
}
