//! XDG Base Directory utilities for default mirror locations.

use crate::error::MirrorError;
use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "pkgmirror")
}

/// Get XDG config home directory
///
/// Returns `$XDG_CONFIG_HOME` if set, otherwise defaults to `$HOME/.config`
pub fn config_home() -> Result<PathBuf, MirrorError> {
    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg_config_home));
    }

    let home = std::env::var("HOME").map_err(|_| {
        MirrorError::ConfigError(
            "Could not determine XDG config home directory (HOME not set)".to_string(),
        )
    })?;

    Ok(PathBuf::from(home).join(".config"))
}

/// Default config file: `$XDG_CONFIG_HOME/pkgmirror/config.toml`
///
/// The file is optional; loading skips it when absent.
pub fn config_file() -> Option<PathBuf> {
    config_home()
        .ok()
        .map(|home| home.join("pkgmirror").join("config.toml"))
}

/// Default build working directory: `<cache dir>/build`
pub fn default_tmp_dir() -> Result<PathBuf, MirrorError> {
    project_dirs()
        .map(|dirs| dirs.cache_dir().join("build"))
        .ok_or_else(|| {
            MirrorError::ConfigError("Could not determine cache directory (HOME not set)".into())
        })
}

/// Default mirror cache directory: `<cache dir>/mirror`
pub fn default_cache_dir() -> Result<PathBuf, MirrorError> {
    project_dirs()
        .map(|dirs| dirs.cache_dir().join("mirror"))
        .ok_or_else(|| {
            MirrorError::ConfigError("Could not determine cache directory (HOME not set)".into())
        })
}

/// Default published index location: `<data dir>/index`
pub fn default_index_dir() -> Result<PathBuf, MirrorError> {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("index"))
        .ok_or_else(|| {
            MirrorError::ConfigError("Could not determine data directory (HOME not set)".into())
        })
}

/// Default log file: `<data dir>/logs/pkgmirror.log`
pub fn default_log_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs").join("pkgmirror.log"))
}
