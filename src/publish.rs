//! Publishing a finished build
//!
//! The work directory is copied to a timestamped sibling of the index
//! directory, and the index directory (a symlink) is switched over to it in
//! one rename. Clients either see the previous tree or the new one.

use crate::error::{MirrorError, StorageError};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Result of a publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Directory the index symlink now points at
    pub target: PathBuf,
    /// Previous target, removed after the switch
    pub replaced: Option<PathBuf>,
    pub files: usize,
}

/// Copy every file below `from` into `to`, creating directories as needed.
pub fn copy_tree(from: &Path, to: &Path) -> Result<usize, MirrorError> {
    let mut files = 0;
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| {
            StorageError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let dest = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest).map_err(|e| StorageError::create_dir(&dest, e))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &dest).map_err(|e| StorageError::write(&dest, e))?;
            files += 1;
        }
    }
    Ok(files)
}

/// Timestamped directory a build is published into.
pub fn versioned_dir(index_dir: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let mut name = index_dir.as_os_str().to_os_string();
    name.push(format!("_{}", stamp));
    PathBuf::from(name)
}

/// Publish `work_dir` at `index_dir`.
#[cfg(unix)]
pub fn publish(work_dir: &Path, index_dir: &Path) -> Result<Published, MirrorError> {
    let mut target = versioned_dir(index_dir);
    // two publishes within the same second
    let mut suffix = 1;
    while target.exists() {
        let mut name = versioned_dir(index_dir).into_os_string();
        name.push(format!("_{}", suffix));
        target = PathBuf::from(name);
        suffix += 1;
    }

    let files = copy_tree(work_dir, &target)?;
    debug!(target = %target.display(), files, "Copied build output");

    let replaced = switch_link(index_dir, &target)?;
    if let Some(previous) = &replaced {
        if previous != &target && previous.exists() {
            if let Err(e) = std::fs::remove_dir_all(previous) {
                warn!(path = %previous.display(), error = %e, "Could not remove previous index");
            }
        }
    }

    info!(
        index = %index_dir.display(),
        target = %target.display(),
        files,
        "Published index"
    );
    Ok(Published {
        target,
        replaced,
        files,
    })
}

/// Without symlinks the index directory is replaced by a copy.
#[cfg(not(unix))]
pub fn publish(work_dir: &Path, index_dir: &Path) -> Result<Published, MirrorError> {
    if index_dir.exists() {
        std::fs::remove_dir_all(index_dir).map_err(|e| StorageError::remove(index_dir, e))?;
    }
    let files = copy_tree(work_dir, index_dir)?;
    info!(index = %index_dir.display(), files, "Published index");
    Ok(Published {
        target: index_dir.to_path_buf(),
        replaced: None,
        files,
    })
}

/// Point the `index_dir` symlink at `target`. Returns the previous target.
#[cfg(unix)]
fn switch_link(index_dir: &Path, target: &Path) -> Result<Option<PathBuf>, MirrorError> {
    let previous = match std::fs::symlink_metadata(index_dir) {
        Ok(meta) if meta.file_type().is_symlink() => std::fs::read_link(index_dir).ok(),
        Ok(meta) if meta.is_dir() => {
            // a plain directory from an older layout
            std::fs::remove_dir_all(index_dir).map_err(|e| StorageError::remove(index_dir, e))?;
            None
        }
        Ok(_) => {
            std::fs::remove_file(index_dir).map_err(|e| StorageError::remove(index_dir, e))?;
            None
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(StorageError::read(index_dir, e).into()),
    };

    if let Some(parent) = index_dir.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::create_dir(parent, e))?;
    }
    let mut tmp = index_dir.as_os_str().to_os_string();
    tmp.push(".tmp-link");
    let tmp = PathBuf::from(tmp);
    let _ = std::fs::remove_file(&tmp);
    std::os::unix::fs::symlink(target, &tmp).map_err(|e| StorageError::write(&tmp, e))?;
    std::fs::rename(&tmp, index_dir).map_err(|e| StorageError::write(index_dir, e))?;
    Ok(previous)
}
