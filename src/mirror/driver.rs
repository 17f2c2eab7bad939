//! Cache drivers
//!
//! A [`CacheDriver`] stores fetched documents under the names clients ask
//! for and answers digest queries for them, so the mirror can decide per
//! node whether a refetch is needed. Hash-named documents are also tracked
//! by their logical name (the `%hash%` template): each logical node keeps
//! exactly one cached file, and a newer version replaces the older one.

use crate::error::{MirrorError, StorageError};
use crate::hash::{self, ShaMethod};
use crate::store::{remove_if_exists, write_atomic};
use crate::template;
use crate::types::HexDigest;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Logical name -> cached file, kept next to the cached documents
const LOGICAL_INDEX: &str = ".logical-index";

/// Storage behind the mirror cache
pub trait CacheDriver: Send + Sync {
    fn add_file(&self, name: &str, bytes: &[u8]) -> Result<(), MirrorError>;

    /// Cache `bytes` as `name`, the current version of `logical`. The file
    /// cached for the previous version is removed and its name returned.
    fn replace_file(
        &self,
        logical: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<Option<String>, MirrorError>;

    /// File cached for a logical name, if any.
    fn current_file(&self, logical: &str) -> Option<String>;

    /// Cached file of the logical node `name` is a version of, when `name`
    /// itself is not cached.
    fn previous_version(&self, name: &str) -> Option<String>;

    /// Cached bytes, `None` when the name is not cached.
    fn file_content(&self, name: &str) -> Result<Option<Vec<u8>>, MirrorError>;

    /// Digest of the cached bytes, `None` when the name is not cached.
    fn digest_for_file(
        &self,
        name: &str,
        method: ShaMethod,
    ) -> Result<Option<HexDigest>, MirrorError>;

    /// Remove every cached document. Returns how many were removed.
    fn clean(&self) -> Result<usize, MirrorError>;
}

/// Cache kept as plain files below a directory
pub struct FileCacheDriver {
    dir: PathBuf,
    digests: RwLock<HashMap<(String, ShaMethod), HexDigest>>,
    logical: RwLock<BTreeMap<String, String>>,
}

impl FileCacheDriver {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, MirrorError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::create_dir(&dir, e))?;
        let logical = load_logical_index(&dir.join(LOGICAL_INDEX))?;
        Ok(Self {
            dir,
            digests: RwLock::new(HashMap::new()),
            logical: RwLock::new(logical),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, MirrorError> {
        Ok(self.dir.join(template::relative_path(name)?))
    }

    fn forget(&self, name: &str) {
        let mut digests = self.digests.write();
        digests.remove(&(name.to_string(), ShaMethod::Sha1));
        digests.remove(&(name.to_string(), ShaMethod::Sha256));
    }
}

fn load_logical_index(path: &Path) -> Result<BTreeMap<String, String>, MirrorError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(StorageError::read(path, e).into()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(index) => Ok(index),
        Err(e) => {
            // the next sync refetches whatever the index no longer names
            warn!(path = %path.display(), error = %e, "Ignoring unreadable cache index");
            Ok(BTreeMap::new())
        }
    }
}

impl CacheDriver for FileCacheDriver {
    fn add_file(&self, name: &str, bytes: &[u8]) -> Result<(), MirrorError> {
        let path = self.path_for(name)?;
        self.forget(name);
        write_atomic(&path, bytes)?;
        debug!(file = name, bytes = bytes.len(), "Cached document");
        Ok(())
    }

    fn replace_file(
        &self,
        logical: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<Option<String>, MirrorError> {
        self.add_file(name, bytes)?;
        if logical == name {
            return Ok(None);
        }

        let previous = {
            let mut index = self.logical.write();
            let previous = index.insert(logical.to_string(), name.to_string());
            let encoded = serde_json::to_vec_pretty(&*index)
                .map_err(|e| MirrorError::parse(LOGICAL_INDEX, e))?;
            write_atomic(&self.dir.join(LOGICAL_INDEX), &encoded)?;
            previous
        };

        match previous {
            Some(previous) if previous != name => {
                remove_if_exists(&self.path_for(&previous)?)?;
                self.forget(&previous);
                debug!(logical, superseded = %previous, "Removed superseded cache entry");
                Ok(Some(previous))
            }
            _ => Ok(None),
        }
    }

    fn current_file(&self, logical: &str) -> Option<String> {
        self.logical.read().get(logical).cloned()
    }

    fn previous_version(&self, name: &str) -> Option<String> {
        self.logical
            .read()
            .iter()
            .find(|(logical, _)| template::matches_hash_template(logical, name))
            .map(|(_, file)| file.clone())
    }

    fn file_content(&self, name: &str) -> Result<Option<Vec<u8>>, MirrorError> {
        let path = self.path_for(name)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::read(&path, e).into()),
        }
    }

    fn digest_for_file(
        &self,
        name: &str,
        method: ShaMethod,
    ) -> Result<Option<HexDigest>, MirrorError> {
        let key = (name.to_string(), method);
        if let Some(digest) = self.digests.read().get(&key) {
            return Ok(Some(digest.clone()));
        }
        let Some(bytes) = self.file_content(name)? else {
            return Ok(None);
        };
        let digest = hash::digest(&bytes, method);
        self.digests.write().insert(key, digest.clone());
        Ok(Some(digest))
    }

    fn clean(&self) -> Result<usize, MirrorError> {
        let mut removed = 0;
        for entry in WalkDir::new(&self.dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().and_then(|ext| ext.to_str()) == Some("json")
            {
                remove_if_exists(path)?;
                removed += 1;
            }
        }
        self.digests.write().clear();
        self.logical.write().clear();
        remove_if_exists(&self.dir.join(LOGICAL_INDEX))?;
        debug!(dir = %self.dir.display(), removed, "Cleaned cache");
        Ok(removed)
    }
}
