//! Document Store
//!
//! Loads index documents by logical name from the working tree, falling back
//! to the remote source when the file is not on disk yet. Fetched bytes are
//! persisted before they are parsed, so a later run finds them locally.
//!
//! Fetched documents are written on the blocking pool. [`DocumentStore::write`]
//! stays synchronous and runs on the calling worker: a document's write and
//! the removal of the file it replaced must not be split by an await point.

use crate::error::{MirrorError, StorageError};
use crate::remote::RemoteSource;
use crate::template;
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A parsed JSON document at a known location
#[derive(Debug, Clone)]
pub struct Document {
    /// Logical, slash separated name relative to the store base
    pub name: String,
    /// Location on disk
    pub path: PathBuf,
    pub content: Map<String, Value>,
}

/// Load-or-fetch access to the documents of one repository tree
#[derive(Clone)]
pub struct DocumentStore {
    base_path: PathBuf,
    remote: Option<Arc<dyn RemoteSource>>,
}

impl DocumentStore {
    pub fn new(base_path: impl Into<PathBuf>, remote: Option<Arc<dyn RemoteSource>>) -> Self {
        Self {
            base_path: base_path.into(),
            remote,
        }
    }

    /// Store that only reads what is already on disk.
    pub fn local(base_path: impl Into<PathBuf>) -> Self {
        Self::new(base_path, None)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// On-disk location of a logical name.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, MirrorError> {
        Ok(self.base_path.join(template::relative_path(name)?))
    }

    /// Read and parse `name`, fetching it from the remote source if it is
    /// not present locally.
    pub async fn load(&self, name: &str) -> Result<Document, MirrorError> {
        let path = self.path_for(name)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let remote = self
                    .remote
                    .as_ref()
                    .ok_or_else(|| MirrorError::MissingSource { path: path.clone() })?;
                let bytes = remote.fetch(name).await?;
                let target = path.clone();
                let bytes = tokio::task::spawn_blocking(move || {
                    write_atomic(&target, &bytes).map(|_| bytes)
                })
                .await
                .map_err(|e| StorageError::write(&path, std::io::Error::other(e)))??;
                debug!(document = name, bytes = bytes.len(), "Fetched missing document");
                bytes
            }
            Err(e) => return Err(StorageError::read(&path, e).into()),
        };

        let content = parse_content(name, &bytes)?;
        Ok(Document {
            name: name.to_string(),
            path,
            content,
        })
    }

    /// Write raw bytes under a logical name, replacing any previous file atomically.
    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, MirrorError> {
        let path = self.path_for(name)?;
        write_atomic(&path, bytes)?;
        Ok(path)
    }

    /// Parse a document already on disk, without fetching. `None` if absent.
    pub fn read_existing(&self, name: &str) -> Result<Option<Map<String, Value>>, MirrorError> {
        let path = self.path_for(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(parse_content(name, &bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::read(&path, e).into()),
        }
    }
}

/// Parse document bytes into a JSON object.
pub fn parse_content(name: &str, bytes: &[u8]) -> Result<Map<String, Value>, MirrorError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(MirrorError::parse(
            name,
            format!("expected a JSON object, found {}", json_kind(&other)),
        )),
        Err(e) => Err(MirrorError::parse(name, e)),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Write `bytes` to `path` via a sibling temp file and a rename.
///
/// Readers see either the previous file or the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::create_dir(parent, e))?;
    }

    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = fs::File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp_path, path));

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(StorageError::write(path, e));
    }
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::remove(path, e)),
    }
}
