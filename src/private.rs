//! Privately hosted packages
//!
//! The private package list is a side-loaded `{"packages": {name: {version:
//! metadata}}}` document. It is merged into the index at the attach points
//! while building, and overlaid onto the served root index by the mirror.

use crate::error::{MirrorError, StorageError};
use crate::store::parse_content;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

/// The private package list
#[derive(Debug, Clone, Default)]
pub struct PrivatePackages {
    packages: Map<String, Value>,
}

impl PrivatePackages {
    /// Read the private package file. A missing file means no private packages.
    pub fn load(path: &Path) -> Result<Self, MirrorError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No private package file");
                return Ok(Self::default());
            }
            Err(e) => return Err(StorageError::read(path, e).into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let content = parse_content(&path.display().to_string(), &bytes)?;
        Self::from_content(&path.display().to_string(), content)
    }

    pub fn from_content(name: &str, mut content: Map<String, Value>) -> Result<Self, MirrorError> {
        match content.shift_remove("packages") {
            None => Ok(Self::default()),
            Some(Value::Object(packages)) => Ok(Self { packages }),
            // An empty PHP array serializes as []
            Some(Value::Array(items)) if items.is_empty() => Ok(Self::default()),
            Some(_) => Err(MirrorError::invalid(name, "'packages' must be an object")),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn packages(&self) -> &Map<String, Value> {
        &self.packages
    }

    /// `{"packages": {name: versions}}` for one package, as written per package
    /// when the index fans out through `providers-url`.
    pub fn standalone_document(&self, name: &str) -> Option<Map<String, Value>> {
        let versions = self.packages.get(name)?;
        let mut packages = Map::new();
        packages.insert(name.to_string(), versions.clone());
        let mut document = Map::new();
        document.insert("packages".to_string(), Value::Object(packages));
        Some(document)
    }

    /// One document holding every private package.
    pub fn combined_document(&self) -> Map<String, Value> {
        let mut document = Map::new();
        document.insert("packages".to_string(), Value::Object(self.packages.clone()));
        document
    }

    /// Package list with svn repository URLs reduced to credential-free form.
    pub fn sanitized(&self) -> Map<String, Value> {
        let mut packages = self.packages.clone();
        for versions in packages.values_mut() {
            let Value::Object(versions) = versions else {
                continue;
            };
            for metadata in versions.values_mut() {
                for key in ["dist", "source"] {
                    if let Some(Value::Object(descriptor)) = metadata.get_mut(key) {
                        strip_svn_descriptor(descriptor);
                    }
                }
            }
        }
        packages
    }

    /// Overlay the sanitized private packages onto a document's `packages` map.
    pub fn overlay(&self, content: &mut Map<String, Value>) {
        if self.is_empty() {
            return;
        }
        let entry = content
            .entry("packages".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(packages) = entry {
            for (name, versions) in self.sanitized() {
                packages.insert(name, versions);
            }
        }
    }
}

fn strip_svn_descriptor(descriptor: &mut Map<String, Value>) {
    if descriptor.get("type").and_then(Value::as_str) != Some("svn") {
        return;
    }
    if let Some(Value::String(url)) = descriptor.get_mut("url") {
        *url = strip_credentials(url);
    }
}

/// Reduce a URL to `scheme://host[:port]/path[?query]`.
///
/// Userinfo and fragments are dropped. Unparseable input is returned unchanged.
pub fn strip_credentials(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return url.to_string();
    };
    let Some(host) = parsed.host_str() else {
        return url.to_string();
    };
    let mut stripped = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        stripped.push_str(&format!(":{}", port));
    }
    stripped.push_str(parsed.path());
    if let Some(query) = parsed.query() {
        stripped.push('?');
        stripped.push_str(query);
    }
    stripped
}
