//! Filename template resolution
//!
//! Reference names and `providers-url` may contain `%package%` and `%hash%`
//! placeholders. Every document kind resolves them through [`resolve`].

use crate::error::MirrorError;
use std::path::{Component, Path, PathBuf};

pub const PACKAGE_PLACEHOLDER: &str = "%package%";
pub const HASH_PLACEHOLDER: &str = "%hash%";

/// Values substituted into a template. `None` leaves the placeholder as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct Substitutions<'a> {
    pub package: Option<&'a str>,
    pub hash: Option<&'a str>,
}

impl<'a> Substitutions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package(mut self, package: &'a str) -> Self {
        self.package = Some(package);
        self
    }

    pub fn hash(mut self, hash: &'a str) -> Self {
        self.hash = Some(hash);
        self
    }
}

/// Substitute placeholders in `template`.
pub fn resolve(template: &str, subs: &Substitutions<'_>) -> String {
    let mut resolved = template.to_string();
    if let Some(package) = subs.package {
        resolved = resolved.replace(PACKAGE_PLACEHOLDER, package);
    }
    if let Some(hash) = subs.hash {
        resolved = resolved.replace(HASH_PLACEHOLDER, hash);
    }
    resolved
}

/// Whether the final filename depends on the document's own digest.
pub fn is_hash_templated(template: &str) -> bool {
    template.contains(HASH_PLACEHOLDER)
}

/// `providers-url` is published as an absolute URL path; filenames are relative.
pub fn normalize_providers_url(url: &str) -> String {
    url.trim_start_matches('/').to_string()
}

/// Convert a logical (slash separated) name into a relative path.
///
/// Names come from remote documents, so anything that could escape the
/// repository base is rejected.
pub fn relative_path(name: &str) -> Result<PathBuf, MirrorError> {
    let trimmed = name.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(MirrorError::invalid(name, "empty document name"));
    }
    let path = Path::new(trimmed);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(MirrorError::invalid(
                    name,
                    "document name escapes the repository base",
                ));
            }
        }
    }
    Ok(relative)
}

/// Whether `name` is `template` with `%hash%` replaced by a hex digest.
pub fn matches_hash_template(template: &str, name: &str) -> bool {
    let Some((prefix, suffix)) = template.split_once(HASH_PLACEHOLDER) else {
        return false;
    };
    if name.len() <= prefix.len() + suffix.len()
        || !name.starts_with(prefix)
        || !name.ends_with(suffix)
    {
        return false;
    }
    name[prefix.len()..name.len() - suffix.len()]
        .chars()
        .all(|c| c.is_ascii_hexdigit())
}
