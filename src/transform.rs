//! Package metadata rewrite
//!
//! Points every eligible version's `dist` at the local download endpoint and
//! assigns a run-wide unique `uid` to versions that do not carry one yet.

use crate::error::MirrorError;
use crate::stability::parse_stability;
use crate::types::Uid;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Rewrite rules for `packages` maps
#[derive(Debug, Clone)]
pub struct TransformSettings {
    pub enabled: bool,
    /// Leave dev versions untouched
    pub stable_only: bool,
    pub download_url_prefix: String,
}

impl TransformSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            stable_only: true,
            download_url_prefix: String::new(),
        }
    }

    /// Whether the metadata of `version` gets rewritten.
    pub fn applies_to(&self, version: &str) -> Result<bool, MirrorError> {
        if !self.enabled {
            return Ok(false);
        }
        Ok(!(self.stable_only && parse_stability(version)?.is_dev()))
    }

    pub fn download_url(&self, package: &str, version: &str) -> String {
        format!("{}{}/{}.zip", self.download_url_prefix, package, version)
    }
}

/// Monotonic uid source shared by every document of a run
#[derive(Debug)]
pub struct UidCounter {
    next: AtomicU64,
}

impl UidCounter {
    pub fn new(start: Uid) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Hand out the next uid. Never returns the same value twice.
    pub fn next(&self) -> Uid {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The uid the next call to [`UidCounter::next`] returns.
    pub fn peek(&self) -> Uid {
        self.next.load(Ordering::SeqCst)
    }
}

/// Outcome of rewriting one `packages` map
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransformStats {
    pub rewritten: usize,
    pub uids_assigned: usize,
}

/// Rewrite every `(package, version, metadata)` triple of a `packages` map.
///
/// Version entries that are not JSON objects are left as they are. With
/// `uids` set to `None` no uids are assigned (serve-side rewrite). Uids are
/// handed out in map order.
pub fn rewrite_packages(
    packages: &mut Map<String, Value>,
    settings: &TransformSettings,
    uids: Option<&UidCounter>,
) -> Result<TransformStats, MirrorError> {
    let mut stats = TransformStats::default();
    for (package, versions) in packages.iter_mut() {
        let Value::Object(versions) = versions else {
            continue;
        };
        for (version, metadata) in versions.iter_mut() {
            let Value::Object(metadata) = metadata else {
                continue;
            };
            if settings.applies_to(version)? {
                metadata.insert(
                    "dist".to_string(),
                    json!({
                        "type": "zip",
                        "reference": version,
                        "shasum": "",
                        "url": settings.download_url(package, version),
                    }),
                );
                metadata.shift_remove("source");
                stats.rewritten += 1;
            }
            if let Some(uids) = uids {
                if !metadata.contains_key("uid") {
                    metadata.insert("uid".to_string(), Value::from(uids.next()));
                    stats.uids_assigned += 1;
                }
            }
        }
    }
    Ok(stats)
}

/// Apply [`rewrite_packages`] to the `packages` key of a document, if present.
pub fn rewrite_document(
    content: &mut Map<String, Value>,
    settings: &TransformSettings,
    uids: Option<&UidCounter>,
) -> Result<TransformStats, MirrorError> {
    match content.get_mut("packages") {
        Some(Value::Object(packages)) => rewrite_packages(packages, settings, uids),
        _ => Ok(TransformStats::default()),
    }
}

/// Copy the uids `previous` recorded for the same package versions into
/// `content` where it has none. Returns how many were copied.
pub fn carry_uids(content: &mut Map<String, Value>, previous: &Map<String, Value>) -> usize {
    let (Some(Value::Object(packages)), Some(Value::Object(recorded))) =
        (content.get_mut("packages"), previous.get("packages"))
    else {
        return 0;
    };
    let mut carried = 0;
    for (package, versions) in packages.iter_mut() {
        let Value::Object(versions) = versions else {
            continue;
        };
        for (version, metadata) in versions.iter_mut() {
            let Value::Object(metadata) = metadata else {
                continue;
            };
            if metadata.contains_key("uid") {
                continue;
            }
            let uid = recorded
                .get(package)
                .and_then(|versions| versions.get(version))
                .and_then(|metadata| metadata.get("uid"));
            if let Some(uid) = uid {
                metadata.insert("uid".to_string(), uid.clone());
                carried += 1;
            }
        }
    }
    carried
}
