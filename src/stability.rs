//! Version stability classification
//!
//! Mirrors Composer's stability rules: a version is `dev` when it is a branch
//! (`dev-*`, `*-dev`) or carries a dev suffix, otherwise the modifier after
//! the numeric part decides between alpha, beta, RC and stable.

use crate::error::MirrorError;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Stability tag derived from a version string
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stability {
    Dev,
    Alpha,
    Beta,
    RC,
    Stable,
}

impl Stability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::Dev => "dev",
            Stability::Alpha => "alpha",
            Stability::Beta => "beta",
            Stability::RC => "RC",
            Stability::Stable => "stable",
        }
    }

    pub fn is_dev(&self) -> bool {
        *self == Stability::Dev
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn modifier_regex() -> Result<&'static Regex, MirrorError> {
    static MODIFIER: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    MODIFIER
        .get_or_init(|| {
            Regex::new(
                r"(?i)[._-]?(?:(stable|beta|b|rc|alpha|a|patch|pl|p)((?:[.-]?\d+)*)?)?([.-]?dev)?(?:\+.*)?$",
            )
        })
        .as_ref()
        .map_err(|e| MirrorError::Pattern(e.clone()))
}

/// Parse the stability tag of a version string.
pub fn parse_stability(version: &str) -> Result<Stability, MirrorError> {
    let version = match version.find('#') {
        Some(idx) => &version[..idx],
        None => version,
    };
    let lower = version.to_lowercase();

    if lower.starts_with("dev-") || lower.ends_with("-dev") {
        return Ok(Stability::Dev);
    }

    let Some(captures) = modifier_regex()?.captures(&lower) else {
        return Ok(Stability::Stable);
    };

    if captures.get(3).map(|m| !m.as_str().is_empty()).unwrap_or(false) {
        return Ok(Stability::Dev);
    }

    Ok(match captures.get(1).map(|m| m.as_str()) {
        Some("beta") | Some("b") => Stability::Beta,
        Some("alpha") | Some("a") => Stability::Alpha,
        Some("rc") => Stability::RC,
        _ => Stability::Stable,
    })
}
