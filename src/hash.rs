//! Hash computation for index documents
//!
//! Documents are serialized as compact JSON in insertion order, so the same
//! content always produces the same bytes and therefore the same digest.

use crate::error::MirrorError;
use crate::types::HexDigest;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Digest algorithm declared by a reference entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaMethod {
    Sha1,
    Sha256,
}

impl ShaMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShaMethod::Sha1 => "sha1",
            ShaMethod::Sha256 => "sha256",
        }
    }
}

impl Default for ShaMethod {
    fn default() -> Self {
        ShaMethod::Sha256
    }
}

impl fmt::Display for ShaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShaMethod {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(ShaMethod::Sha1),
            "sha256" => Ok(ShaMethod::Sha256),
            other => Err(MirrorError::HashMethodUnsupported(other.to_string())),
        }
    }
}

/// Serialize document content to its canonical bytes.
pub fn serialize(content: &Map<String, Value>) -> Result<Vec<u8>, MirrorError> {
    serde_json::to_vec(content)
        .map_err(|e| MirrorError::parse("<document>", format!("serialization failed: {}", e)))
}

/// Compute the hex digest of raw bytes.
pub fn digest(bytes: &[u8], method: ShaMethod) -> HexDigest {
    match method {
        ShaMethod::Sha1 => hex::encode(Sha1::digest(bytes)),
        ShaMethod::Sha256 => hex::encode(Sha256::digest(bytes)),
    }
}

/// Serialize and digest in one step, returning both.
pub fn digest_content(
    content: &Map<String, Value>,
    method: ShaMethod,
) -> Result<(Vec<u8>, HexDigest), MirrorError> {
    let bytes = serialize(content)?;
    let hash = digest(&bytes, method);
    Ok((bytes, hash))
}
