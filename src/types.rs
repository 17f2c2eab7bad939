//! Core types shared across the index builder and the mirror cache.

/// Uid: monotonic identifier assigned once to every package version
pub type Uid = u64;

/// HexDigest: lowercase hex encoding of a sha1 or sha256 digest
pub type HexDigest = String;

/// Name of the root index document, relative to the repository base
pub const ROOT_INDEX: &str = "packages.json";
