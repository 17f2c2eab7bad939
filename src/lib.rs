//! pkgmirror: Content-Addressed Repository Index Builder
//!
//! Builds and mirrors Composer-style repository indexes: a tree of JSON
//! documents where parents reference children by content digest and
//! hash-templated documents are renamed whenever their content changes.

pub mod builder;
pub mod concurrency;
pub mod config;
pub mod document;
pub mod error;
pub mod hash;
pub mod logging;
pub mod mirror;
pub mod private;
pub mod publish;
pub mod remote;
pub mod stability;
pub mod store;
pub mod template;
pub mod tooling;
pub mod transform;
pub mod types;
