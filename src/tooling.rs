//! Tooling & Integration Layer
//!
//! Command-line entry points for build, rebuild and mirror runs.

pub mod cli;

pub use cli::{Cli, CliContext, Commands};
