//! Integration tests for index rebuilds, private package attachment and the mirror cache

mod mirror_sync;
mod private_attach;
mod rebuild_scenarios;
