//! envy - a freeform, content-addressed package manager.
//!
//! Projects declare packages by identity and revision in `envy.toml`; the
//! engine resolves the dependency graph, runs per-package phase pipelines
//! in parallel, and publishes immutable package directories into a
//! multi-process-safe cache by atomic rename.

pub mod cli;
pub mod commands;
pub mod self_deploy;
pub mod shell_hooks;

pub use envy_cache::Cache;
pub use envy_config::Manifest;
pub use envy_engine::{Engine, PkgKind};

/// The running envy version.
#[must_use]
pub fn envy_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
