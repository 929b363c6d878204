//! Command implementations. Each module exposes one `run` consumed by the
//! CLI dispatcher.

pub mod deploy_hooks;
pub mod export;
pub mod extract;
pub mod fetch;
pub mod hash;
pub mod import;
pub mod run;
pub mod sync;

use crate::cli::Cli;
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use envy_cache::Cache;
use envy_config::Manifest;

/// Cache-root precedence: CLI flag, then manifest metadata, then the
/// platform default.
pub(crate) fn open_cache(cli: &Cli, manifest: Option<&Manifest>) -> Result<Cache> {
    let root: Option<Utf8PathBuf> = match &cli.cache_root {
        Some(root) => Some(root.clone()),
        None => match manifest.and_then(|m| m.cache_root.as_deref()) {
            Some(root) => Some(
                envy_platform::expand_path(root.as_str())
                    .with_context(|| format!("expanding manifest cache_root {root}"))?,
            ),
            None => None,
        },
    };
    Cache::new(root).context("opening cache")
}
