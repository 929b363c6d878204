//! `envy import`: load prebuilt archives into the cache.

use crate::cli::Cli;
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use envy_cache::{import_archive, ImportOutcome};

pub fn run(cli: &Cli, archives: &[Utf8PathBuf]) -> Result<()> {
    anyhow::ensure!(!archives.is_empty(), "no archives given");
    let cache = super::open_cache(cli, None)?;

    for archive in archives {
        let outcome = import_archive(&cache, archive)
            .with_context(|| format!("importing {archive}"))?;
        match outcome {
            ImportOutcome::Installed { key } => println!("{key}\tinstalled"),
            ImportOutcome::FetchOnly { key } => println!("{key}\tfetch-only"),
            ImportOutcome::AlreadyCached { key } => println!("{key}\talready cached"),
            ImportOutcome::Mismatch { key } => println!("{key}\tmismatch (skipped)"),
        }
    }
    Ok(())
}
