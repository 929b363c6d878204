//! `envy export`: package a published cache entry for a depot.

use crate::cli::Cli;
use anyhow::{Context, Result};
use camino::Utf8Path;

pub fn run(cli: &Cli, entry: &str, dest_dir: &Utf8Path) -> Result<()> {
    let cache = super::open_cache(cli, None)?;
    let archive = cache
        .export_entry(entry, dest_dir)
        .with_context(|| format!("exporting {entry}"))?;
    println!("{archive}");
    Ok(())
}
