//! `envy extract`: one-shot archive extraction.

use anyhow::{Context, Result};
use camino::Utf8Path;

pub fn run(archive: &Utf8Path, destination: &Utf8Path) -> Result<()> {
    let count = envy_archive::extract(archive, destination, None)
        .with_context(|| format!("extracting {archive}"))?;
    println!("{count} files extracted to {destination}");
    Ok(())
}
