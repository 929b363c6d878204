//! `envy hash`: print file digests.

use anyhow::{Context, Result};
use camino::Utf8Path;

pub fn run(file: &Utf8Path) -> Result<()> {
    let sha256 = envy_hash::sha256_file_hex(file).with_context(|| format!("hashing {file}"))?;
    let bytes = std::fs::read(file.as_std_path()).with_context(|| format!("reading {file}"))?;
    let blake3 = envy_hash::blake3_hex(&bytes);

    println!("sha256  {sha256}");
    println!("blake3  {blake3}");
    Ok(())
}
