//! `envy sync`: resolve the manifest, run the engine, print the result map.

use crate::cli::Cli;
use anyhow::{bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use envy_config::Manifest;
use envy_depot::DepotIndex;
use envy_engine::{Engine, PkgKind};
use tracing::info;

pub fn run(cli: &Cli, manifest_path: Option<&Utf8Path>) -> Result<()> {
    let manifest_path = match manifest_path {
        Some(path) => path.to_path_buf(),
        None => discover_manifest()?,
    };
    info!(manifest = %manifest_path, "loading manifest");
    let manifest = Manifest::load(&manifest_path)?;

    let cache = super::open_cache(cli, Some(&manifest))?;

    let depot = if manifest.depots.is_empty() {
        None
    } else {
        let tmp = tempdir_for_depot(&cache)?;
        Some(DepotIndex::build(&manifest.depots, &tmp).context("building depot index")?)
    };

    if manifest.packages.is_empty() {
        bail!("manifest {manifest_path} declares no packages");
    }

    let engine = Engine::new(cache, depot);
    let results = engine.run(&manifest.packages)?;

    for (key, result) in &results {
        let kind = match result.kind {
            PkgKind::CacheManaged => "cache-managed",
            PkgKind::UserManaged => "user-managed",
            PkgKind::Unknown => "unknown",
        };
        match (&result.result_hash, &result.pkg_path) {
            (Some(hash), Some(path)) => println!("{key}\t{kind}\t{hash}\t{path}"),
            _ => println!("{key}\t{kind}"),
        }
    }
    Ok(())
}

pub(crate) fn discover_manifest() -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir().context("reading current directory")?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| anyhow::anyhow!("current directory is not UTF-8: {}", p.display()))?;
    Manifest::discover(&cwd)
        .with_context(|| format!("no envy.toml found walking up from {cwd}"))
}

fn tempdir_for_depot(cache: &envy_cache::Cache) -> Result<Utf8PathBuf> {
    let tmp = cache.root().join("tmp");
    std::fs::create_dir_all(tmp.as_std_path())
        .with_context(|| format!("creating {tmp}"))?;
    Ok(tmp)
}
