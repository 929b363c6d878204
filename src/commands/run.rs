//! `envy run`: sync the manifest, then replace this process with the given
//! command, with every package's `bin/` directory prepended to `PATH` and
//! `ENVY_PROJECT_ROOT` pointing at the manifest's directory.

use crate::cli::Cli;
use anyhow::{bail, Context, Result};
use camino::Utf8Path;
use envy_config::Manifest;
use envy_engine::Engine;

pub fn run(cli: &Cli, manifest_path: Option<&Utf8Path>, argv: &[String]) -> Result<()> {
    anyhow::ensure!(!argv.is_empty(), "no command given");

    let manifest_path = match manifest_path {
        Some(path) => path.to_path_buf(),
        None => super::sync::discover_manifest()?,
    };
    let manifest = Manifest::load(&manifest_path)?;
    if manifest.packages.is_empty() {
        bail!("manifest {manifest_path} declares no packages");
    }
    let project_root =
        envy_platform::absolutize(manifest_path.parent().unwrap_or(Utf8Path::new(".")));

    let cache = super::open_cache(cli, Some(&manifest))?;
    let results = Engine::new(cache, None).run(&manifest.packages)?;

    let mut bin_dirs = Vec::new();
    for result in results.values() {
        if let Some(pkg) = &result.pkg_path {
            let bin = pkg.join("bin");
            if bin.is_dir() {
                bin_dirs.push(bin.to_string());
            }
        }
    }

    let sep = if cfg!(windows) { ";" } else { ":" };
    let path = match std::env::var("PATH") {
        Ok(existing) if !bin_dirs.is_empty() => {
            format!("{}{sep}{existing}", bin_dirs.join(sep))
        }
        Ok(existing) => existing,
        Err(_) => bin_dirs.join(sep),
    };

    // The engine is done; no worker threads are reading the environment.
    envy_platform::set_env_var("PATH", &path);
    envy_platform::set_env_var("ENVY_PROJECT_ROOT", project_root.as_str());
    let env = envy_platform::get_environment();

    // Replaces the process image on POSIX; on Windows the child is spawned,
    // waited on, and its exit code becomes ours. Returns only on error.
    let err = match envy_platform::exec_process(Utf8Path::new(&argv[0]), &argv[1..], env) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    Err(err).with_context(|| format!("launching {:?}", argv[0]))
}
