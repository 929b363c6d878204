//! `envy deploy-hooks`: write shell integration hooks and deploy the
//! running binary into the cache's envy subcache.

use crate::cli::Cli;
use anyhow::{Context, Result};

pub fn run(cli: &Cli) -> Result<()> {
    let cache = super::open_cache(cli, None)?;

    let written = crate::shell_hooks::write_hooks(&cache).context("writing shell hooks")?;
    for path in written {
        println!("{path}");
    }

    let deployed = crate::self_deploy::deploy(&cache).context("deploying envy binary")?;
    println!("{deployed}");
    Ok(())
}
