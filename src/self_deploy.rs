//! Deploy the running binary into `cache_root/envy/<version>/` using the
//! normal entry publish protocol, and refresh the sibling `latest` file.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use envy_cache::Cache;

/// Manifest grammar reference deployed alongside the binary so editors and
/// tooling can pick it up without a checkout.
const MANIFEST_REFERENCE: &str = r#"# envy.toml reference

[envy]
# cache_root = "~/.cache/envy"      # optional cache root override
# depots = ["https://.../depot.txt"] # optional prebuilt-archive indexes

[[package]]
# identity = "namespace.name@revision"       required
# source = "https://..." | { git = "...", ref = "..." } | { path = "..." }
#          | { fetch = "cmd", dependencies = ["ns.name@rev"] }
# sha256 = "..."                              optional, remote sources
# options = { key = "value" }                 optional, part of the cache key
# needed_by = "fetch"                         optional phase annotation
# reference = true                            reference-only dependency
# weak = { identity = "...", source = ... }   fallback configuration
"#;

/// Copy the current executable into the envy subcache and bump `latest`.
/// Returns the deployed binary path.
pub fn deploy(cache: &Cache) -> Result<Utf8PathBuf> {
    let version = crate::envy_version();
    let exe = envy_platform::current_exe().context("resolving current executable")?;
    let binary_name = exe.file_name().unwrap_or("envy").to_string();

    let ensured = cache
        .ensure_envy(version)
        .with_context(|| format!("ensuring envy/{version}"))?;

    if !ensured.already_cached {
        let lock = ensured.lock.expect("cache miss returns a lock");
        let dest = lock.install_dir().join(&binary_name);
        std::fs::copy(exe.as_std_path(), dest.as_std_path())
            .with_context(|| format!("copying {exe} to {dest}"))?;
        std::fs::write(
            lock.install_dir().join("envy-manifest-reference.toml").as_std_path(),
            MANIFEST_REFERENCE,
        )
        .context("writing manifest reference")?;
        lock.mark_install_complete();
    }

    cache
        .write_latest(version)
        .context("updating envy/latest")?;

    Ok(ensured.pkg_path.join(binary_name))
}
