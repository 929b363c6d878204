//! Entry export and prebuilt-archive import.
//!
//! An export archive extracts back into an entry directory: published
//! entries pack `pkg/` under an `install/` prefix so import republishes via
//! the normal rename protocol; fetch-only entries pack `fetch/`.

use crate::naming::{parse_archive_filename, ARCHIVE_SUFFIX};
use crate::{Cache, CacheError, Result, COMPLETE_MARKER};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

/// Export the entry named `name` as `<name>.tar.zst` in `dest_dir`.
pub fn export_entry(cache: &Cache, name: &str, dest_dir: &Utf8Path) -> Result<Utf8PathBuf> {
    // Validates the naming rule so depot manifests stay parseable.
    parse_archive_filename(name)?;

    let entry_dir = cache.packages_dir().join(name);
    let out = dest_dir.join(format!("{name}{ARCHIVE_SUFFIX}"));
    std::fs::create_dir_all(dest_dir.as_std_path()).map_err(|source| CacheError::Io {
        path: dest_dir.to_string(),
        source,
    })?;

    if Cache::is_entry_complete(&entry_dir) {
        debug!(entry = %entry_dir, out = %out, "exporting published entry");
        envy_archive::create_tar_zst(&out, &entry_dir.join("pkg"), "install", None)?;
        return Ok(out);
    }
    if envy_platform::file_exists(&entry_dir.join("fetch").join(COMPLETE_MARKER)) {
        debug!(entry = %entry_dir, out = %out, "exporting fetch-only entry");
        envy_archive::create_tar_zst(&out, &entry_dir.join("fetch"), "fetch", None)?;
        return Ok(out);
    }

    Err(CacheError::NotComplete(entry_dir.to_string()))
}

/// What an imported archive turned out to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// `install/` was populated; the entry is now published.
    Installed { key: String },
    /// Only `fetch/` was populated; kept as a fetch-only entry.
    FetchOnly { key: String },
    /// The entry was already published; nothing imported.
    AlreadyCached { key: String },
    /// The archive contained neither; nothing was kept.
    Mismatch { key: String },
}

/// Import a `<entry-name>.tar.zst` archive into the cache.
pub fn import_archive(cache: &Cache, archive: &Utf8Path) -> Result<ImportOutcome> {
    let file_name = archive
        .file_name()
        .ok_or_else(|| CacheError::BadArchiveName(archive.to_string()))?;
    let stem = file_name
        .strip_suffix(ARCHIVE_SUFFIX)
        .ok_or_else(|| CacheError::BadArchiveName(file_name.to_string()))?;
    let parsed = parse_archive_filename(stem)?;

    let result = cache.ensure_pkg(
        &parsed.key,
        &parsed.platform,
        &parsed.arch,
        &parsed.hash_prefix,
    )?;
    let Some(lock) = result.lock else {
        return Ok(ImportOutcome::AlreadyCached { key: parsed.key });
    };

    debug!(archive = %archive, entry = %lock.entry_dir(), "importing archive");
    envy_archive::extract(archive, lock.entry_dir(), None)?;

    if dir_has_entries(&lock.install_dir()) {
        lock.mark_install_complete();
        return Ok(ImportOutcome::Installed { key: parsed.key });
    }
    if dir_has_entries(&lock.fetch_dir()) {
        lock.mark_fetch_complete()?;
        lock.mark_preserve_fetch();
        return Ok(ImportOutcome::FetchOnly { key: parsed.key });
    }

    warn!(archive = %archive, "imported archive contained neither install/ nor fetch/ content");
    Ok(ImportOutcome::Mismatch { key: parsed.key })
}

fn dir_has_entries(dir: &Utf8Path) -> bool {
    std::fs::read_dir(dir.as_std_path())
        .map(|mut it| it.next().is_some())
        .unwrap_or(false)
}
