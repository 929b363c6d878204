//! The content-addressed cache.
//!
//! Entries live under `packages/` (and `recipes/`, and the `envy/` binary
//! subcache) and are published by atomically renaming `install/` to `pkg/`
//! and touching the `envy-complete` marker last. Any reader that observes
//! the marker may read `pkg/` without coordination. Mutation of an entry is
//! bracketed by an exclusive whole-file lock; the fast path never locks.

mod entry_lock;
mod export;
mod naming;
mod version;

pub use entry_lock::ScopedEntryLock;
pub use export::{import_archive, ImportOutcome};
pub use naming::{entry_name, parse_archive_filename, ParsedArchiveName, ARCHIVE_SUFFIX};
pub use version::version_newer;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::trace;

/// Marker file proving an entry (or a fetch directory) is usable.
pub const COMPLETE_MARKER: &str = "envy-complete";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Platform(#[from] envy_platform::PlatformError),

    #[error(transparent)]
    Archive(#[from] envy_archive::ArchiveError),

    #[error("invalid archive name {0:?}")]
    BadArchiveName(String),

    #[error("cache entry {0} is not complete")]
    NotComplete(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Outcome of [`Cache::ensure_pkg`] and friends.
#[derive(Debug)]
pub struct EnsureResult {
    /// The entry's `pkg/` directory. Valid to read once published.
    pub pkg_path: Utf8PathBuf,
    /// Held when the caller must produce the entry. `None` on a cache hit.
    pub lock: Option<ScopedEntryLock>,
    /// True when the fast or slow path found a published entry.
    pub already_cached: bool,
}

#[derive(Debug, Clone)]
pub struct Cache {
    root: Utf8PathBuf,
}

impl Cache {
    /// Open a cache at `root`, falling back to the platform default
    /// (`$ENVY_CACHE_ROOT`, then the per-OS cache directory).
    pub fn new(root: Option<Utf8PathBuf>) -> Result<Cache> {
        let root = match root {
            Some(root) => root,
            None => envy_platform::get_default_cache_root()?,
        };
        Ok(Cache { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn packages_dir(&self) -> Utf8PathBuf {
        self.root.join("packages")
    }

    pub fn recipes_dir(&self) -> Utf8PathBuf {
        self.root.join("recipes")
    }

    pub fn locks_dir(&self) -> Utf8PathBuf {
        self.root.join("locks")
    }

    pub fn shell_dir(&self) -> Utf8PathBuf {
        self.root.join("shell")
    }

    pub fn envy_dir(&self) -> Utf8PathBuf {
        self.root.join("envy")
    }

    /// A published entry is usable without coordination.
    pub fn is_entry_complete(entry_dir: &Utf8Path) -> bool {
        envy_platform::file_exists(&entry_dir.join(COMPLETE_MARKER))
    }

    /// Ensure a package entry exists or hand back a scoped lock to produce
    /// it. See the crate docs for the fast/slow path protocol.
    pub fn ensure_pkg(
        &self,
        key: &str,
        platform: &str,
        arch: &str,
        hash_prefix: &str,
    ) -> Result<EnsureResult> {
        let name = entry_name(key, platform, arch, hash_prefix);
        let entry_dir = self.packages_dir().join(&name);
        let lock_path = self.locks_dir().join(format!("packages.{name}.lock"));
        self.ensure_entry(&entry_dir, &lock_path)
    }

    /// Same protocol for recipe entries, keyed by identity alone.
    pub fn ensure_recipe(&self, identity: &str) -> Result<EnsureResult> {
        let entry_dir = self.recipes_dir().join(identity);
        let lock_path = self.locks_dir().join(format!("recipes.{identity}.lock"));
        self.ensure_entry(&entry_dir, &lock_path)
    }

    /// Same protocol for the envy-binary subcache.
    pub fn ensure_envy(&self, version: &str) -> Result<EnsureResult> {
        let entry_dir = self.envy_dir().join(version);
        let lock_path = self.locks_dir().join(format!("envy.{version}.lock"));
        self.ensure_entry(&entry_dir, &lock_path)
    }

    /// Refresh `envy/latest` if `version` is newer than its current content.
    pub fn write_latest(&self, version: &str) -> Result<()> {
        let latest_path = self.envy_dir().join("latest");
        let current = std::fs::read_to_string(latest_path.as_std_path()).ok();
        let current = current.as_deref().map(str::trim);

        if let Some(current) = current {
            if !current.is_empty() && !version_newer(version, current) {
                return Ok(());
            }
        }

        std::fs::create_dir_all(self.envy_dir().as_std_path()).map_err(|source| {
            CacheError::Io {
                path: self.envy_dir().to_string(),
                source,
            }
        })?;
        let tmp = self.envy_dir().join(".latest.tmp");
        std::fs::write(tmp.as_std_path(), version).map_err(|source| CacheError::Io {
            path: tmp.to_string(),
            source,
        })?;
        envy_platform::atomic_rename(&tmp, &latest_path)?;
        Ok(())
    }

    /// Export a published (or fetch-only) entry as `<entry-name>.tar.zst` in
    /// `dest_dir`. The archive extracts back into an entry directory.
    pub fn export_entry(&self, name: &str, dest_dir: &Utf8Path) -> Result<Utf8PathBuf> {
        export::export_entry(self, name, dest_dir)
    }

    fn ensure_entry(&self, entry_dir: &Utf8Path, lock_path: &Utf8Path) -> Result<EnsureResult> {
        let pkg_path = entry_dir.join("pkg");
        trace!(entry = %entry_dir, "ensure_entry: checking");

        if Self::is_entry_complete(entry_dir) {
            trace!(entry = %entry_dir, "ensure_entry: fast path, already complete");
            return Ok(EnsureResult {
                pkg_path,
                lock: None,
                already_cached: true,
            });
        }

        for dir in [&self.locks_dir(), &entry_dir.to_path_buf()] {
            std::fs::create_dir_all(dir.as_std_path()).map_err(|source| CacheError::Io {
                path: dir.to_string(),
                source,
            })?;
        }

        trace!(lock = %lock_path, "ensure_entry: blocking on file lock");
        let lock = envy_platform::FileLock::acquire(lock_path)?;

        if Self::is_entry_complete(entry_dir) {
            trace!(entry = %entry_dir, "ensure_entry: slow path, completed while waiting");
            drop(lock);
            return Ok(EnsureResult {
                pkg_path,
                lock: None,
                already_cached: true,
            });
        }

        trace!(entry = %entry_dir, "ensure_entry: cache miss, returning scoped lock");
        let scoped = ScopedEntryLock::new(entry_dir.to_path_buf(), lock)?;
        Ok(EnsureResult {
            pkg_path,
            lock: Some(scoped),
            already_cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir) -> Cache {
        let root = Utf8PathBuf::from_path_buf(dir.path().join("cache")).unwrap();
        Cache::new(Some(root)).unwrap()
    }

    fn ensure(cache: &Cache) -> EnsureResult {
        cache
            .ensure_pkg("acme.tool@v1", "linux", "x86_64", "0011223344556677")
            .unwrap()
    }

    #[test]
    fn cold_ensure_returns_lock_and_creates_dirs() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        let result = ensure(&cache);
        assert!(!result.already_cached);
        let lock = result.lock.expect("cold entry must lock");

        for sub in ["fetch", "stage", "work", "install"] {
            assert!(lock.entry_dir().join(sub).is_dir(), "{sub} missing");
        }
        assert_eq!(result.pkg_path, lock.entry_dir().join("pkg"));
        assert!(lock
            .entry_dir()
            .file_name()
            .unwrap()
            .starts_with("acme.tool@v1-linux-x86_64-blake3-"));
    }

    #[test]
    fn publish_then_fast_path() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        let result = ensure(&cache);
        let lock = result.lock.unwrap();
        fs::write(lock.install_dir().join("artifact"), b"bits").unwrap();
        lock.mark_install_complete();
        let entry_dir = lock.entry_dir().to_path_buf();
        drop(lock);

        // Published: marker present, pkg/ present, scratch dirs gone.
        assert!(Cache::is_entry_complete(&entry_dir));
        assert_eq!(fs::read(entry_dir.join("pkg/artifact")).unwrap(), b"bits");
        for sub in ["install", "work", "stage", "fetch"] {
            assert!(!entry_dir.join(sub).exists(), "{sub} leaked");
        }

        // Second ensure takes the lock-free fast path.
        let again = ensure(&cache);
        assert!(again.already_cached);
        assert!(again.lock.is_none());
        assert_eq!(again.pkg_path, entry_dir.join("pkg"));
        // No lock file left behind.
        assert!(fs::read_dir(cache.locks_dir().as_std_path())
            .map(|mut it| it.next().is_none())
            .unwrap_or(true));
    }

    #[test]
    fn preserve_fetch_survives_publish() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        let lock = ensure(&cache).lock.unwrap();
        fs::write(lock.fetch_dir().join("download.tar"), b"orig").unwrap();
        fs::write(lock.install_dir().join("artifact"), b"bits").unwrap();
        lock.mark_install_complete();
        lock.mark_preserve_fetch();
        let entry_dir = lock.entry_dir().to_path_buf();
        drop(lock);

        assert!(Cache::is_entry_complete(&entry_dir));
        assert_eq!(fs::read(entry_dir.join("fetch/download.tar")).unwrap(), b"orig");
    }

    #[test]
    fn failure_with_populated_fetch_keeps_downloads() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        {
            let lock = ensure(&cache).lock.unwrap();
            fs::write(lock.fetch_dir().join("download.tar"), b"orig").unwrap();
            // No mark_install_complete: failure path.
        }

        let result = ensure(&cache);
        assert!(!result.already_cached);
        let lock = result.lock.unwrap();
        // fetch/ survived for retry; scratch dirs were re-created clean.
        assert_eq!(fs::read(lock.fetch_dir().join("download.tar")).unwrap(), b"orig");
        assert!(fs::read_dir(lock.install_dir().as_std_path())
            .unwrap()
            .next()
            .is_none());
    }

    #[test]
    fn failure_with_empty_entry_wipes_it() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        let entry_dir = {
            let lock = ensure(&cache).lock.unwrap();
            lock.entry_dir().to_path_buf()
        };
        assert!(!entry_dir.exists(), "no-op entry should not pollute cache");
    }

    #[test]
    fn user_managed_removes_entry() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        let entry_dir = {
            let lock = ensure(&cache).lock.unwrap();
            fs::write(lock.fetch_dir().join("probe"), b"x").unwrap();
            lock.mark_user_managed();
            lock.entry_dir().to_path_buf()
        };
        assert!(!entry_dir.exists());
    }

    #[test]
    fn stage_and_work_wiped_on_each_acquisition() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        {
            let lock = ensure(&cache).lock.unwrap();
            fs::write(lock.fetch_dir().join("keep"), b"k").unwrap();
            fs::write(lock.stage_dir().join("stale"), b"s").unwrap();
            fs::write(lock.work_dir().join("stale"), b"w").unwrap();
        }

        let lock = ensure(&cache).lock.unwrap();
        assert!(!lock.stage_dir().join("stale").exists());
        assert!(!lock.work_dir().join("stale").exists());
        assert!(lock.fetch_dir().join("keep").exists());
    }

    #[test]
    fn concurrent_ensure_single_producer() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(cache_in(&dir));

        let producers = Arc::new(AtomicUsize::new(0));
        let hits = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let cache = Arc::clone(&cache);
            let producers = Arc::clone(&producers);
            let hits = Arc::clone(&hits);
            handles.push(std::thread::spawn(move || {
                let result = cache
                    .ensure_pkg("race.pkg@v1", "linux", "x86_64", "aaaabbbbccccdddd")
                    .unwrap();
                match result.lock {
                    Some(lock) => {
                        producers.fetch_add(1, Ordering::SeqCst);
                        fs::write(lock.install_dir().join("made"), b"x").unwrap();
                        lock.mark_install_complete();
                    }
                    None => {
                        assert!(result.already_cached);
                        hits.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(producers.load(Ordering::SeqCst), 1, "exactly one producer");
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn recipe_entries_use_same_protocol() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        let result = cache.ensure_recipe("acme.tool@v1").unwrap();
        let lock = result.lock.unwrap();
        fs::write(lock.install_dir().join("recipe.toml"), b"identity = 'x'").unwrap();
        lock.mark_install_complete();
        drop(lock);

        let again = cache.ensure_recipe("acme.tool@v1").unwrap();
        assert!(again.already_cached);
        assert!(again.pkg_path.join("recipe.toml").exists());
    }

    #[test]
    fn latest_only_moves_forward() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        cache.write_latest("1.2.0").unwrap();
        cache.write_latest("1.1.9").unwrap();
        let latest = fs::read_to_string(cache.envy_dir().join("latest")).unwrap();
        assert_eq!(latest, "1.2.0");

        cache.write_latest("1.10.0").unwrap();
        let latest = fs::read_to_string(cache.envy_dir().join("latest")).unwrap();
        assert_eq!(latest, "1.10.0");

        // Pre-release does not displace the release it precedes.
        cache.write_latest("1.10.0-rc.1").unwrap();
        let latest = fs::read_to_string(cache.envy_dir().join("latest")).unwrap();
        assert_eq!(latest, "1.10.0");
    }
}
