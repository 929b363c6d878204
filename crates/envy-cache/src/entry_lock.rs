//! The scoped entry lock and its publish-or-cleanup protocol.

use crate::{CacheError, Result, COMPLETE_MARKER};
use camino::{Utf8Path, Utf8PathBuf};
use envy_platform::FileLock;
use std::cell::Cell;
use std::fs;
use tracing::{error, trace};

/// Owns the OS lock on a cache entry while it is produced. On drop:
///
/// - install marked complete: remove stale `pkg/`, atomically rename
///   `install/` to `pkg/`, remove scratch dirs (and `fetch/` unless
///   preserved), then touch `envy-complete` last.
/// - marked user-managed: remove the whole entry, leaving no trace.
/// - otherwise (failure): remove `install/`, `work/`, `stage/`. If both
///   `install/` and `fetch/` were empty, remove the entry entirely;
///   otherwise leave `fetch/` so a retry reuses partial downloads.
///
/// The OS lock is released and the lock file removed (best effort) after
/// the protocol runs.
#[derive(Debug)]
pub struct ScopedEntryLock {
    entry_dir: Utf8PathBuf,
    install_complete: Cell<bool>,
    user_managed: Cell<bool>,
    preserve_fetch: Cell<bool>,
    // Dropped last: fields drop in declaration order.
    _file_lock: FileLock,
}

impl ScopedEntryLock {
    pub(crate) fn new(entry_dir: Utf8PathBuf, file_lock: FileLock) -> Result<Self> {
        let lock = Self {
            entry_dir,
            install_complete: Cell::new(false),
            user_managed: Cell::new(false),
            preserve_fetch: Cell::new(false),
            _file_lock: file_lock,
        };

        trace!(entry = %lock.entry_dir, "scoped lock: resetting scratch state");
        // pkg/ may be a leftover from a prior failed publish; install/work/
        // stage are ephemeral. fetch/ is deliberately preserved so retries
        // reuse downloads.
        for dir in [
            lock.pkg_dir(),
            lock.install_dir(),
            lock.work_dir(),
            lock.stage_dir(),
        ] {
            envy_platform::remove_all_with_retry(&dir)?;
        }
        for dir in [
            lock.fetch_dir(),
            lock.install_dir(),
            lock.work_dir(),
            lock.stage_dir(),
        ] {
            fs::create_dir_all(dir.as_std_path()).map_err(|source| CacheError::Io {
                path: dir.to_string(),
                source,
            })?;
        }
        Ok(lock)
    }

    pub fn entry_dir(&self) -> &Utf8Path {
        &self.entry_dir
    }

    pub fn pkg_dir(&self) -> Utf8PathBuf {
        self.entry_dir.join("pkg")
    }

    pub fn install_dir(&self) -> Utf8PathBuf {
        self.entry_dir.join("install")
    }

    pub fn stage_dir(&self) -> Utf8PathBuf {
        self.entry_dir.join("stage")
    }

    pub fn work_dir(&self) -> Utf8PathBuf {
        self.entry_dir.join("work")
    }

    pub fn fetch_dir(&self) -> Utf8PathBuf {
        self.entry_dir.join("fetch")
    }

    /// Publish on drop.
    pub fn mark_install_complete(&self) {
        self.install_complete.set(true);
    }

    pub fn is_install_complete(&self) -> bool {
        self.install_complete.get()
    }

    /// Drop the fetch directory's completion marker now. Fetch-only entries
    /// stay usable for depot imports without a published `pkg/`.
    pub fn mark_fetch_complete(&self) -> Result<()> {
        let dir = self.fetch_dir();
        fs::create_dir_all(dir.as_std_path()).map_err(|source| CacheError::Io {
            path: dir.to_string(),
            source,
        })?;
        envy_platform::touch_file(&dir.join(COMPLETE_MARKER))?;
        Ok(())
    }

    pub fn is_fetch_complete(&self) -> bool {
        envy_platform::file_exists(&self.fetch_dir().join(COMPLETE_MARKER))
    }

    /// The package is managed by the host; remove the entry on drop.
    pub fn mark_user_managed(&self) {
        self.user_managed.set(true);
    }

    /// Keep `fetch/` after a successful publish (for export).
    pub fn mark_preserve_fetch(&self) {
        self.preserve_fetch.set(true);
    }
}

fn remove_quiet(target: &Utf8Path) {
    if let Err(e) = envy_platform::remove_all_with_retry(target) {
        error!(target = %target, "failed to remove: {e}");
    }
}

fn dir_is_empty(dir: &Utf8Path) -> bool {
    match fs::read_dir(dir.as_std_path()) {
        Ok(mut entries) => entries.next().is_none(),
        // Conservative: treat unreadable as non-empty.
        Err(_) => false,
    }
}

impl Drop for ScopedEntryLock {
    fn drop(&mut self) {
        let entry = &self.entry_dir;
        trace!(
            entry = %entry,
            complete = self.install_complete.get(),
            user_managed = self.user_managed.get(),
            "scoped lock: drop"
        );

        if self.install_complete.get() {
            remove_quiet(&self.pkg_dir());
            if let Err(e) = envy_platform::atomic_rename(&self.install_dir(), &self.pkg_dir()) {
                error!(entry = %entry, "publish rename failed: {e}");
                // Leave the entry unpublished; the marker is never written
                // so readers cannot observe partial state.
                return;
            }
            remove_quiet(&self.work_dir());
            remove_quiet(&self.stage_dir());
            if !self.preserve_fetch.get() {
                remove_quiet(&self.fetch_dir());
            }
            // Written last: any reader seeing the marker sees a full pkg/.
            if let Err(e) = envy_platform::touch_file(&entry.join(COMPLETE_MARKER)) {
                error!(entry = %entry, "failed to write completion marker: {e}");
            }
        } else if self.user_managed.get() {
            remove_quiet(entry);
        } else {
            let install_empty = dir_is_empty(&self.install_dir());
            let fetch_empty = dir_is_empty(&self.fetch_dir());

            remove_quiet(&self.install_dir());
            remove_quiet(&self.work_dir());
            remove_quiet(&self.stage_dir());

            if install_empty && fetch_empty {
                // Nothing worth keeping: avoid polluting the cache with a
                // no-op entry.
                remove_quiet(entry);
            }
        }
        // FileLock drops after this block, releasing the OS lock and
        // removing the lock file best-effort.
    }
}
