//! Cross-process advisory file locks with in-process thread exclusion.
//!
//! OS advisory locks are per-process: two threads in one process can both
//! "own" the same file lock. The registry below serializes threads on the
//! canonicalized lock path first, then takes the OS lock, so exactly one
//! owner exists per path per process and processes serialize on the OS lock.

use crate::{PlatformError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fd_lock::RwLock;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::sync::{Condvar, Mutex};
use tracing::trace;

/// Paths currently locked by this process. Threads wait on the condvar until
/// the path they want is released.
struct PathRegistry {
    held: Mutex<HashSet<Utf8PathBuf>>,
    released: Condvar,
}

static REGISTRY: Lazy<PathRegistry> = Lazy::new(|| PathRegistry {
    held: Mutex::new(HashSet::new()),
    released: Condvar::new(),
});

impl PathRegistry {
    fn acquire(&self, path: &Utf8Path) {
        let mut held = self.held.lock().expect("lock registry poisoned");
        while held.contains(path) {
            held = self.released.wait(held).expect("lock registry poisoned");
        }
        held.insert(path.to_owned());
    }

    fn release(&self, path: &Utf8Path) {
        let mut held = self.held.lock().expect("lock registry poisoned");
        held.remove(path);
        self.released.notify_all();
    }
}

/// An exclusive whole-file lock. Blocks on construction until both the
/// in-process registry slot and the OS lock are held. Dropping releases the
/// OS lock, frees the registry slot, and best-effort removes the lock file.
pub struct FileLock {
    // Present until drop; closing the file handle releases the OS lock.
    file: Option<RwLock<fs::File>>,
    path: Utf8PathBuf,
    registry_key: Utf8PathBuf,
}

impl FileLock {
    /// Open (creating if needed) `path` and block until an exclusive lock is
    /// held.
    pub fn acquire(path: &Utf8Path) -> Result<Self> {
        // Different spellings of the same path must map to one registry slot.
        let registry_key = crate::paths::absolutize(path);

        trace!(path = %path, "file_lock: waiting on in-process registry");
        REGISTRY.acquire(&registry_key);

        let open = || -> std::io::Result<fs::File> {
            OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path.as_std_path())
        };

        let file = match open() {
            Ok(f) => f,
            Err(source) => {
                REGISTRY.release(&registry_key);
                return Err(PlatformError::LockOpen {
                    path: path.to_string(),
                    source,
                });
            }
        };

        trace!(path = %path, "file_lock: blocking on OS lock");
        let mut os_lock = RwLock::new(file);
        match os_lock.write() {
            Ok(guard) => {
                // The guard borrows `os_lock`; forgetting it keeps the OS
                // lock held until the file handle is closed at drop.
                std::mem::forget(guard);
            }
            Err(source) => {
                REGISTRY.release(&registry_key);
                return Err(PlatformError::LockAcquire {
                    path: path.to_string(),
                    source,
                });
            }
        }
        trace!(path = %path, "file_lock: acquired");

        Ok(Self {
            file: Some(os_lock),
            path: path.to_owned(),
            registry_key,
        })
    }

    /// The lock file path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("path", &self.path)
            .field("file", &"<RwLock>")
            .finish()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the handle releases the OS lock on every platform.
        self.file.take();
        REGISTRY.release(&self.registry_key);

        // Removal is best-effort; correctness never depends on the lock file
        // being gone.
        let _ = fs::remove_file(self.path.as_std_path());
        trace!(path = %self.path, "file_lock: released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn lock_file_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir, "entry.lock");

        {
            let lock = FileLock::acquire(&path).unwrap();
            assert!(path.exists());
            assert_eq!(lock.path(), path);
        }

        assert!(!path.exists());
    }

    #[test]
    fn reacquire_after_release() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir, "entry.lock");

        drop(FileLock::acquire(&path).unwrap());
        drop(FileLock::acquire(&path).unwrap());
    }

    #[test]
    fn threads_serialize_on_same_path() {
        let dir = TempDir::new().unwrap();
        let path = Arc::new(utf8(&dir, "entry.lock"));

        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let path = Arc::clone(&path);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(thread::spawn(move || {
                let _lock = FileLock::acquire(&path).unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_paths_do_not_contend() {
        let dir = TempDir::new().unwrap();
        let a = utf8(&dir, "a.lock");
        let b = utf8(&dir, "b.lock");

        let _la = FileLock::acquire(&a).unwrap();
        // Must not block.
        let _lb = FileLock::acquire(&b).unwrap();
    }

    #[test]
    fn relative_and_absolute_spellings_share_a_slot() {
        let dir = TempDir::new().unwrap();
        let abs = utf8(&dir, "same.lock");
        let noisy = Utf8PathBuf::from(format!("{}/./same.lock", dir.path().display()));

        let held = FileLock::acquire(&abs).unwrap();

        let noisy2 = noisy.clone();
        let t = thread::spawn(move || {
            let start = std::time::Instant::now();
            let _l = FileLock::acquire(&noisy2).unwrap();
            start.elapsed()
        });

        thread::sleep(Duration::from_millis(50));
        drop(held);
        let waited = t.join().unwrap();
        assert!(waited >= Duration::from_millis(40));
    }
}
