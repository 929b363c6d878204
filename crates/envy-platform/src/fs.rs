//! Atomic rename, marker files, recursive delete, and existence probes.

use crate::{PlatformError, Result};
use camino::Utf8Path;
use std::fs;
use std::io;
use tracing::trace;

/// Atomically replace `to` with `from`. Fails loud on any error.
#[cfg(unix)]
pub fn atomic_rename(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    fs::rename(from.as_std_path(), to.as_std_path()).map_err(|source| PlatformError::Rename {
        from: from.to_string(),
        to: to.to_string(),
        source,
    })
}

/// Atomically replace `to` with `from` using the OS rename primitive with
/// replace-existing semantics (never copy+delete).
#[cfg(windows)]
pub fn atomic_rename(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    use std::os::windows::ffi::OsStrExt;
    use winapi::um::winbase::{MoveFileExW, MOVEFILE_REPLACE_EXISTING, MOVEFILE_WRITE_THROUGH};

    fn wide(p: &Utf8Path) -> Vec<u16> {
        p.as_std_path()
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect()
    }

    let from_w = wide(from);
    let to_w = wide(to);
    let ok = unsafe {
        MoveFileExW(
            from_w.as_ptr(),
            to_w.as_ptr(),
            MOVEFILE_REPLACE_EXISTING | MOVEFILE_WRITE_THROUGH,
        )
    };
    if ok == 0 {
        return Err(PlatformError::Rename {
            from: from.to_string(),
            to: to.to_string(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Create an empty file and make its existence immediately visible to other
/// processes.
#[cfg(unix)]
pub fn touch_file(path: &Utf8Path) -> Result<()> {
    fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path.as_std_path())
        .map(|_| ())
        .map_err(|source| PlatformError::Touch {
            path: path.to_string(),
            source,
        })
}

/// Create an empty file and flush both the file and its parent directory so
/// concurrent processes observe the marker without cache-staleness races.
#[cfg(windows)]
pub fn touch_file(path: &Utf8Path) -> Result<()> {
    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path.as_std_path())
        .map_err(|source| PlatformError::Touch {
            path: path.to_string(),
            source,
        })?;
    file.sync_all().map_err(|source| PlatformError::Touch {
        path: path.to_string(),
        source,
    })?;
    drop(file);

    if let Some(parent) = path.parent() {
        flush_directory(parent)?;
    }
    Ok(())
}

/// Flush a directory's metadata to disk.
#[cfg(windows)]
fn flush_directory(dir: &Utf8Path) -> Result<()> {
    use std::os::windows::ffi::OsStrExt;
    use std::os::windows::io::FromRawHandle;
    use winapi::um::fileapi::{CreateFileW, FlushFileBuffers, OPEN_EXISTING};
    use winapi::um::handleapi::INVALID_HANDLE_VALUE;
    use winapi::um::winbase::FILE_FLAG_BACKUP_SEMANTICS;
    use winapi::um::winnt::{FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, GENERIC_READ};

    let wide: Vec<u16> = dir
        .as_std_path()
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    // FILE_FLAG_BACKUP_SEMANTICS is required to open a directory handle.
    let handle = unsafe {
        CreateFileW(
            wide.as_ptr(),
            GENERIC_READ,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            std::ptr::null_mut(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS,
            std::ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(PlatformError::Touch {
            path: dir.to_string(),
            source: io::Error::last_os_error(),
        });
    }
    let ok = unsafe { FlushFileBuffers(handle) };
    // Take ownership so the handle closes on drop regardless of flush result.
    let _file = unsafe { fs::File::from_raw_handle(handle as _) };
    if ok == 0 {
        return Err(PlatformError::Touch {
            path: dir.to_string(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Recursively delete `path`. Missing targets are not an error.
///
/// On POSIX a single unlink pass suffices: deletion works even with open
/// handles.
#[cfg(unix)]
pub fn remove_all_with_retry(path: &Utf8Path) -> Result<()> {
    match fs::remove_dir_all(path.as_std_path()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
            fs::remove_file(path.as_std_path()).map_err(|source| PlatformError::Remove {
                path: path.to_string(),
                source,
            })
        }
        Err(source) => Err(PlatformError::Remove {
            path: path.to_string(),
            source,
        }),
    }
}

/// Recursively delete `path`, retrying with exponential backoff on
/// sharing-violation, lock-violation, and access-denied errors. Antivirus
/// and indexer services routinely hold transient handles on freshly written
/// files.
#[cfg(windows)]
pub fn remove_all_with_retry(path: &Utf8Path) -> Result<()> {
    use std::thread;
    use std::time::Duration;

    const ERROR_SHARING_VIOLATION: i32 = 32;
    const ERROR_LOCK_VIOLATION: i32 = 33;
    const ERROR_ACCESS_DENIED: i32 = 5;
    const BACKOFF_MS: [u64; 6] = [50, 100, 200, 400, 800, 1600];

    fn is_transient(e: &io::Error) -> bool {
        matches!(
            e.raw_os_error(),
            Some(ERROR_SHARING_VIOLATION) | Some(ERROR_LOCK_VIOLATION) | Some(ERROR_ACCESS_DENIED)
        )
    }

    fn remove_once(path: &Utf8Path) -> io::Result<()> {
        match fs::remove_dir_all(path.as_std_path()) {
            Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
                fs::remove_file(path.as_std_path())
            }
            other => other,
        }
    }

    let mut last = match remove_once(path) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => e,
    };

    for delay in BACKOFF_MS {
        if !is_transient(&last) {
            break;
        }
        trace!(path = %path, delay_ms = delay, "remove_all: transient error, backing off");
        thread::sleep(Duration::from_millis(delay));
        last = match remove_once(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => e,
        };
    }

    Err(PlatformError::Remove {
        path: path.to_string(),
        source: last,
    })
}

/// Existence check that bypasses directory-listing caches.
///
/// Directory enumeration results are not authoritative for cross-process
/// visibility on Windows, so the probe there opens the path instead of
/// consulting attributes.
#[cfg(unix)]
pub fn file_exists(path: &Utf8Path) -> bool {
    path.as_std_path().exists()
}

#[cfg(windows)]
pub fn file_exists(path: &Utf8Path) -> bool {
    match fs::File::open(path.as_std_path()) {
        Ok(_) => true,
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => false,
            // Directories and locked files refuse a plain open but exist.
            _ => fs::metadata(path.as_std_path()).is_ok(),
        },
    }
}
