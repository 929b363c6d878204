//! Local-path sources: `file://` stripping, host validation, drive-letter
//! forms, and symlink-aware copy.

use crate::{FetchError, FetchProgress, FetchProgressFn, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

fn is_drive_letter_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return true;
    }
    bytes.len() >= 3
        && (bytes[0] == b'/' || bytes[0] == b'\\')
        && bytes[1].is_ascii_alphabetic()
        && bytes[2] == b':'
}

/// Strip a `file://` prefix, validating the host component. An empty host or
/// `localhost` resolves to the path; anything else is rejected.
fn strip_file_scheme(uri: &str) -> Result<String> {
    let mut candidate = uri[7..].to_string();

    // file:///C:/... and file:///C|/... drive forms.
    if candidate.len() >= 3 {
        let bytes = candidate.as_bytes();
        if bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && (bytes[2] == b':' || bytes[2] == b'|')
        {
            candidate.remove(0);
            if candidate.as_bytes()[1] == b'|' {
                candidate.replace_range(1..2, ":");
            }
            return Ok(candidate);
        }
    }

    if is_drive_letter_path(&candidate) {
        return Ok(candidate);
    }

    if candidate.starts_with("//") {
        return Ok(candidate);
    }

    let Some(slash) = candidate.find('/') else {
        return Ok(candidate);
    };
    let host = &candidate[..slash];
    let tail = &candidate[slash..];

    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        return Ok(tail.to_string());
    }
    Err(FetchError::InvalidLocal(format!(
        "file:// host must be empty or localhost, got {host:?} in {uri}"
    )))
}

/// Resolve a local source to an absolute, lexically normalized path.
/// Relative paths resolve against `root` (the manifest directory) or the
/// current directory.
pub fn resolve_local_source(source: &str, root: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(FetchError::InvalidLocal("empty source".to_string()));
    }

    let raw = if trimmed.len() >= 7 && trimmed[..7].eq_ignore_ascii_case("file://") {
        strip_file_scheme(trimmed)?
    } else {
        trimmed.to_string()
    };
    if raw.is_empty() {
        return Err(FetchError::InvalidLocal(format!(
            "resolved path is empty for {source:?}"
        )));
    }

    let path = Utf8PathBuf::from(raw);
    let resolved = if path.is_absolute() {
        envy_platform::paths::normalize(&path)
    } else {
        let base = match root {
            Some(root) if !root.as_str().is_empty() => envy_platform::absolutize(root),
            _ => envy_platform::absolutize(Utf8Path::new(".")),
        };
        envy_platform::paths::normalize(&base.join(path))
    };
    Ok(resolved)
}

/// Copy a file or directory tree, preserving symlinks, with per-file
/// progress.
pub fn copy_local(
    source: &Utf8Path,
    destination: &Utf8Path,
    mut progress: Option<&mut FetchProgressFn<'_>>,
) -> Result<()> {
    let mut transferred = 0u64;
    let result = copy_recursive(
        source.as_std_path(),
        destination.as_std_path(),
        &mut transferred,
        &mut progress,
    );
    if matches!(result, Err(FetchError::Aborted)) {
        let _ = envy_platform::remove_all_with_retry(destination);
    }
    result
}

fn copy_recursive(
    source: &std::path::Path,
    destination: &std::path::Path,
    transferred: &mut u64,
    progress: &mut Option<&mut FetchProgressFn<'_>>,
) -> Result<()> {
    let io_err = |path: &std::path::Path, source: std::io::Error| FetchError::Io {
        path: path.display().to_string(),
        source,
    };

    let metadata = fs::symlink_metadata(source).map_err(|e| io_err(source, e))?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(source).map_err(|e| io_err(source, e))?;
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, destination).map_err(|e| io_err(destination, e))?;
        #[cfg(windows)]
        {
            // Directory-ness of the target decides the link flavor.
            if target.is_dir() {
                std::os::windows::fs::symlink_dir(&target, destination)
                    .map_err(|e| io_err(destination, e))?;
            } else {
                std::os::windows::fs::symlink_file(&target, destination)
                    .map_err(|e| io_err(destination, e))?;
            }
        }
        return Ok(());
    }

    if file_type.is_dir() {
        fs::create_dir_all(destination).map_err(|e| io_err(destination, e))?;
        let mut entries: Vec<_> = fs::read_dir(source)
            .map_err(|e| io_err(source, e))?
            .collect::<std::io::Result<_>>()
            .map_err(|e| io_err(source, e))?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            copy_recursive(
                &entry.path(),
                &destination.join(entry.file_name()),
                transferred,
                progress,
            )?;
        }
        return Ok(());
    }

    let copied = fs::copy(source, destination).map_err(|e| io_err(destination, e))?;
    *transferred += copied;
    if let Some(cb) = progress.as_deref_mut() {
        if !cb(&FetchProgress::Transfer {
            transferred: *transferred,
            total: None,
        }) {
            return Err(FetchError::Aborted);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn file_scheme_with_empty_host() {
        assert_eq!(
            resolve_local_source("file:///tmp/x", None).unwrap(),
            "/tmp/x"
        );
    }

    #[test]
    fn file_scheme_localhost_matches_bare_form() {
        assert_eq!(
            resolve_local_source("file://localhost/tmp/x", None).unwrap(),
            resolve_local_source("file:///tmp/x", None).unwrap()
        );
    }

    #[test]
    fn file_scheme_other_host_rejected() {
        assert!(resolve_local_source("file://evil/tmp/x", None).is_err());
    }

    #[test]
    fn windows_drive_forms_strip_identically() {
        // The `C|` spelling resolves exactly like the `C:` spelling.
        assert_eq!(
            resolve_local_source("file:///C|/files/x", None).unwrap(),
            resolve_local_source("file:///C:/files/x", None).unwrap()
        );
    }

    #[cfg(windows)]
    #[test]
    fn windows_drive_forms_are_absolute() {
        assert_eq!(
            resolve_local_source("file:///C:/files/x", None).unwrap(),
            "C:/files/x"
        );
    }

    #[cfg(unix)]
    #[test]
    fn relative_resolves_against_root() {
        let resolved = resolve_local_source("sub/file", Some(Utf8Path::new("/base"))).unwrap();
        assert_eq!(resolved, "/base/sub/file");
    }

    #[cfg(unix)]
    #[test]
    fn normalization_strips_dots() {
        assert_eq!(
            resolve_local_source("/a/./b/../c", None).unwrap(),
            "/a/c"
        );
    }

    #[test]
    fn empty_is_rejected() {
        assert!(resolve_local_source("   ", None).is_err());
        assert!(resolve_local_source("file://", None).is_err());
    }
}
