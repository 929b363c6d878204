//! Deterministic tar+zstd producer.
//!
//! Entries are emitted in sorted path order with normalized ownership,
//! modes, and timestamps, so two archives of identical trees are
//! byte-identical.

use crate::{ArchiveError, ArchiveProgress, ProgressFn, Result};
use camino::Utf8Path;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

const ZSTD_LEVEL: i32 = 3;

const FILE_MODE: u32 = 0o644;
const EXEC_MODE: u32 = 0o755;
const DIR_MODE: u32 = 0o755;

/// Create a tar.zst archive of `source_dir` rooted at `prefix/…`, so the
/// consumer can extract directly into a package entry directory.
pub fn create_tar_zst(
    out: &Utf8Path,
    source_dir: &Utf8Path,
    prefix: &str,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> Result<()> {
    let (total_files, total_bytes) = prescan(source_dir)?;
    debug!(out = %out, source = %source_dir, prefix, total_files, total_bytes, "create tar.zst");

    let mut snapshot = ArchiveProgress {
        total_files: Some(total_files),
        total_bytes: Some(total_bytes),
        ..Default::default()
    };

    let file = File::create(out.as_std_path()).map_err(|source| ArchiveError::Io {
        path: out.to_string(),
        source,
    })?;
    let encoder = zstd::stream::write::Encoder::new(BufWriter::new(file), ZSTD_LEVEL)?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in sorted_entries(source_dir) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(source_dir.as_std_path())
            .expect("walkdir yields children of the root");
        if rel.as_os_str().is_empty() {
            continue;
        }
        let arch_path = Path::new(prefix).join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            let mut header = blank_header(tar::EntryType::Directory, DIR_MODE, 0);
            builder.append_data(&mut header, &arch_path, std::io::empty())?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path()).map_err(|source| ArchiveError::Io {
                path: entry.path().display().to_string(),
                source,
            })?;
            let mut header = blank_header(tar::EntryType::Symlink, 0o777, 0);
            builder.append_link(&mut header, &arch_path, &target)?;
        } else if file_type.is_file() {
            let metadata = entry.metadata().map_err(|e| ArchiveError::Io {
                path: entry.path().display().to_string(),
                source: std::io::Error::other(e),
            })?;
            let mode = if is_executable(&metadata) {
                EXEC_MODE
            } else {
                FILE_MODE
            };
            let mut header = blank_header(tar::EntryType::Regular, mode, metadata.len());
            let reader = File::open(entry.path()).map_err(|source| ArchiveError::Io {
                path: entry.path().display().to_string(),
                source,
            })?;
            builder.append_data(&mut header, &arch_path, reader)?;

            snapshot.files_processed += 1;
            snapshot.bytes_processed += metadata.len();
            if let Some(cb) = progress.as_deref_mut() {
                if !cb(&snapshot) {
                    return Err(ArchiveError::Aborted);
                }
            }
        }
        // Other file types (sockets, fifos) are not carried by the archive.
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Count regular files and their total size up front so the progress totals
/// are known.
fn prescan(source_dir: &Utf8Path) -> Result<(u64, u64)> {
    let mut files = 0u64;
    let mut bytes = 0u64;
    for entry in WalkDir::new(source_dir.as_std_path()) {
        let entry = entry.map_err(walk_err)?;
        if entry.file_type().is_file() {
            files += 1;
            bytes += entry
                .metadata()
                .map(|m| m.len())
                .map_err(|e| ArchiveError::Io {
                    path: entry.path().display().to_string(),
                    source: std::io::Error::other(e),
                })?;
        }
    }
    Ok((files, bytes))
}

fn sorted_entries(
    source_dir: &Utf8Path,
) -> impl Iterator<Item = std::result::Result<walkdir::DirEntry, ArchiveError>> {
    WalkDir::new(source_dir.as_std_path())
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .map(|r| r.map_err(walk_err))
}

fn walk_err(e: walkdir::Error) -> ArchiveError {
    let path = e
        .path()
        .map(Path::display)
        .map(|d| d.to_string())
        .unwrap_or_else(|| "<walk>".to_string());
    ArchiveError::Io {
        path,
        source: std::io::Error::other(e),
    }
}

fn blank_header(entry_type: tar::EntryType, mode: u32, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}
