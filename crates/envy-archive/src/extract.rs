//! Streaming extraction with traversal protection.

use crate::sniff::{sniff_format, ArchiveFormat};
use crate::{ArchiveError, ArchiveProgress, ProgressFn, Result};
use camino::Utf8Path;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path};
use tracing::debug;

/// Extract `archive` into `destination`, creating it if missing. Returns the
/// number of regular files extracted.
pub fn extract(
    archive: &Utf8Path,
    destination: &Utf8Path,
    progress: Option<&mut ProgressFn<'_>>,
) -> Result<u64> {
    let format = sniff_format(archive)?;
    debug!(archive = %archive, ?format, dest = %destination, "extract");

    if destination.exists() && !destination.is_dir() {
        return Err(ArchiveError::NotADirectory(destination.to_string()));
    }
    fs::create_dir_all(destination.as_std_path()).map_err(|source| ArchiveError::Io {
        path: destination.to_string(),
        source,
    })?;

    let file = File::open(archive.as_std_path()).map_err(|source| ArchiveError::Io {
        path: archive.to_string(),
        source,
    })?;

    match format {
        ArchiveFormat::Zip => extract_zip(file, destination, progress),
        ArchiveFormat::Tar => extract_tar(BufReader::new(file), destination, progress),
        ArchiveFormat::TarGz => extract_tar(
            flate2::read::GzDecoder::new(BufReader::new(file)),
            destination,
            progress,
        ),
        ArchiveFormat::TarBz2 => extract_tar(
            bzip2::read::BzDecoder::new(BufReader::new(file)),
            destination,
            progress,
        ),
        ArchiveFormat::TarXz => extract_tar(
            xz2::read::XzDecoder::new(BufReader::new(file)),
            destination,
            progress,
        ),
        ArchiveFormat::TarZst => extract_tar(
            zstd::stream::read::Decoder::new(file)?,
            destination,
            progress,
        ),
    }
}

/// Reject absolute entry paths and `..` traversal.
fn validate_entry_path(path: &Path) -> Result<()> {
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir));
    if escapes {
        return Err(ArchiveError::EntryEscape {
            entry: path.display().to_string(),
        });
    }
    Ok(())
}

fn report(
    progress: &mut Option<&mut ProgressFn<'_>>,
    snapshot: &ArchiveProgress,
) -> Result<()> {
    if let Some(cb) = progress {
        if !cb(snapshot) {
            return Err(ArchiveError::Aborted);
        }
    }
    Ok(())
}

fn extract_tar<R: Read>(
    reader: R,
    destination: &Utf8Path,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> Result<u64> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);

    let mut snapshot = ArchiveProgress::default();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_path = entry.path()?.into_owned();
        validate_entry_path(&raw_path)?;

        let is_file = entry.header().entry_type().is_file();
        let size = entry.size();

        // unpack_in re-checks containment after link resolution.
        let unpacked = entry.unpack_in(destination.as_std_path())?;
        if !unpacked {
            return Err(ArchiveError::EntryEscape {
                entry: raw_path.display().to_string(),
            });
        }

        if is_file {
            snapshot.files_processed += 1;
            snapshot.bytes_processed += size;
            report(&mut progress, &snapshot)?;
        }
    }

    Ok(snapshot.files_processed)
}

fn extract_zip(
    file: File,
    destination: &Utf8Path,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> Result<u64> {
    let mut archive = zip::ZipArchive::new(file)?;

    let mut snapshot = ArchiveProgress {
        total_files: Some(archive.len() as u64),
        ..Default::default()
    };

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(rel_path) = entry.enclosed_name() else {
            return Err(ArchiveError::EntryEscape {
                entry: entry.name().to_string(),
            });
        };
        let out_path = destination.as_std_path().join(&rel_path);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|source| ArchiveError::Io {
                path: out_path.display().to_string(),
                source,
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|source| ArchiveError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut out = File::create(&out_path).map_err(|source| ArchiveError::Io {
            path: out_path.display().to_string(),
            source,
        })?;
        let copied = io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&out_path, fs::Permissions::from_mode(mode));
        }

        snapshot.files_processed += 1;
        snapshot.bytes_processed += copied;
        report(&mut progress, &snapshot)?;
    }

    Ok(snapshot.files_processed)
}
