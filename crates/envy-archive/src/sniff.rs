//! Archive format detection by magic bytes.

use crate::{ArchiveError, Result};
use camino::Utf8Path;
use std::fs::File;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    TarZst,
    Zip,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

/// The ustar magic lives at offset 257 of the first tar header block.
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

/// Sniff the archive format from the file's leading bytes. Compressed
/// formats are assumed to wrap tar; zip is recognized directly.
pub fn sniff_format(path: &Utf8Path) -> Result<ArchiveFormat> {
    let mut file = File::open(path.as_std_path()).map_err(|source| ArchiveError::Io {
        path: path.to_string(),
        source,
    })?;

    let mut head = [0u8; 512];
    let mut read = 0;
    while read < head.len() {
        let n = file
            .read(&mut head[read..])
            .map_err(|source| ArchiveError::Io {
                path: path.to_string(),
                source,
            })?;
        if n == 0 {
            break;
        }
        read += n;
    }
    let head = &head[..read];

    if head.starts_with(ZIP_MAGIC) || head.starts_with(ZIP_EMPTY_MAGIC) {
        return Ok(ArchiveFormat::Zip);
    }
    if head.starts_with(ZSTD_MAGIC) {
        return Ok(ArchiveFormat::TarZst);
    }
    if head.starts_with(GZIP_MAGIC) {
        return Ok(ArchiveFormat::TarGz);
    }
    if head.starts_with(BZIP2_MAGIC) {
        return Ok(ArchiveFormat::TarBz2);
    }
    if head.starts_with(XZ_MAGIC) {
        return Ok(ArchiveFormat::TarXz);
    }
    if read > TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && &head[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
    {
        return Ok(ArchiveFormat::Tar);
    }

    Err(ArchiveError::Unsupported(path.to_string()))
}

/// True when the file looks like any archive this crate can extract.
pub fn is_archive(path: &Utf8Path) -> bool {
    sniff_format(path).is_ok()
}
