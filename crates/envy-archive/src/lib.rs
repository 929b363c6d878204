//! Streaming archive extraction and tar+zstd production.
//!
//! Formats are detected by sniffing leading bytes, never by extension.
//! Extraction rejects any entry that would land outside the destination.

mod create;
mod extract;
mod sniff;

pub use create::create_tar_zst;
pub use extract::extract;
pub use sniff::{is_archive, sniff_format, ArchiveFormat};

use std::io;
use thiserror::Error;

/// Progress for both extraction and archive creation. Totals are `None` for
/// streaming formats where they are unknown up front.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveProgress {
    pub files_processed: u64,
    pub bytes_processed: u64,
    pub total_files: Option<u64>,
    pub total_bytes: Option<u64>,
}

/// Progress callback; returning `false` aborts the operation.
pub type ProgressFn<'a> = dyn FnMut(&ArchiveProgress) -> bool + 'a;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("unsupported or unrecognized archive format: {0}")]
    Unsupported(String),

    #[error("archive entry escapes destination: {entry}")]
    EntryEscape { entry: String },

    #[error("destination is not a directory: {0}")]
    NotADirectory(String),

    #[error("operation aborted by progress callback")]
    Aborted,

    #[error("io error on {path}: {source}")]
    Io { path: String, source: io::Error },

    #[error(transparent)]
    Stream(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
