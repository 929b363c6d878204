//! Filesystem and process primitives for envy.
//!
//! Everything in here exists to make the cache's publish protocol safe across
//! processes and threads: advisory whole-file locks layered under an
//! in-process mutex registry, atomic rename, marker-file creation with the
//! Windows flush discipline, and recursive deletion that survives antivirus
//! and indexer interference.

pub mod fs;
pub mod lock;
pub mod paths;
pub mod proc;

pub use fs::{atomic_rename, file_exists, remove_all_with_retry, touch_file};
pub use lock::FileLock;
pub use paths::{absolutize, expand_path, get_default_cache_root};
pub use proc::{arch_name, current_exe, exec_process, get_environment, os_name, set_env_var};

use std::io;
use thiserror::Error;

/// Errors from the platform layer.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to open lock file {path}: {source}")]
    LockOpen { path: String, source: io::Error },

    #[error("failed to acquire exclusive lock on {path}: {source}")]
    LockAcquire { path: String, source: io::Error },

    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        from: String,
        to: String,
        source: io::Error,
    },

    #[error("failed to touch {path}: {source}")]
    Touch { path: String, source: io::Error },

    #[error("failed to remove {path}: {source}")]
    Remove { path: String, source: io::Error },

    #[error("undefined variable in path: {0}")]
    UndefinedVariable(String),

    #[error("path expansion failed: {0}")]
    Expansion(String),

    #[error("unable to determine default cache root: {0} not set")]
    NoCacheRoot(&'static str),

    #[error("exec failed for {binary}: {source}")]
    Exec { binary: String, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, PlatformError>;
