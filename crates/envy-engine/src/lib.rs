//! The dependency graph engine.
//!
//! One node set per canonical key, eight phase slots per node:
//!
//! ```text
//! recipe_fetch → check → fetch → stage → build → install → deploy → completion
//! ```
//!
//! Phases are continuation nodes with atomic pending counters on a shared
//! work-stealing pool. A phase runs only after all its in-edges complete; a
//! dependency's completion edges into the dependent's `needed_by` phase.
//! `check` decides dynamically between a cache hit (jump to completion) and
//! the production path. Weak dependencies resolve by iterating to a fixed
//! point, instantiating fallbacks as needed.

mod engine;
mod graph;
mod phases;
mod progress;
mod recipe;
mod resolver;
mod verbs;

pub use engine::{Engine, EngineOptions};
pub use progress::{ProgressSection, ProgressSink, TracingSink};
pub use recipe::RecipeState;
pub use verbs::{CheckFn, VerbContext, VerbFn, VerbSet};

use camino::Utf8PathBuf;
use std::collections::BTreeMap;
use thiserror::Error;

/// How a package's artifacts are managed after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkgKind {
    /// Artifacts live under the cache's `pkg/`.
    CacheManaged,
    /// The check verb reported the package already installed on the host.
    UserManaged,
    Unknown,
}

/// Per-package result, keyed by canonical key in the engine result map.
#[derive(Debug, Clone)]
pub struct PkgResult {
    pub kind: PkgKind,
    pub pkg_path: Option<Utf8PathBuf>,
    /// Tail 16 characters of the resolved pkg path; stable for a cache root.
    pub result_hash: Option<String>,
    /// Declared product name to path under `pkg/`.
    pub products: BTreeMap<String, String>,
}

pub type ResultMap = BTreeMap<String, PkgResult>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] envy_config::ConfigError),

    #[error(transparent)]
    Cache(#[from] envy_cache::CacheError),

    #[error(transparent)]
    Fetch(#[from] envy_fetch::FetchError),

    #[error(transparent)]
    Archive(#[from] envy_archive::ArchiveError),

    #[error(transparent)]
    Hash(#[from] envy_hash::HashError),

    #[error(transparent)]
    Platform(#[from] envy_platform::PlatformError),

    #[error("cycle detected: {chain} depends on itself")]
    Cycle { chain: String },

    #[error("ambiguous weak dependency {pattern:?}: candidates {candidates:?}")]
    Ambiguity {
        pattern: String,
        candidates: Vec<String>,
    },

    #[error("no progress: identity {0} unsatisfied")]
    Unsatisfied(String),

    #[error("{verb} verb failed for {key}: {message}")]
    Verb {
        key: String,
        verb: &'static str,
        message: String,
    },

    #[error("{key}: {message}")]
    NodeFailed { key: String, message: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
