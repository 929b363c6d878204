//! Package configurations and their canonical identity.
//!
//! A package is named by `namespace.name@revision`; two configurations whose
//! sorted option serializations match are the same package. The canonical
//! key built here is the sole deduplication token for the cache and the
//! graph engine.

pub mod cfg;
pub mod key;
pub mod manifest;
pub mod options;
pub mod phase;

pub use cfg::{cfg_pool, CfgPool, PkgCfg, Source};
pub use key::{parse_identity, PkgKey};
pub use manifest::{Manifest, RecipeDoc, VerbCommands};
pub use options::{parse_options, serialize_options, OptValue};
pub use phase::Phase;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed identity {identity:?}: {reason}")]
    MalformedIdentity { identity: String, reason: String },

    #[error("invalid options: {0}")]
    BadOptions(String),

    #[error("missing required field {field:?} in {context}")]
    MissingField { field: &'static str, context: String },

    #[error("invalid source for {identity}: {reason}")]
    InvalidSource { identity: String, reason: String },

    #[error("unknown phase {0:?}")]
    UnknownPhase(String),

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
