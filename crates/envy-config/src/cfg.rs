//! Package configuration records and the process-wide configuration pool.

use crate::key::{parse_identity, PkgKey};
use crate::phase::Phase;
use crate::Result;
use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex};

/// Where a package's content comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Remote archive or file, with optional SHA-256 verification and an
    /// optional subdirectory inside the archive.
    Remote {
        url: String,
        sha256: Option<String>,
        subdir: Option<String>,
    },
    /// A local file or directory.
    Local { path: Utf8PathBuf },
    /// A git repository at a specific ref.
    Git {
        url: String,
        reference: String,
        subdir: Option<String>,
    },
    /// A custom fetch command with its own source dependencies.
    FetchCommand {
        command: String,
        dependencies: Vec<String>,
    },
    /// Reference-only or weak dependency; no source of its own.
    WeakRef,
}

/// An immutable package configuration. Instances live in the [`CfgPool`] and
/// are shared by `Arc`; parent and weak links point at other pool entries.
#[derive(Debug)]
pub struct PkgCfg {
    /// `namespace.name@revision`.
    pub identity: String,
    pub source: Source,
    /// Canonical sorted option serialization; `{}` when no options.
    pub serialized_options: String,
    /// Which downstream phase consumes this dependency. Defaults to install.
    pub needed_by: Option<Phase>,
    /// The configuration that declared this one.
    pub parent: Option<Arc<PkgCfg>>,
    /// Fallback used only if no other package satisfies this identity.
    pub weak: Option<Arc<PkgCfg>>,
    /// Configurations whose artifacts must be available before this
    /// configuration's custom fetch runs.
    pub source_dependencies: Vec<Arc<PkgCfg>>,
    /// Product name when selected by product lookup rather than identity.
    pub product: Option<String>,
    /// Manifest or recipe file that declared this configuration.
    pub declaring_file: Option<Utf8PathBuf>,
}

impl PkgCfg {
    /// Format the canonical key for an identity and serialized options:
    /// the identity alone when options are `{}`, otherwise
    /// `identity{...}`.
    pub fn format_key_parts(identity: &str, serialized_options: &str) -> String {
        if serialized_options.is_empty() || serialized_options == "{}" {
            identity.to_string()
        } else {
            format!("{identity}{serialized_options}")
        }
    }

    pub fn format_key(&self) -> String {
        Self::format_key_parts(&self.identity, &self.serialized_options)
    }

    pub fn key(&self) -> PkgKey {
        PkgKey::parse(&self.format_key()).expect("pool configurations are validated")
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.source, Source::Remote { .. })
    }

    pub fn is_local(&self) -> bool {
        matches!(self.source, Source::Local { .. })
    }

    pub fn is_git(&self) -> bool {
        matches!(self.source, Source::Git { .. })
    }

    pub fn has_fetch_command(&self) -> bool {
        matches!(self.source, Source::FetchCommand { .. })
    }

    pub fn is_weak_reference(&self) -> bool {
        matches!(self.source, Source::WeakRef)
    }

    /// Project root directory: the parent directory of the root
    /// configuration's declaring file, or the current directory when no
    /// provenance is available.
    pub fn compute_project_root(cfg: &PkgCfg) -> Utf8PathBuf {
        let mut declaring = cfg.declaring_file.clone();
        let mut parent = cfg.parent.clone();
        while let Some(p) = parent {
            declaring = p.declaring_file.clone();
            parent = p.parent.clone();
        }
        declaring
            .as_deref()
            .and_then(Utf8Path::parent)
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| {
                std::env::current_dir()
                    .ok()
                    .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
                    .unwrap_or_else(|| Utf8PathBuf::from("."))
            })
    }

    /// Validate the identity and return a reference-counted pool entry.
    pub fn into_pool(self) -> Result<Arc<PkgCfg>> {
        parse_identity(&self.identity)?;
        Ok(cfg_pool().insert(self))
    }
}

/// Process-wide configuration pool. Hands out stable shared references;
/// entries live until process exit.
#[derive(Default)]
pub struct CfgPool {
    storage: Mutex<Vec<Arc<PkgCfg>>>,
}

impl CfgPool {
    pub fn insert(&self, cfg: PkgCfg) -> Arc<PkgCfg> {
        let arc = Arc::new(cfg);
        self.storage
            .lock()
            .expect("cfg pool poisoned")
            .push(Arc::clone(&arc));
        arc
    }

    pub fn len(&self) -> usize {
        self.storage.lock().expect("cfg pool poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The process-wide pool, initialized on first use.
pub fn cfg_pool() -> &'static CfgPool {
    static POOL: OnceCell<CfgPool> = OnceCell::new();
    POOL.get_or_init(CfgPool::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(identity: &str, options: &str) -> PkgCfg {
        PkgCfg {
            identity: identity.to_string(),
            source: Source::Local {
                path: Utf8PathBuf::from("/tmp/x"),
            },
            serialized_options: options.to_string(),
            needed_by: None,
            parent: None,
            weak: None,
            source_dependencies: Vec::new(),
            product: None,
            declaring_file: None,
        }
    }

    #[test]
    fn key_with_empty_options_has_no_braces() {
        assert_eq!(cfg("local.tool@v1", "{}").format_key(), "local.tool@v1");
        assert_eq!(cfg("local.tool@v1", "").format_key(), "local.tool@v1");
    }

    #[test]
    fn key_with_options_appends_serialization() {
        assert_eq!(
            cfg("local.tool@v1", "{opt=1}").format_key(),
            "local.tool@v1{opt=1}"
        );
    }

    #[test]
    fn pool_hands_out_shared_entries() {
        let arc = cfg("pool.entry@v1", "{}").into_pool().unwrap();
        let before = cfg_pool().len();
        let arc2 = cfg("pool.entry@v2", "{}").into_pool().unwrap();
        assert_eq!(cfg_pool().len(), before + 1);
        assert_eq!(arc.identity, "pool.entry@v1");
        assert_eq!(arc2.identity, "pool.entry@v2");
    }

    #[test]
    fn pool_rejects_bad_identity() {
        assert!(cfg("not-an-identity", "{}").into_pool().is_err());
    }

    #[test]
    fn project_root_walks_parent_chain() {
        let root = PkgCfg {
            declaring_file: Some(Utf8PathBuf::from("/proj/envy.toml")),
            ..cfg("root.pkg@v1", "{}")
        };
        let root = root.into_pool().unwrap();
        let child = PkgCfg {
            parent: Some(Arc::clone(&root)),
            ..cfg("child.pkg@v1", "{}")
        };
        assert_eq!(PkgCfg::compute_project_root(&child), "/proj");
    }
}
