//! Recipe materialization.
//!
//! A configuration whose source points at a `.toml` document declares its
//! package through that recipe: artifact sources, verb commands, products,
//! and dependencies. Remote and git recipe documents are materialized into
//! the recipe cache (same publish protocol as package entries) so they are
//! fetched once per identity. Plain artifact sources get an implicit recipe
//! with defaulted verbs.

use crate::verbs::VerbSet;
use crate::{EngineError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use envy_cache::Cache;
use envy_config::{PkgCfg, RecipeDoc, Source};
use envy_fetch::{fetch, fetch_git, FetchRequest};
use std::sync::Arc;
use tracing::debug;

/// A package's resolved recipe: what to transfer and how to run its verbs.
#[derive(Debug)]
pub struct RecipeState {
    pub sources: Vec<Source>,
    pub verbs: VerbSet,
    pub deps: Vec<Arc<PkgCfg>>,
    /// Identities the custom fetch command consumes before it runs.
    pub source_dependencies: Vec<String>,
}

impl RecipeState {
    fn implicit(cfg: &PkgCfg) -> RecipeState {
        let source_dependencies = match &cfg.source {
            Source::FetchCommand { dependencies, .. } => dependencies.clone(),
            _ => Vec::new(),
        };
        RecipeState {
            sources: vec![cfg.source.clone()],
            verbs: VerbSet::default(),
            deps: Vec::new(),
            source_dependencies,
        }
    }

    fn from_doc(doc: RecipeDoc) -> RecipeState {
        let mut source_dependencies = Vec::new();
        for source in &doc.sources {
            if let Source::FetchCommand { dependencies, .. } = source {
                source_dependencies.extend(dependencies.iter().cloned());
            }
        }
        RecipeState {
            verbs: VerbSet::from_commands(&doc.verbs, doc.products),
            sources: doc.sources,
            deps: doc.deps,
            source_dependencies,
        }
    }
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// Does this configuration declare itself through a recipe document?
pub fn is_recipe_source(cfg: &PkgCfg) -> bool {
    match &cfg.source {
        Source::Remote { url, .. } => strip_query(url).ends_with(".toml"),
        Source::Local { path } => path.as_str().ends_with(".toml"),
        Source::Git { subdir, .. } => subdir
            .as_deref()
            .map(|s| s.ends_with(".toml"))
            .unwrap_or(false),
        _ => false,
    }
}

/// Materialize a configuration's recipe. Remote/git documents land in the
/// recipe cache; local documents are read in place.
pub fn materialize(cache: &Cache, cfg: &Arc<PkgCfg>) -> Result<RecipeState> {
    if !is_recipe_source(cfg) {
        return Ok(RecipeState::implicit(cfg));
    }

    let doc = match &cfg.source {
        Source::Local { path } => {
            debug!(identity = %cfg.identity, path = %path, "loading local recipe");
            RecipeDoc::load(path, Some(Arc::clone(cfg)))?
        }
        Source::Remote { url, .. } => {
            let doc_path = ensure_recipe_file(cache, cfg, |dir| {
                let dest = dir.join("recipe.toml");
                fetch(&FetchRequest::new(url.clone(), dest.clone()), None)?;
                Ok(dest)
            })?;
            RecipeDoc::load(&doc_path, Some(Arc::clone(cfg)))?
        }
        Source::Git {
            url,
            reference,
            subdir,
        } => {
            let subdir = subdir.clone().expect("validated by is_recipe_source");
            let doc_path = ensure_recipe_file(cache, cfg, |dir| {
                let checkout = dir.join("repo");
                fetch_git(url, reference, &checkout, None)?;
                Ok(checkout.join(&subdir))
            })?;
            RecipeDoc::load(&doc_path, Some(Arc::clone(cfg)))?
        }
        _ => unreachable!("is_recipe_source filtered other variants"),
    };

    if doc.identity != cfg.identity {
        return Err(EngineError::NodeFailed {
            key: cfg.format_key(),
            message: format!(
                "recipe document declares identity {:?}, expected {:?}",
                doc.identity, cfg.identity
            ),
        });
    }

    Ok(RecipeState::from_doc(doc))
}

/// Fetch a recipe document into the recipe cache once per identity; return
/// the published path of the document.
fn ensure_recipe_file<F>(cache: &Cache, cfg: &Arc<PkgCfg>, produce: F) -> Result<Utf8PathBuf>
where
    F: FnOnce(&Utf8Path) -> Result<Utf8PathBuf>,
{
    let ensured = cache.ensure_recipe(&cfg.identity)?;
    if ensured.already_cached {
        return find_recipe_doc(&ensured.pkg_path);
    }

    let lock = ensured.lock.expect("cache miss returns a lock");
    let produced = produce(&lock.install_dir())?;
    let rel = produced
        .strip_prefix(&lock.install_dir())
        .map_err(|_| EngineError::NodeFailed {
            key: cfg.format_key(),
            message: format!("recipe document {produced} produced outside the recipe entry"),
        })?
        .to_path_buf();
    lock.mark_install_complete();
    drop(lock);

    Ok(ensured.pkg_path.join(rel))
}

/// Locate the document inside a published recipe entry.
fn find_recipe_doc(pkg_path: &Utf8Path) -> Result<Utf8PathBuf> {
    let direct = pkg_path.join("recipe.toml");
    if direct.is_file() {
        return Ok(direct);
    }
    // Git-backed recipes keep their repo layout; find the first .toml.
    let mut stack = vec![pkg_path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(dir.as_std_path()).map_err(|source| EngineError::Io {
            path: dir.to_string(),
            source,
        })?;
        let mut subdirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| EngineError::Io {
                path: dir.to_string(),
                source,
            })?;
            let path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|p| EngineError::NodeFailed {
                    key: String::new(),
                    message: format!("non-utf8 path in recipe entry: {}", p.display()),
                })?;
            if path.is_file() && path.as_str().ends_with(".toml") {
                return Ok(path);
            }
            if path.is_dir() {
                subdirs.push(path);
            }
        }
        stack.extend(subdirs);
    }
    Err(EngineError::NodeFailed {
        key: String::new(),
        message: format!("no recipe document found under {pkg_path}"),
    })
}

