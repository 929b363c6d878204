//! Phase bodies.
//!
//! Each body does its work and returns the slots to signal next. The static
//! chain is recipe_fetch → check → fetch → stage → build → install → deploy
//! → completion; check and the depot import jump straight to completion on
//! a hit.

use crate::engine::Shared;
use crate::verbs::VerbContext;
use crate::{EngineError, PkgKind, Result};
use camino::{Utf8Path, Utf8PathBuf};
use envy_config::{Phase, PkgCfg, Source};
use envy_fetch::{fetch, fetch_git, FetchRequest};
use std::fs;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) fn run(shared: &Arc<Shared>, idx: usize, phase: Phase) -> Result<Vec<(usize, Phase)>> {
    match phase {
        Phase::RecipeFetch => recipe_fetch(shared, idx),
        Phase::Check => check(shared, idx),
        Phase::Fetch => fetch_phase(shared, idx),
        Phase::Stage => stage(shared, idx),
        Phase::Build => build(shared, idx),
        Phase::Install => install(shared, idx),
        Phase::Deploy => deploy(shared, idx),
        Phase::Completion => completion(shared, idx),
    }
}

/// Build a verb context. Before the entry lock exists (check phase) the
/// scratch directories do not either, so the working directory falls back
/// to the project root.
fn verb_context(shared: &Shared, idx: usize) -> VerbContext {
    let node = &shared.nodes[idx];
    let state = node.state.lock().expect("node poisoned");
    let project_root = PkgCfg::compute_project_root(&node.cfg);

    let (fetch_dir, stage_dir, work_dir, install_dir) = match &state.lock {
        Some(lock) => (
            lock.fetch_dir(),
            lock.stage_dir(),
            lock.work_dir(),
            lock.install_dir(),
        ),
        None => (
            project_root.clone(),
            project_root.clone(),
            project_root.clone(),
            project_root.clone(),
        ),
    };

    let mut dep_pkg_paths = Vec::new();
    for &dep in &node.dep_nodes {
        let dep_node = &shared.nodes[dep];
        let dep_state = dep_node.state.lock().expect("node poisoned");
        if let Some(path) = &dep_state.pkg_path {
            dep_pkg_paths.push((dep_node.key.clone(), path.clone()));
        }
    }

    VerbContext {
        key: node.key.clone(),
        fetch_dir,
        stage_dir,
        work_dir,
        install_dir,
        pkg_dir: state.pkg_path.clone(),
        project_root,
        dep_pkg_paths,
    }
}

fn recipe_fetch(shared: &Arc<Shared>, idx: usize) -> Result<Vec<(usize, Phase)>> {
    let node = &shared.nodes[idx];

    // `local.` packages promise in-tree sources.
    if node.cfg.identity.starts_with("local.") && !node.cfg.is_local() {
        return Err(EngineError::NodeFailed {
            key: node.key.clone(),
            message: format!(
                "package {} in the local namespace must have a local source",
                node.cfg.identity
            ),
        });
    }

    Ok(vec![(idx, Phase::Check)])
}

fn check(shared: &Arc<Shared>, idx: usize) -> Result<Vec<(usize, Phase)>> {
    let node = &shared.nodes[idx];

    if let Some(check_verb) = &node.recipe.verbs.check {
        let ctx = verb_context(shared, idx);
        if check_verb(&ctx)? {
            debug!(key = %node.key, "check: already installed on host");
            let mut state = node.state.lock().expect("node poisoned");
            state.kind = Some(PkgKind::UserManaged);
            if let Some(lock) = state.lock.take() {
                // Any entry created on this package's behalf leaves no trace.
                lock.mark_user_managed();
            }
            return Ok(vec![(idx, Phase::Completion)]);
        }
    }

    let hash_prefix = envy_hash::blake3_hex_prefix(node.key.as_bytes(), 16);
    let ensured = shared
        .cache
        .ensure_pkg(&node.key, shared.platform, shared.arch, &hash_prefix)?;

    let mut state = node.state.lock().expect("node poisoned");
    if ensured.already_cached {
        debug!(key = %node.key, "check: cache hit");
        state.pkg_path = Some(ensured.pkg_path);
        state.kind = Some(PkgKind::CacheManaged);
        Ok(vec![(idx, Phase::Completion)])
    } else {
        debug!(key = %node.key, "check: cache miss");
        state.lock = ensured.lock;
        Ok(vec![(idx, Phase::Fetch)])
    }
}

fn fetch_phase(shared: &Arc<Shared>, idx: usize) -> Result<Vec<(usize, Phase)>> {
    let node = &shared.nodes[idx];

    // A depot hit replaces the whole fetch (and possibly the rest of the
    // pipeline) with a prebuilt import.
    if let Some(depot) = &shared.depot {
        let hash_prefix = envy_hash::blake3_hex_prefix(node.key.as_bytes(), 16);
        let url = depot
            .find(&node.key, shared.platform, shared.arch, &hash_prefix)
            .map(str::to_string);
        if let Some(url) = url {
            match depot_import(shared, idx, &url)? {
                DepotImport::Installed => return Ok(vec![(idx, Phase::Completion)]),
                DepotImport::FetchOnly => return Ok(vec![(idx, Phase::Stage)]),
                DepotImport::Mismatch => {
                    warn!(key = %node.key, url, "depot archive did not match; falling back to fetch");
                }
            }
        }
    }

    if let Some(fetch_verb) = &node.recipe.verbs.fetch {
        let ctx = verb_context(shared, idx);
        fetch_verb(&ctx)?;
        return Ok(vec![(idx, Phase::Stage)]);
    }

    let fetch_dir = {
        let state = node.state.lock().expect("node poisoned");
        let lock = state.lock.as_ref().expect("fetch phase requires the entry lock");
        lock.fetch_dir()
    };

    let project_root = PkgCfg::compute_project_root(&node.cfg);
    let mut batch: Vec<(FetchRequest, Option<String>)> = Vec::new();

    for source in &node.recipe.sources {
        match source {
            Source::Remote { url, sha256, .. } => {
                let dest = fetch_dir.join(url_basename(url));
                if let Some(expected) = sha256 {
                    // Preserved downloads are reused when they verify.
                    if dest.is_file() {
                        if let Ok(digest) = envy_hash::sha256_file(&dest) {
                            if envy_hash::sha256_verify(expected, &digest).is_ok() {
                                debug!(key = %node.key, dest = %dest, "fetch: reusing verified download");
                                continue;
                            }
                        }
                    }
                }
                let mut request = FetchRequest::new(url.clone(), dest);
                request.manifest_root = Some(project_root.clone());
                batch.push((request, sha256.clone()));
            }
            Source::Local { path } => {
                let name = path.file_name().unwrap_or("source");
                let mut request = FetchRequest::new(path.as_str(), fetch_dir.join(name));
                request.manifest_root = Some(project_root.clone());
                batch.push((request, None));
            }
            Source::Git { url, reference, .. } => {
                let dest = fetch_dir.join(git_checkout_name(url));
                if dest.exists() {
                    envy_platform::remove_all_with_retry(&dest)?;
                }
                let mut section = shared.progress.section(&node.key);
                let mut on_progress = |p: &envy_fetch::FetchProgress| match p {
                    envy_fetch::FetchProgress::Git { received_bytes, .. } => {
                        section.transfer(*received_bytes, None)
                    }
                    envy_fetch::FetchProgress::Transfer { transferred, total } => {
                        section.transfer(*transferred, *total)
                    }
                };
                fetch_git(url, reference, &dest, Some(&mut on_progress))?;
            }
            Source::FetchCommand { command, .. } => {
                let ctx = verb_context(shared, idx);
                crate::verbs::run_fetch_command(command, &ctx)?;
            }
            Source::WeakRef => {}
        }
    }

    if !batch.is_empty() {
        let requests: Vec<FetchRequest> = batch.iter().map(|(r, _)| r.clone()).collect();

        // Aggregate child transfers into this package's progress section.
        let section = std::sync::Mutex::new(shared.progress.section(&node.key));
        let slots: std::sync::Mutex<Vec<(u64, Option<u64>)>> =
            std::sync::Mutex::new(vec![(0, None); requests.len()]);
        let on_progress = |request_idx: usize, p: &envy_fetch::FetchProgress| -> bool {
            let envy_fetch::FetchProgress::Transfer { transferred, total } = p else {
                return true;
            };
            let (sum, sum_total) = {
                let mut slots = slots.lock().expect("progress slots poisoned");
                slots[request_idx] = (*transferred, *total);
                let sum: u64 = slots.iter().map(|&(t, _)| t).sum();
                let sum_total = slots
                    .iter()
                    .try_fold(0u64, |acc, &(_, t)| t.map(|t| acc + t));
                (sum, sum_total)
            };
            section
                .lock()
                .expect("progress section poisoned")
                .transfer(sum, sum_total)
        };

        let results = envy_fetch::fetch_all(&requests, Some(&on_progress));
        for ((request, expected), result) in batch.into_iter().zip(results) {
            let fetched = result?;
            if let Some(expected) = expected {
                let digest = envy_hash::sha256_file(&fetched.resolved_destination)?;
                envy_hash::sha256_verify(&expected, &digest)?;
            }
            debug!(key = %node.key, source = %request.source, "fetched");
        }
    }

    Ok(vec![(idx, Phase::Stage)])
}

enum DepotImport {
    Installed,
    FetchOnly,
    Mismatch,
}

fn depot_import(shared: &Arc<Shared>, idx: usize, url: &str) -> Result<DepotImport> {
    let node = &shared.nodes[idx];
    info!(key = %node.key, url, "importing prebuilt archive from depot");

    let (entry_dir, work_dir, install_dir, fetch_dir, pkg_dir) = {
        let state = node.state.lock().expect("node poisoned");
        let lock = state.lock.as_ref().expect("depot import requires the entry lock");
        (
            lock.entry_dir().to_path_buf(),
            lock.work_dir(),
            lock.install_dir(),
            lock.fetch_dir(),
            lock.pkg_dir(),
        )
    };

    let archive_path = work_dir.join("depot.tar.zst");
    fetch(&FetchRequest::new(url, archive_path.clone()), None)?;
    envy_archive::extract(&archive_path, &entry_dir, None)?;
    let _ = fs::remove_file(archive_path.as_std_path());

    if dir_has_entries(&install_dir) {
        let mut state = node.state.lock().expect("node poisoned");
        let lock = state.lock.take().expect("still held");
        lock.mark_install_complete();
        drop(lock);
        state.pkg_path = Some(pkg_dir);
        state.kind = Some(PkgKind::CacheManaged);
        return Ok(DepotImport::Installed);
    }
    if dir_has_entries(&fetch_dir) {
        let state = node.state.lock().expect("node poisoned");
        let lock = state.lock.as_ref().expect("still held");
        lock.mark_fetch_complete()?;
        return Ok(DepotImport::FetchOnly);
    }
    Ok(DepotImport::Mismatch)
}

fn stage(shared: &Arc<Shared>, idx: usize) -> Result<Vec<(usize, Phase)>> {
    let node = &shared.nodes[idx];

    if let Some(stage_verb) = &node.recipe.verbs.stage {
        let ctx = verb_context(shared, idx);
        stage_verb(&ctx)?;
        return Ok(vec![(idx, Phase::Build)]);
    }

    let (fetch_dir, stage_dir) = {
        let state = node.state.lock().expect("node poisoned");
        let lock = state.lock.as_ref().expect("stage phase requires the entry lock");
        (lock.fetch_dir(), lock.stage_dir())
    };

    let mut entries: Vec<Utf8PathBuf> = Vec::new();
    for entry in fs::read_dir(fetch_dir.as_std_path()).map_err(|source| EngineError::Io {
        path: fetch_dir.to_string(),
        source,
    })? {
        let entry = entry.map_err(|source| EngineError::Io {
            path: fetch_dir.to_string(),
            source,
        })?;
        let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(|p| {
            EngineError::NodeFailed {
                key: node.key.clone(),
                message: format!("non-utf8 path in fetch dir: {}", p.display()),
            }
        })?;
        if path.file_name() == Some(envy_cache::COMPLETE_MARKER) {
            continue;
        }
        entries.push(path);
    }
    entries.sort();

    let mut section = shared.progress.section(&node.key);
    for path in entries {
        if path.is_file() && envy_archive::is_archive(&path) {
            debug!(key = %node.key, archive = %path, "stage: extracting");
            let mut on_progress = |p: &envy_archive::ArchiveProgress| {
                section.files(p.files_processed, p.total_files)
            };
            envy_archive::extract(&path, &stage_dir, Some(&mut on_progress))?;
        } else {
            let name = path.file_name().unwrap_or("source");
            copy_tree(&path, &stage_dir.join(name))?;
        }
    }

    Ok(vec![(idx, Phase::Build)])
}

fn build(shared: &Arc<Shared>, idx: usize) -> Result<Vec<(usize, Phase)>> {
    let node = &shared.nodes[idx];
    if let Some(build_verb) = &node.recipe.verbs.build {
        let ctx = verb_context(shared, idx);
        build_verb(&ctx)?;
    }
    Ok(vec![(idx, Phase::Install)])
}

fn install(shared: &Arc<Shared>, idx: usize) -> Result<Vec<(usize, Phase)>> {
    let node = &shared.nodes[idx];

    if let Some(install_verb) = &node.recipe.verbs.install {
        let ctx = verb_context(shared, idx);
        install_verb(&ctx)?;
    } else {
        let (stage_dir, install_dir) = {
            let state = node.state.lock().expect("node poisoned");
            let lock = state.lock.as_ref().expect("install phase requires the entry lock");
            (lock.stage_dir(), lock.install_dir())
        };
        if stage_dir.is_dir() {
            copy_tree_contents(&stage_dir, &install_dir)?;
        }
    }

    // Publish: dropping the scoped lock renames install/ to pkg/ and writes
    // the completion marker last.
    let mut state = node.state.lock().expect("node poisoned");
    let lock = state.lock.take().expect("install phase requires the entry lock");
    let pkg_dir = lock.pkg_dir();
    lock.mark_install_complete();
    drop(lock);
    state.pkg_path = Some(pkg_dir);
    state.kind = Some(PkgKind::CacheManaged);

    Ok(vec![(idx, Phase::Deploy)])
}

fn deploy(shared: &Arc<Shared>, idx: usize) -> Result<Vec<(usize, Phase)>> {
    let node = &shared.nodes[idx];
    if let Some(deploy_verb) = &node.recipe.verbs.deploy {
        let ctx = verb_context(shared, idx);
        deploy_verb(&ctx)?;
    }
    Ok(vec![(idx, Phase::Completion)])
}

fn completion(shared: &Arc<Shared>, idx: usize) -> Result<Vec<(usize, Phase)>> {
    let node = &shared.nodes[idx];
    let mut state = node.state.lock().expect("node poisoned");

    if let Some(pkg_path) = &state.pkg_path {
        let path = pkg_path.as_str();
        let tail = if path.len() >= 16 {
            &path[path.len() - 16..]
        } else {
            path
        };
        state.result_hash = Some(tail.to_string());
    }
    if state.kind.is_none() {
        state.kind = Some(PkgKind::Unknown);
    }
    state.completed = true;
    info!(key = %node.key, kind = ?state.kind, "package complete");

    Ok(node.dependents.clone())
}

fn url_basename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let base = path.rsplit('/').next().unwrap_or(path);
    if base.is_empty() {
        "download".to_string()
    } else {
        base.to_string()
    }
}

fn git_checkout_name(url: &str) -> String {
    let base = url_basename(url);
    base.strip_suffix(".git").unwrap_or(&base).to_string()
}

fn dir_has_entries(dir: &Utf8Path) -> bool {
    fs::read_dir(dir.as_std_path())
        .map(|mut it| it.next().is_some())
        .unwrap_or(false)
}

/// Copy a file, directory, or symlink to `dest` (which must not exist for
/// files). Symlinks are preserved, not followed.
fn copy_tree(source: &Utf8Path, dest: &Utf8Path) -> Result<()> {
    let io_err = |path: &Utf8Path, source: std::io::Error| EngineError::Io {
        path: path.to_string(),
        source,
    };

    let metadata = fs::symlink_metadata(source.as_std_path()).map_err(|e| io_err(source, e))?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(source.as_std_path()).map_err(|e| io_err(source, e))?;
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, dest.as_std_path()).map_err(|e| io_err(dest, e))?;
        #[cfg(windows)]
        std::os::windows::fs::symlink_file(&target, dest.as_std_path())
            .map_err(|e| io_err(dest, e))?;
        return Ok(());
    }
    if file_type.is_dir() {
        fs::create_dir_all(dest.as_std_path()).map_err(|e| io_err(dest, e))?;
        return copy_tree_contents(source, dest);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent.as_std_path()).map_err(|e| io_err(parent, e))?;
    }
    fs::copy(source.as_std_path(), dest.as_std_path()).map_err(|e| io_err(dest, e))?;
    Ok(())
}

/// Copy the contents of `source` into existing directory `dest`.
fn copy_tree_contents(source: &Utf8Path, dest: &Utf8Path) -> Result<()> {
    let io_err = |path: &Utf8Path, source: std::io::Error| EngineError::Io {
        path: path.to_string(),
        source,
    };

    fs::create_dir_all(dest.as_std_path()).map_err(|e| io_err(dest, e))?;
    for entry in fs::read_dir(source.as_std_path()).map_err(|e| io_err(source, e))? {
        let entry = entry.map_err(|e| io_err(source, e))?;
        let name = entry.file_name();
        let name = name.to_str().ok_or_else(|| EngineError::Io {
            path: source.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "non-utf8 file name",
            ),
        })?;
        let from = source.join(name);
        let to = dest.join(name);
        copy_tree(&from, &to)?;
    }
    Ok(())
}
