//! Git transport: clone at a ref with transfer progress.

use crate::{FetchError, FetchProgress, FetchProgressFn, Result};
use camino::Utf8Path;
use git2::build::RepoBuilder;
use git2::{FetchOptions, RemoteCallbacks};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Clone `url` into `destination` and check out `reference`. `HEAD` keeps
/// the remote default branch.
pub fn clone_at_ref(
    url: &str,
    reference: &str,
    destination: &Utf8Path,
    mut progress: Option<&mut FetchProgressFn<'_>>,
) -> Result<()> {
    debug!(url, reference, dest = %destination, "git clone");

    let aborted = AtomicBool::new(false);

    let mut callbacks = RemoteCallbacks::new();
    if let Some(cb) = progress.as_deref_mut() {
        let aborted = &aborted;
        callbacks.transfer_progress(move |stats: git2::Progress<'_>| {
            let keep_going = cb(&FetchProgress::Git {
                total_objects: stats.total_objects() as u32,
                indexed_objects: stats.indexed_objects() as u32,
                received_objects: stats.received_objects() as u32,
                total_deltas: stats.total_deltas() as u32,
                indexed_deltas: stats.indexed_deltas() as u32,
                received_bytes: stats.received_bytes() as u64,
            });
            if !keep_going {
                aborted.store(true, Ordering::SeqCst);
            }
            keep_going
        });
    }

    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(callbacks);

    let clone_result = RepoBuilder::new()
        .fetch_options(fetch_options)
        .clone(url, destination.as_std_path());

    let repo = match clone_result {
        Ok(repo) => repo,
        Err(source) => {
            let _ = envy_platform::remove_all_with_retry(destination);
            if aborted.load(Ordering::SeqCst) {
                return Err(FetchError::Aborted);
            }
            return Err(FetchError::Git {
                url: url.to_string(),
                source,
            });
        }
    };

    if reference != "HEAD" {
        checkout(&repo, reference).map_err(|source| FetchError::Git {
            url: url.to_string(),
            source,
        })?;
    }

    Ok(())
}

fn checkout(repo: &git2::Repository, reference: &str) -> std::result::Result<(), git2::Error> {
    let (object, resolved_ref) = repo.revparse_ext(reference)?;
    repo.checkout_tree(&object, None)?;
    match resolved_ref.and_then(|r| r.name().map(str::to_string)) {
        Some(name) => repo.set_head(&name),
        None => repo.set_head_detached(object.id()),
    }
}
