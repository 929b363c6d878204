//! Uniform single-file transfer.
//!
//! Input URIs are classified by scheme, then dispatched to a transport:
//! HTTP(S) via a blocking client, S3 via the AWS SDK behind a private
//! runtime, git via libgit2, and local paths by symlink-aware copy. All
//! transports stream with a cooperative progress callback; returning `false`
//! aborts the transfer and removes the partial destination.

mod classify;
mod git;
mod http;
mod local;
mod s3;

pub use classify::{classify, FetchScheme};
pub use local::resolve_local_source;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch: source URI is empty")]
    EmptySource,

    #[error("fetch: scheme {scheme:?} not supported for {url}")]
    UnsupportedScheme { scheme: FetchScheme, url: String },

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("git error fetching {url}: {source}")]
    Git { url: String, source: git2::Error },

    #[error("invalid local source {0}")]
    InvalidLocal(String),

    #[error("transfer aborted by progress callback")]
    Aborted,

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Progress for a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchProgress {
    Transfer {
        transferred: u64,
        total: Option<u64>,
    },
    Git {
        total_objects: u32,
        indexed_objects: u32,
        received_objects: u32,
        total_deltas: u32,
        indexed_deltas: u32,
        received_bytes: u64,
    },
}

/// Returning `false` aborts the transfer.
pub type FetchProgressFn<'a> = dyn FnMut(&FetchProgress) -> bool + Send + 'a;

/// One transfer request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub source: String,
    pub destination: Utf8PathBuf,
    /// Base for resolving relative local sources; defaults to the current
    /// directory.
    pub manifest_root: Option<Utf8PathBuf>,
    /// S3 region override.
    pub region: Option<String>,
}

impl FetchRequest {
    pub fn new(source: impl Into<String>, destination: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            manifest_root: None,
            region: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub scheme: FetchScheme,
    pub resolved_source: String,
    pub resolved_destination: Utf8PathBuf,
}

/// Absolutize the destination and create its parent directory.
fn prepare_destination(destination: &Utf8Path) -> Result<Utf8PathBuf> {
    if destination.as_str().is_empty() {
        return Err(FetchError::Io {
            path: String::new(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "destination path is empty",
            ),
        });
    }
    let destination = envy_platform::absolutize(destination);
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent.as_std_path()).map_err(|source| FetchError::Io {
            path: parent.to_string(),
            source,
        })?;
    }
    Ok(destination)
}

/// Execute a single transfer.
pub fn fetch(
    request: &FetchRequest,
    mut progress: Option<&mut FetchProgressFn<'_>>,
) -> Result<FetchResult> {
    let trimmed = request.source.trim();
    if trimmed.is_empty() {
        return Err(FetchError::EmptySource);
    }

    let scheme = classify(trimmed);
    debug!(source = trimmed, ?scheme, dest = %request.destination, "fetch");

    match scheme {
        FetchScheme::Http | FetchScheme::Https => {
            let destination = prepare_destination(&request.destination)?;
            http::download(trimmed, &destination, progress.as_deref_mut())?;
            Ok(FetchResult {
                scheme,
                resolved_source: trimmed.to_string(),
                resolved_destination: destination,
            })
        }
        FetchScheme::S3 => {
            let destination = prepare_destination(&request.destination)?;
            s3::download(
                trimmed,
                &destination,
                request.region.as_deref(),
                progress.as_deref_mut(),
            )?;
            Ok(FetchResult {
                scheme,
                resolved_source: trimmed.to_string(),
                resolved_destination: destination,
            })
        }
        FetchScheme::Git => {
            let destination = prepare_destination(&request.destination)?;
            git::clone_at_ref(trimmed, "HEAD", &destination, progress.as_deref_mut())?;
            Ok(FetchResult {
                scheme,
                resolved_source: trimmed.to_string(),
                resolved_destination: destination,
            })
        }
        FetchScheme::LocalFile => {
            let resolved = local::resolve_local_source(trimmed, request.manifest_root.as_deref())?;
            let destination = prepare_destination(&request.destination)?;
            local::copy_local(&resolved, &destination, progress.as_deref_mut())?;
            Ok(FetchResult {
                scheme,
                resolved_source: resolved.to_string(),
                resolved_destination: destination,
            })
        }
        other => Err(FetchError::UnsupportedScheme {
            scheme: other,
            url: trimmed.to_string(),
        }),
    }
}

/// Clone a git source at a specific ref into `destination`.
pub fn fetch_git(
    url: &str,
    reference: &str,
    destination: &Utf8Path,
    progress: Option<&mut FetchProgressFn<'_>>,
) -> Result<FetchResult> {
    let destination = prepare_destination(destination)?;
    git::clone_at_ref(url, reference, &destination, progress)?;
    Ok(FetchResult {
        scheme: FetchScheme::Git,
        resolved_source: url.to_string(),
        resolved_destination: destination,
    })
}

/// Execute a batch of transfers concurrently on the rayon pool. Results are
/// returned in request order. The shared callback receives the request index
/// alongside each progress report.
pub fn fetch_all(
    requests: &[FetchRequest],
    progress: Option<&(dyn Fn(usize, &FetchProgress) -> bool + Sync)>,
) -> Vec<Result<FetchResult>> {
    use rayon::prelude::*;

    requests
        .par_iter()
        .enumerate()
        .map(|(index, request)| match progress {
            Some(cb) => {
                let mut per_request = move |p: &FetchProgress| cb(index, p);
                fetch(request, Some(&mut per_request))
            }
            None => fetch(request, None),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn empty_source_fails() {
        let req = FetchRequest::new("   ", "/tmp/out");
        assert!(matches!(fetch(&req, None), Err(FetchError::EmptySource)));
    }

    #[test]
    fn unsupported_scheme_is_reported() {
        let dir = TempDir::new().unwrap();
        let req = FetchRequest::new("ssh://host/path", utf8(&dir, "out"));
        let err = fetch(&req, None).unwrap_err();
        assert!(matches!(
            err,
            FetchError::UnsupportedScheme {
                scheme: FetchScheme::Ssh,
                ..
            }
        ));
    }

    #[test]
    fn local_file_fetch_copies() {
        let dir = TempDir::new().unwrap();
        let src = utf8(&dir, "src.txt");
        fs::write(&src, b"local payload").unwrap();

        let dest = utf8(&dir, "nested/dir/out.txt");
        let result = fetch(&FetchRequest::new(src.as_str(), dest.clone()), None).unwrap();
        assert_eq!(result.scheme, FetchScheme::LocalFile);
        assert_eq!(fs::read(&dest).unwrap(), b"local payload");
    }

    #[test]
    fn local_fetch_relative_to_manifest_root() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir, "project");
        fs::create_dir_all(root.join("vendor")).unwrap();
        fs::write(root.join("vendor/blob.bin"), b"blob").unwrap();

        let dest = utf8(&dir, "out.bin");
        let mut req = FetchRequest::new("vendor/blob.bin", dest.clone());
        req.manifest_root = Some(root);
        fetch(&req, None).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"blob");
    }

    #[test]
    fn local_fetch_reports_progress() {
        let dir = TempDir::new().unwrap();
        let src = utf8(&dir, "src.txt");
        fs::write(&src, vec![7u8; 256]).unwrap();

        let dest = utf8(&dir, "out.txt");
        let mut last = None;
        fetch(
            &FetchRequest::new(src.as_str(), dest),
            Some(&mut |p: &FetchProgress| {
                last = Some(*p);
                true
            }),
        )
        .unwrap();
        match last.unwrap() {
            FetchProgress::Transfer { transferred, .. } => assert_eq!(transferred, 256),
            other => panic!("unexpected progress: {other:?}"),
        }
    }

    #[test]
    fn local_fetch_abort_removes_destination() {
        let dir = TempDir::new().unwrap();
        let src = utf8(&dir, "src.txt");
        fs::write(&src, vec![7u8; 256]).unwrap();

        let dest = utf8(&dir, "out.txt");
        let err = fetch(
            &FetchRequest::new(src.as_str(), dest.clone()),
            Some(&mut |_: &FetchProgress| false),
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Aborted));
        assert!(!dest.exists());
    }

    #[test]
    fn batched_fetch_preserves_order() {
        let dir = TempDir::new().unwrap();
        let mut requests = Vec::new();
        for i in 0..4 {
            let src = utf8(&dir, &format!("src{i}.txt"));
            fs::write(&src, format!("payload {i}")).unwrap();
            requests.push(FetchRequest::new(
                src.as_str(),
                utf8(&dir, &format!("out{i}.txt")),
            ));
        }
        // One bad request in the middle.
        requests.insert(2, FetchRequest::new("ssh://nope/x", utf8(&dir, "bad")));

        let results = fetch_all(&requests, None);
        assert_eq!(results.len(), 5);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(results[2].is_err());
        assert!(results[3].is_ok());
        assert!(results[4].is_ok());
        assert_eq!(
            fs::read(utf8(&dir, "out3.txt")).unwrap(),
            b"payload 3".to_vec()
        );
    }
}
