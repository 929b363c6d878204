//! HTTP(S) transport over a shared blocking client.

use crate::{FetchError, FetchProgress, FetchProgressFn, Result};
use camino::Utf8Path;
use once_cell::sync::Lazy;
use std::fs::File;
use std::io::{Read, Write};
use tracing::trace;

const CHUNK_SIZE: usize = 64 * 1024;

static CLIENT: Lazy<reqwest::blocking::Client> = Lazy::new(|| {
    reqwest::blocking::Client::builder()
        .user_agent(concat!("envy/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("http client construction cannot fail with static config")
});

/// Stream `url` into `destination`. Follows redirects, fails on HTTP error
/// status, reports progress per chunk.
pub fn download(
    url: &str,
    destination: &Utf8Path,
    mut progress: Option<&mut FetchProgressFn<'_>>,
) -> Result<()> {
    let network = |message: String| FetchError::Network {
        url: url.to_string(),
        message,
    };

    let response = CLIENT
        .get(url)
        .send()
        .map_err(|e| network(e.to_string()))?
        .error_for_status()
        .map_err(|e| network(e.to_string()))?;

    let total = response.content_length();
    let mut reader = response;

    let mut file = File::create(destination.as_std_path()).map_err(|source| FetchError::Io {
        path: destination.to_string(),
        source,
    })?;

    let mut transferred = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).map_err(|e| {
            let _ = std::fs::remove_file(destination.as_std_path());
            network(e.to_string())
        })?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(|source| FetchError::Io {
            path: destination.to_string(),
            source,
        })?;
        transferred += n as u64;

        if let Some(cb) = progress.as_deref_mut() {
            let keep_going = cb(&FetchProgress::Transfer { transferred, total });
            if !keep_going {
                drop(file);
                let _ = std::fs::remove_file(destination.as_std_path());
                trace!(url, "http download aborted by callback");
                return Err(FetchError::Aborted);
            }
        }
    }

    Ok(())
}
