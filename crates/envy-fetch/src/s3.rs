//! S3 transport. Credentials and region come from the environment via the
//! standard provider chain; the async SDK runs on a private current-thread
//! runtime so callers stay blocking.

use crate::{FetchError, FetchProgress, FetchProgressFn, Result};
use aws_sdk_s3::error::DisplayErrorContext;
use camino::Utf8Path;
use std::fs::File;
use std::io::Write;

/// Parse `s3://bucket/key` into bucket and key. Query strings (for example
/// `?versionId=X`) stay part of the key.
fn parse_s3_uri(uri: &str) -> Result<(&str, &str)> {
    let rest = uri
        .strip_prefix("s3://")
        .or_else(|| uri.strip_prefix("S3://"))
        .ok_or_else(|| FetchError::Network {
            url: uri.to_string(),
            message: "not an s3:// URI".to_string(),
        })?;
    let slash = rest.find('/').ok_or_else(|| FetchError::Network {
        url: uri.to_string(),
        message: "missing key after bucket".to_string(),
    })?;
    let (bucket, key) = (&rest[..slash], &rest[slash + 1..]);
    if bucket.is_empty() || key.is_empty() {
        return Err(FetchError::Network {
            url: uri.to_string(),
            message: "empty bucket or key".to_string(),
        });
    }
    Ok((bucket, key))
}

/// Stream an S3 object into `destination` in 64 KiB-or-larger chunks.
pub fn download(
    uri: &str,
    destination: &Utf8Path,
    region: Option<&str>,
    mut progress: Option<&mut FetchProgressFn<'_>>,
) -> Result<()> {
    let (bucket, key) = parse_s3_uri(uri)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| FetchError::Io {
            path: destination.to_string(),
            source,
        })?;

    let network = |message: String| FetchError::Network {
        url: uri.to_string(),
        message,
    };

    runtime.block_on(async {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let sdk_config = loader.load().await;
        let client = aws_sdk_s3::Client::new(&sdk_config);

        let output = client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| network(format!("{}", DisplayErrorContext(&e))))?;

        let total = output.content_length().and_then(|len| u64::try_from(len).ok());
        let mut body = output.body;

        let mut file =
            File::create(destination.as_std_path()).map_err(|source| FetchError::Io {
                path: destination.to_string(),
                source,
            })?;

        let mut transferred = 0u64;
        while let Some(bytes) = body
            .try_next()
            .await
            .map_err(|e| network(format!("{}", DisplayErrorContext(&e))))?
        {
            file.write_all(&bytes).map_err(|source| FetchError::Io {
                path: destination.to_string(),
                source,
            })?;
            transferred += bytes.len() as u64;

            if let Some(cb) = progress.as_deref_mut() {
                if !cb(&FetchProgress::Transfer { transferred, total }) {
                    drop(file);
                    let _ = std::fs::remove_file(destination.as_std_path());
                    return Err(FetchError::Aborted);
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_key() {
        assert_eq!(
            parse_s3_uri("s3://bucket/path/to/key").unwrap(),
            ("bucket", "path/to/key")
        );
    }

    #[test]
    fn version_query_stays_in_key() {
        assert_eq!(
            parse_s3_uri("s3://bucket/key?versionId=X").unwrap(),
            ("bucket", "key?versionId=X")
        );
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse_s3_uri("s3://bucket").is_err());
        assert!(parse_s3_uri("s3:///key").is_err());
        assert!(parse_s3_uri("http://bucket/key").is_err());
    }
}
