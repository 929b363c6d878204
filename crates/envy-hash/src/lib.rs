//! Content hashing: BLAKE3 over bytes for cache fingerprints, SHA-256 over
//! files for download verification. Hex output is always lowercase.

use camino::Utf8Path;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use thiserror::Error;

/// 64 KiB streaming chunk size for file digests.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("io error reading {path}: {source}")]
    Io { path: String, source: io::Error },

    #[error("hash mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, HashError>;

/// BLAKE3 digest of `bytes` as a 32-byte array.
pub fn blake3_digest(bytes: &[u8]) -> [u8; 32] {
    *blake3::hash(bytes).as_bytes()
}

/// BLAKE3 digest of `bytes` as lowercase hex.
pub fn blake3_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// First `n` hex characters of the BLAKE3 digest of `bytes`. Used as the
/// short fingerprint in cache entry names.
pub fn blake3_hex_prefix(bytes: &[u8], n: usize) -> String {
    let mut hex = blake3_hex(bytes);
    hex.truncate(n);
    hex
}

/// SHA-256 digest of a file's contents, streamed in 64 KiB chunks.
pub fn sha256_file(path: &Utf8Path) -> Result<[u8; 32]> {
    let mut file = File::open(path.as_std_path()).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            HashError::NotFound(path.to_string())
        } else {
            HashError::Io {
                path: path.to_string(),
                source: e,
            }
        }
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|source| HashError::Io {
            path: path.to_string(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().into())
}

/// SHA-256 digest of a file's contents as lowercase hex.
pub fn sha256_file_hex(path: &Utf8Path) -> Result<String> {
    Ok(hex::encode(sha256_file(path)?))
}

/// Verify an actual digest against an expected lowercase hex string.
/// Comparison is case-insensitive on the expected side.
pub fn sha256_verify(expected_hex: &str, actual: &[u8; 32]) -> Result<()> {
    let actual_hex = hex::encode(actual);
    if expected_hex.to_ascii_lowercase() != actual_hex {
        return Err(HashError::Mismatch {
            expected: expected_hex.to_string(),
            actual: actual_hex,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::fs;
    use tempfile::TempDir;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const EMPTY_BLAKE3: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";

    fn utf8(dir: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn blake3_empty_input() {
        assert_eq!(blake3_hex(b""), EMPTY_BLAKE3);
    }

    #[test]
    fn blake3_prefix_truncates() {
        let prefix = blake3_hex_prefix(b"acme.tool@v1", 16);
        assert_eq!(prefix.len(), 16);
        assert!(blake3_hex(b"acme.tool@v1").starts_with(&prefix));
        assert!(prefix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn blake3_is_deterministic() {
        assert_eq!(blake3_digest(b"payload"), blake3_digest(b"payload"));
        assert_ne!(blake3_digest(b"payload"), blake3_digest(b"payloae"));
    }

    #[test]
    fn sha256_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir, "empty");
        fs::write(&path, b"").unwrap();
        assert_eq!(sha256_file_hex(&path).unwrap(), EMPTY_SHA256);
    }

    #[test]
    fn sha256_streams_multiple_chunks() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir, "big");
        // Larger than one chunk so the streaming loop iterates.
        fs::write(&path, vec![0xabu8; CHUNK_SIZE * 2 + 17]).unwrap();

        let digest = sha256_file(&path).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(vec![0xabu8; CHUNK_SIZE * 2 + 17]);
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(digest, expected);
    }

    #[test]
    fn sha256_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = sha256_file(&utf8(&dir, "absent")).unwrap_err();
        assert!(matches!(err, HashError::NotFound(_)));
    }

    #[test]
    fn verify_accepts_match_and_uppercase() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir, "empty");
        fs::write(&path, b"").unwrap();
        let digest = sha256_file(&path).unwrap();

        sha256_verify(EMPTY_SHA256, &digest).unwrap();
        sha256_verify(&EMPTY_SHA256.to_ascii_uppercase(), &digest).unwrap();
    }

    #[test]
    fn verify_mismatch_carries_both_digests() {
        let dir = TempDir::new().unwrap();
        let path = utf8(&dir, "f");
        fs::write(&path, b"data").unwrap();
        let digest = sha256_file(&path).unwrap();

        let err = sha256_verify(EMPTY_SHA256, &digest).unwrap_err();
        match err {
            HashError::Mismatch { expected, actual } => {
                assert_eq!(expected, EMPTY_SHA256);
                assert_eq!(actual, hex::encode(digest));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
