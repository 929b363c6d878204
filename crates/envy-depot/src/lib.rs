//! Out-of-band index of prebuilt package archives.
//!
//! A depot manifest is plain UTF-8 text, one archive URL per line, `#`
//! comments and blank lines ignored, CRLF tolerated. The URL basename must
//! end in `.tar.zst` and parse under the archive naming rule; unparseable
//! lines are logged and skipped. Manifests are consulted in order and the
//! first containing a match wins.

use camino::Utf8Path;
use envy_cache::{entry_name, parse_archive_filename, ARCHIVE_SUFFIX};
use envy_fetch::{fetch_all, FetchRequest};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DepotError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DepotError>;

/// Ordered first-match-wins index: one map of archive stem to URL per
/// manifest. Read-only after construction and safe to share.
#[derive(Debug, Default)]
pub struct DepotIndex {
    manifests: Vec<HashMap<String, String>>,
}

impl DepotIndex {
    /// Download depot manifests and build the index. Failed downloads are
    /// warned and skipped, matching the treatment of unparseable lines.
    pub fn build(depot_urls: &[String], tmp_dir: &Utf8Path) -> Result<DepotIndex> {
        if depot_urls.is_empty() {
            return Ok(DepotIndex::default());
        }

        let requests: Vec<FetchRequest> = depot_urls
            .iter()
            .enumerate()
            .map(|(i, url)| FetchRequest::new(url.clone(), tmp_dir.join(format!("depot-manifest-{i}.txt"))))
            .collect();

        let results = fetch_all(&requests, None);

        let mut index = DepotIndex::default();
        for (url, result) in depot_urls.iter().zip(results) {
            let fetched = match result {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(url, "depot: failed to fetch manifest: {e}");
                    continue;
                }
            };
            let text = match std::fs::read_to_string(fetched.resolved_destination.as_std_path()) {
                Ok(text) => text,
                Err(e) => {
                    warn!(url, "depot: failed to read manifest: {e}");
                    continue;
                }
            };
            let entries = parse_manifest_text(&text);
            if !entries.is_empty() {
                index.manifests.push(entries);
            }
        }

        debug!(manifests = index.manifests.len(), "depot index built");
        Ok(index)
    }

    /// Build from already-fetched manifest contents, in order.
    pub fn build_from_contents<S: AsRef<str>>(contents: &[S]) -> DepotIndex {
        let mut index = DepotIndex::default();
        for text in contents {
            let entries = parse_manifest_text(text.as_ref());
            if !entries.is_empty() {
                index.manifests.push(entries);
            }
        }
        index
    }

    /// Look up the archive URL for a canonical key. Walks manifests in
    /// order; the first manifest containing the stem wins.
    pub fn find(
        &self,
        key: &str,
        platform: &str,
        arch: &str,
        hash_prefix: &str,
    ) -> Option<&str> {
        let stem = entry_name(key, platform, arch, hash_prefix);
        self.manifests
            .iter()
            .find_map(|m| m.get(&stem))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

/// Parse one manifest into a map of archive stem to URL.
fn parse_manifest_text(text: &str) -> HashMap<String, String> {
    let mut entries = HashMap::new();

    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.trim().is_empty() {
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let filename = match line.rfind('/') {
            Some(slash) if slash + 1 < line.len() => &line[slash + 1..],
            _ => line,
        };

        let Some(stem) = filename.strip_suffix(ARCHIVE_SUFFIX) else {
            warn!(line, "depot: skipping line without {ARCHIVE_SUFFIX} extension");
            continue;
        };
        if parse_archive_filename(stem).is_err() {
            warn!(line, "depot: skipping unparseable line");
            continue;
        }

        entries
            .entry(stem.to_string())
            .or_insert_with(|| line.to_string());
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEM_A: &str = "acme.tool@v1-linux-x86_64-blake3-0011223344556677";
    const STEM_B: &str = "acme.lib@v2-linux-x86_64-blake3-8899aabbccddeeff";

    #[test]
    fn parses_urls_comments_and_blank_lines() {
        let text = format!(
            "# header comment\n\nhttps://cdn.example.com/{STEM_A}.tar.zst\n   \nhttps://cdn.example.com/{STEM_B}.tar.zst\n"
        );
        let index = DepotIndex::build_from_contents(&[text]);
        assert!(!index.is_empty());
        let expected = format!("https://cdn.example.com/{STEM_A}.tar.zst");
        assert_eq!(
            index.find("acme.tool@v1", "linux", "x86_64", "0011223344556677"),
            Some(expected.as_str())
        );
        assert!(index
            .find("acme.tool@v9", "linux", "x86_64", "0011223344556677")
            .is_none());
    }

    #[test]
    fn crlf_lines_are_tolerated() {
        let text = format!("https://cdn.example.com/{STEM_A}.tar.zst\r\n");
        let index = DepotIndex::build_from_contents(&[text]);
        assert!(index
            .find("acme.tool@v1", "linux", "x86_64", "0011223344556677")
            .is_some());
    }

    #[test]
    fn unparseable_lines_are_skipped() {
        let text = format!(
            "https://cdn.example.com/not-an-entry.tar.zst\nhttps://cdn.example.com/plain.txt\nhttps://cdn.example.com/{STEM_A}.tar.zst\n"
        );
        let index = DepotIndex::build_from_contents(&[text]);
        assert!(index
            .find("acme.tool@v1", "linux", "x86_64", "0011223344556677")
            .is_some());
    }

    #[test]
    fn first_manifest_wins() {
        let first = format!("https://first.example.com/{STEM_A}.tar.zst\n");
        let second = format!(
            "https://second.example.com/{STEM_A}.tar.zst\nhttps://second.example.com/{STEM_B}.tar.zst\n"
        );
        let index = DepotIndex::build_from_contents(&[first, second]);

        let expected_a = format!("https://first.example.com/{STEM_A}.tar.zst");
        let expected_b = format!("https://second.example.com/{STEM_B}.tar.zst");
        assert_eq!(
            index.find("acme.tool@v1", "linux", "x86_64", "0011223344556677"),
            Some(expected_a.as_str())
        );
        assert_eq!(
            index.find("acme.lib@v2", "linux", "x86_64", "8899aabbccddeeff"),
            Some(expected_b.as_str())
        );
    }

    #[test]
    fn empty_index() {
        let index = DepotIndex::build_from_contents::<String>(&[]);
        assert!(index.is_empty());
        assert!(index.find("a.b@c", "linux", "x86_64", "00").is_none());
    }
}
