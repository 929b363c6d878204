//! Entry directory and export archive naming.
//!
//! An entry is `<key>-<platform>-<arch>-blake3-<hash_prefix>`; the export
//! archive is that name plus `.tar.zst`. The parser requires exactly one
//! `@` in the identity and a literal `-blake3-` token before a non-empty
//! hex prefix. Platform and arch never contain `-`.

use crate::{CacheError, Result};

pub const ARCHIVE_SUFFIX: &str = ".tar.zst";
const BLAKE3_TOKEN: &str = "-blake3-";

/// Format a cache entry directory name.
pub fn entry_name(key: &str, platform: &str, arch: &str, hash_prefix: &str) -> String {
    format!("{key}-{platform}-{arch}{BLAKE3_TOKEN}{hash_prefix}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArchiveName {
    /// Canonical key, options included.
    pub key: String,
    pub platform: String,
    pub arch: String,
    pub hash_prefix: String,
}

impl ParsedArchiveName {
    pub fn entry_name(&self) -> String {
        entry_name(&self.key, &self.platform, &self.arch, &self.hash_prefix)
    }
}

/// Parse an entry/archive stem (no `.tar.zst` suffix).
pub fn parse_archive_filename(stem: &str) -> Result<ParsedArchiveName> {
    let bad = || CacheError::BadArchiveName(stem.to_string());

    let token = stem.rfind(BLAKE3_TOKEN).ok_or_else(bad)?;
    let hash_prefix = &stem[token + BLAKE3_TOKEN.len()..];
    if hash_prefix.is_empty()
        || !hash_prefix
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(bad());
    }

    let head = &stem[..token];
    let arch_sep = head.rfind('-').ok_or_else(bad)?;
    let arch = &head[arch_sep + 1..];
    let head = &head[..arch_sep];
    let platform_sep = head.rfind('-').ok_or_else(bad)?;
    let platform = &head[platform_sep + 1..];
    let key = &head[..platform_sep];

    if key.is_empty() || platform.is_empty() || arch.is_empty() {
        return Err(bad());
    }
    // Identity portion (before any options brace) carries exactly one '@'.
    let identity = key.split('{').next().unwrap_or(key);
    if identity.matches('@').count() != 1 {
        return Err(bad());
    }

    Ok(ParsedArchiveName {
        key: key.to_string(),
        platform: platform.to_string(),
        arch: arch.to_string(),
        hash_prefix: hash_prefix.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let name = entry_name("acme.tool@v1", "linux", "x86_64", "00112233aabbccdd");
        assert_eq!(name, "acme.tool@v1-linux-x86_64-blake3-00112233aabbccdd");

        let parsed = parse_archive_filename(&name).unwrap();
        assert_eq!(parsed.key, "acme.tool@v1");
        assert_eq!(parsed.platform, "linux");
        assert_eq!(parsed.arch, "x86_64");
        assert_eq!(parsed.hash_prefix, "00112233aabbccdd");
        assert_eq!(parsed.entry_name(), name);
    }

    #[test]
    fn key_with_options_and_dashes() {
        let name = entry_name("acme.my-tool@v1.2{opt=1}", "darwin", "arm64", "ff00ff00ff00ff00");
        let parsed = parse_archive_filename(&name).unwrap();
        assert_eq!(parsed.key, "acme.my-tool@v1.2{opt=1}");
        assert_eq!(parsed.platform, "darwin");
        assert_eq!(parsed.arch, "arm64");
    }

    #[test]
    fn rejects_missing_token() {
        assert!(parse_archive_filename("acme.tool@v1-linux-x86_64-sha1-0011").is_err());
    }

    #[test]
    fn rejects_empty_or_non_hex_hash() {
        assert!(parse_archive_filename("a.b@v1-linux-x86_64-blake3-").is_err());
        assert!(parse_archive_filename("a.b@v1-linux-x86_64-blake3-xyz").is_err());
        assert!(parse_archive_filename("a.b@v1-linux-x86_64-blake3-00AA").is_err());
    }

    #[test]
    fn rejects_wrong_at_count() {
        assert!(parse_archive_filename("a.b-linux-x86_64-blake3-0011").is_err());
        assert!(parse_archive_filename("a.b@v@1-linux-x86_64-blake3-0011").is_err());
    }

    #[test]
    fn rejects_truncated_forms() {
        assert!(parse_archive_filename("-linux-x86_64-blake3-0011").is_err());
        assert!(parse_archive_filename("blake3-0011").is_err());
    }
}
