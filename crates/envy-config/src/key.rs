//! Canonical package keys.
//!
//! A key is `namespace.name@revision` optionally followed by the canonical
//! option serialization: `acme.tool@v1{opt=1}`. Namespace is everything
//! before the first `.`, name everything between that and the `@`, revision
//! everything after. All three are opaque non-empty strings.

use crate::{ConfigError, Result};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Split an identity into `(namespace, name, revision)`, validating the
/// `[^.]+\.[^@]+@[^{}]+` shape.
pub fn parse_identity(identity: &str) -> Result<(&str, &str, &str)> {
    let dot = identity.find('.').ok_or_else(|| ConfigError::MalformedIdentity {
        identity: identity.to_string(),
        reason: "missing namespace separator '.'".to_string(),
    })?;
    let rest = &identity[dot + 1..];
    let at = rest.find('@').ok_or_else(|| ConfigError::MalformedIdentity {
        identity: identity.to_string(),
        reason: "missing revision separator '@'".to_string(),
    })?;

    let ns = &identity[..dot];
    let name = &rest[..at];
    let revision = &rest[at + 1..];

    if ns.is_empty() || name.is_empty() || revision.is_empty() {
        return Err(ConfigError::MalformedIdentity {
            identity: identity.to_string(),
            reason: "namespace, name and revision must be non-empty".to_string(),
        });
    }
    if revision.contains('{') || revision.contains('}') {
        return Err(ConfigError::MalformedIdentity {
            identity: identity.to_string(),
            reason: "revision must not contain braces".to_string(),
        });
    }
    Ok((ns, name, revision))
}

/// A parsed canonical key. Immutable; cheap to clone; ordered and hashed by
/// its canonical string.
#[derive(Debug, Clone)]
pub struct PkgKey {
    canonical: String,
    identity_len: usize,
    dot: usize,
    at: usize,
}

impl PkgKey {
    /// Parse either a bare identity or a full canonical key.
    pub fn parse(canonical_or_identity: &str) -> Result<Self> {
        let canonical = canonical_or_identity.to_string();
        let identity_len = canonical.find('{').unwrap_or(canonical.len());
        let identity = &canonical[..identity_len];
        let (ns, _name, _rev) = parse_identity(identity)?;
        let dot = ns.len();
        let at = identity[dot + 1..]
            .find('@')
            .map(|i| dot + 1 + i)
            .expect("validated by parse_identity");
        Ok(Self {
            canonical,
            identity_len,
            dot,
            at,
        })
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// `namespace.name@revision` without options.
    pub fn identity(&self) -> &str {
        &self.canonical[..self.identity_len]
    }

    pub fn namespace(&self) -> &str {
        &self.canonical[..self.dot]
    }

    pub fn name(&self) -> &str {
        &self.canonical[self.dot + 1..self.at]
    }

    pub fn revision(&self) -> &str {
        &self.canonical[self.at + 1..self.identity_len]
    }

    /// Match a possibly-partial query against this key.
    ///
    /// Query forms: `name`, `namespace.name`, `name@revision`,
    /// `namespace.name@revision`, or a full canonical key.
    pub fn matches(&self, query: &str) -> bool {
        if query == self.canonical() || query == self.identity() {
            return true;
        }

        let query_dot = query.find('.');
        let query_at = query.find('@');

        match (query_dot, query_at) {
            (None, None) => query == self.name(),
            (Some(dot), None) => {
                &query[..dot] == self.namespace() && &query[dot + 1..] == self.name()
            }
            (None, Some(at)) => {
                &query[..at] == self.name() && &query[at + 1..] == self.revision()
            }
            // Full identity already handled above; anything else is not a
            // recognized partial form.
            (Some(_), Some(_)) => false,
        }
    }
}

impl fmt::Display for PkgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl PartialEq for PkgKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for PkgKey {}

impl PartialOrd for PkgKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PkgKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl Hash for PkgKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_components() {
        let key = PkgKey::parse("acme.tool@v1").unwrap();
        assert_eq!(key.namespace(), "acme");
        assert_eq!(key.name(), "tool");
        assert_eq!(key.revision(), "v1");
        assert_eq!(key.identity(), "acme.tool@v1");
        assert_eq!(key.canonical(), "acme.tool@v1");
    }

    #[test]
    fn name_may_contain_dots() {
        let key = PkgKey::parse("acme.some.tool@v1").unwrap();
        assert_eq!(key.namespace(), "acme");
        assert_eq!(key.name(), "some.tool");
        assert_eq!(key.revision(), "v1");
    }

    #[test]
    fn options_are_excluded_from_identity() {
        let key = PkgKey::parse("acme.tool@v1{opt=1}").unwrap();
        assert_eq!(key.identity(), "acme.tool@v1");
        assert_eq!(key.canonical(), "acme.tool@v1{opt=1}");
        assert_eq!(key.revision(), "v1");
    }

    #[test]
    fn rejects_malformed() {
        assert!(PkgKey::parse("noseparator@v1").is_err());
        assert!(PkgKey::parse("ns.name").is_err());
        assert!(PkgKey::parse(".name@v1").is_err());
        assert!(PkgKey::parse("ns.@v1").is_err());
        assert!(PkgKey::parse("ns.name@").is_err());
    }

    #[test]
    fn matches_partial_queries() {
        let key = PkgKey::parse("acme.tool@v1{opt=1}").unwrap();
        assert!(key.matches("tool"));
        assert!(key.matches("acme.tool"));
        assert!(key.matches("tool@v1"));
        assert!(key.matches("acme.tool@v1"));
        assert!(key.matches("acme.tool@v1{opt=1}"));

        assert!(!key.matches("other"));
        assert!(!key.matches("acme.other"));
        assert!(!key.matches("tool@v2"));
        assert!(!key.matches("other.tool@v1"));
    }

    #[test]
    fn keys_order_and_compare_by_canonical() {
        let a = PkgKey::parse("acme.tool@v1").unwrap();
        let b = PkgKey::parse("acme.tool@v1{o=1}").unwrap();
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(a, PkgKey::parse("acme.tool@v1").unwrap());
    }
}
