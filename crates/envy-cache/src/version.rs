//! Semver-like version comparison for the `latest` file. Pre-release
//! suffixes order below the corresponding release.

use std::cmp::Ordering;

/// True when `candidate` is strictly newer than `current`.
pub fn version_newer(candidate: &str, current: &str) -> bool {
    compare(candidate, current) == Ordering::Greater
}

fn split_pre(version: &str) -> (&str, Option<&str>) {
    match version.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (version, None),
    }
}

fn compare_idents(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(ln), Ok(rn)) => ln.cmp(&rn),
                    // Numeric identifiers order below alphanumeric ones.
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn compare(a: &str, b: &str) -> Ordering {
    let (a_core, a_pre) = split_pre(a.trim());
    let (b_core, b_pre) = split_pre(b.trim());

    let core = compare_idents(a_core, b_core);
    if core != Ordering::Equal {
        return core;
    }

    match (a_pre, b_pre) {
        (None, None) => Ordering::Equal,
        // A release is newer than any of its pre-releases.
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(ap), Some(bp)) => compare_idents(ap, bp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_components() {
        assert!(version_newer("1.2.0", "1.1.9"));
        assert!(version_newer("1.10.0", "1.9.0"));
        assert!(!version_newer("1.1.9", "1.2.0"));
        assert!(!version_newer("1.2.0", "1.2.0"));
    }

    #[test]
    fn prerelease_below_release() {
        assert!(version_newer("1.0.0", "1.0.0-rc.1"));
        assert!(!version_newer("1.0.0-rc.1", "1.0.0"));
        assert!(version_newer("1.0.1-rc.1", "1.0.0"));
    }

    #[test]
    fn prerelease_ordering() {
        assert!(version_newer("1.0.0-rc.2", "1.0.0-rc.1"));
        assert!(version_newer("1.0.0-rc.1", "1.0.0-beta.9"));
    }

    #[test]
    fn longer_core_wins_when_prefix_equal() {
        assert!(version_newer("1.0.0.1", "1.0.0"));
    }
}
