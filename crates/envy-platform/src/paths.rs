//! Path expansion and default cache root discovery.

use crate::{PlatformError, Result};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Absolutize and lexically normalize a path without touching the
/// filesystem. `.` components are dropped and `..` pops where possible.
pub fn absolutize(path: &Utf8Path) -> Utf8PathBuf {
    let abs = if path.is_absolute() {
        path.to_owned()
    } else {
        let cwd = std::env::current_dir()
            .ok()
            .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        cwd.join(path)
    };
    normalize(&abs)
}

/// Lexical normalization: resolves `.` and `..` components in place.
pub fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_str()),
        }
    }
    out
}

/// The environment variables consulted for the default cache root, for error
/// messages.
#[cfg(target_os = "macos")]
const CACHE_ROOT_ENV_VARS: &str = "ENVY_CACHE_ROOT or HOME";
#[cfg(all(unix, not(target_os = "macos")))]
const CACHE_ROOT_ENV_VARS: &str = "ENVY_CACHE_ROOT, XDG_CACHE_HOME or HOME";
#[cfg(windows)]
const CACHE_ROOT_ENV_VARS: &str = "ENVY_CACHE_ROOT, LOCALAPPDATA or USERPROFILE";

/// Resolve the default cache root. `ENVY_CACHE_ROOT` always wins.
pub fn get_default_cache_root() -> Result<Utf8PathBuf> {
    if let Ok(root) = std::env::var("ENVY_CACHE_ROOT") {
        if !root.is_empty() {
            return Ok(Utf8PathBuf::from(root));
        }
    }

    platform_cache_root().ok_or(PlatformError::NoCacheRoot(CACHE_ROOT_ENV_VARS))
}

#[cfg(target_os = "macos")]
fn platform_cache_root() -> Option<Utf8PathBuf> {
    let home = std::env::var("HOME").ok()?;
    Some(Utf8PathBuf::from(home).join("Library/Caches/envy"))
}

#[cfg(all(unix, not(target_os = "macos")))]
fn platform_cache_root() -> Option<Utf8PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        if !xdg.is_empty() {
            return Some(Utf8PathBuf::from(xdg).join("envy"));
        }
    }
    let home = std::env::var("HOME").ok()?;
    Some(Utf8PathBuf::from(home).join(".cache/envy"))
}

#[cfg(windows)]
fn platform_cache_root() -> Option<Utf8PathBuf> {
    if let Ok(local) = std::env::var("LOCALAPPDATA") {
        if !local.is_empty() {
            return Some(Utf8PathBuf::from(local).join("envy"));
        }
    }
    if let Ok(profile) = std::env::var("USERPROFILE") {
        if !profile.is_empty() {
            return Some(Utf8PathBuf::from(profile).join("AppData/Local/envy"));
        }
    }
    dirs::cache_dir()
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
        .map(|p| p.join("envy"))
}

/// Expand `~` and environment variables in a path string.
///
/// POSIX accepts `$VAR` and `${VAR}` and fails on undefined variables.
/// Windows additionally accepts `%VAR%`, substitutes empty for undefined
/// variables, and maps `$HOME` to the user-profile variable.
pub fn expand_path(input: &str) -> Result<Utf8PathBuf> {
    if input.is_empty() {
        return Ok(Utf8PathBuf::new());
    }

    let mut s = input.to_string();

    if s == "~" || s.starts_with("~/") || s.starts_with("~\\") {
        let home = home_dir().ok_or_else(|| PlatformError::UndefinedVariable("HOME".into()))?;
        s = format!("{}{}", home, &s[1..]);
    }

    let expanded = expand_vars(&s)?;
    Ok(Utf8PathBuf::from(expanded))
}

fn home_dir() -> Option<String> {
    #[cfg(unix)]
    {
        std::env::var("HOME").ok()
    }
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE").ok()
    }
}

fn lookup_var(name: &str) -> Result<String> {
    #[cfg(unix)]
    {
        std::env::var(name).map_err(|_| PlatformError::UndefinedVariable(name.to_string()))
    }
    #[cfg(windows)]
    {
        // HOME maps to the user profile; other undefined variables expand
        // empty, matching shell behavior on this platform.
        if name == "HOME" {
            return std::env::var("USERPROFILE")
                .map_err(|_| PlatformError::UndefinedVariable("USERPROFILE".to_string()));
        }
        Ok(std::env::var(name).unwrap_or_default())
    }
}

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn expand_vars(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '$' => {
                if let Some(&(_, '{')) = chars.peek() {
                    chars.next();
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c2) in chars.by_ref() {
                        if c2 == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c2);
                    }
                    if !closed || name.is_empty() {
                        return Err(PlatformError::Expansion(s.to_string()));
                    }
                    out.push_str(&lookup_var(&name)?);
                } else {
                    let mut name = String::new();
                    while let Some(&(_, c2)) = chars.peek() {
                        if is_var_char(c2) {
                            name.push(c2);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        // A lone '$' is literal.
                        out.push('$');
                    } else {
                        out.push_str(&lookup_var(&name)?);
                    }
                }
            }
            '%' if cfg!(windows) => {
                let rest = &s[i + 1..];
                if let Some(end) = rest.find('%') {
                    let name = &rest[..end];
                    if !name.is_empty() && name.chars().all(is_var_char) {
                        out.push_str(&lookup_var(name)?);
                        for _ in 0..=end {
                            chars.next();
                        }
                        continue;
                    }
                }
                out.push('%');
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_cur_and_parent() {
        assert_eq!(normalize(Utf8Path::new("/a/./b/../c")), "/a/c");
        assert_eq!(normalize(Utf8Path::new("/a/b/c/")), "/a/b/c");
    }

    #[test]
    fn absolutize_is_absolute() {
        assert!(absolutize(Utf8Path::new("rel/path")).is_absolute());
        #[cfg(unix)]
        assert_eq!(absolutize(Utf8Path::new("/x/./y")), "/x/y");
    }

    #[cfg(unix)]
    #[test]
    fn expand_tilde_and_vars() {
        // SAFETY: test-local variable, no concurrent readers depend on it.
        std::env::set_var("ENVY_TEST_EXPAND", "value");
        assert_eq!(
            expand_path("/a/$ENVY_TEST_EXPAND/b").unwrap(),
            "/a/value/b"
        );
        assert_eq!(
            expand_path("/a/${ENVY_TEST_EXPAND}/b").unwrap(),
            "/a/value/b"
        );

        let home = std::env::var("HOME").unwrap();
        assert_eq!(expand_path("~/x").unwrap(), format!("{home}/x"));
    }

    #[cfg(unix)]
    #[test]
    fn undefined_variable_fails() {
        let err = expand_path("$ENVY_DEFINITELY_UNDEFINED_VAR/x").unwrap_err();
        assert!(matches!(err, PlatformError::UndefinedVariable(_)));
    }

    #[test]
    fn lone_dollar_is_literal() {
        assert_eq!(expand_path("/a/$/b").unwrap(), "/a/$/b");
    }

    #[test]
    fn env_override_wins_for_cache_root() {
        // SAFETY: test-local override.
        std::env::set_var("ENVY_CACHE_ROOT", "/custom/cache");
        assert_eq!(get_default_cache_root().unwrap(), "/custom/cache");
        std::env::remove_var("ENVY_CACHE_ROOT");
    }
}
