//! Shell integration hooks.
//!
//! One hook file per shell under `cache_root/shell/`, each stamped with
//! `_ENVY_HOOK_VERSION` so shells can detect stale hooks and re-source.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use envy_cache::Cache;

pub const HOOK_VERSION: &str = "3";

const BASH_HOOK: &str = r#"# envy shell hook (bash)
_ENVY_HOOK_VERSION=@VERSION@
envy() {
    command envy "$@"
    local rc=$?
    if [ -f "$ENVY_CACHE_ROOT/shell/env.bash" ]; then
        . "$ENVY_CACHE_ROOT/shell/env.bash"
    fi
    return $rc
}
"#;

const ZSH_HOOK: &str = r#"# envy shell hook (zsh)
_ENVY_HOOK_VERSION=@VERSION@
envy() {
    command envy "$@"
    local rc=$?
    if [ -f "$ENVY_CACHE_ROOT/shell/env.zsh" ]; then
        . "$ENVY_CACHE_ROOT/shell/env.zsh"
    fi
    return $rc
}
"#;

const FISH_HOOK: &str = r#"# envy shell hook (fish)
set -g _ENVY_HOOK_VERSION @VERSION@
function envy
    command envy $argv
    set -l rc $status
    if test -f "$ENVY_CACHE_ROOT/shell/env.fish"
        source "$ENVY_CACHE_ROOT/shell/env.fish"
    end
    return $rc
end
"#;

const PS1_HOOK: &str = r#"# envy shell hook (powershell)
$env:_ENVY_HOOK_VERSION = "@VERSION@"
function envy {
    & envy.exe @args
    $rc = $LASTEXITCODE
    $envFile = Join-Path $env:ENVY_CACHE_ROOT "shell/env.ps1"
    if (Test-Path $envFile) { . $envFile }
    exit $rc
}
"#;

/// Write all hook files; returns the paths written.
pub fn write_hooks(cache: &Cache) -> Result<Vec<Utf8PathBuf>> {
    let shell_dir = cache.shell_dir();
    std::fs::create_dir_all(shell_dir.as_std_path())
        .with_context(|| format!("creating {shell_dir}"))?;

    let hooks = [
        ("hook.bash", BASH_HOOK),
        ("hook.zsh", ZSH_HOOK),
        ("hook.fish", FISH_HOOK),
        ("hook.ps1", PS1_HOOK),
    ];

    let mut written = Vec::with_capacity(hooks.len());
    for (name, template) in hooks {
        let path = shell_dir.join(name);
        let content = template.replace("@VERSION@", HOOK_VERSION);
        std::fs::write(path.as_std_path(), content)
            .with_context(|| format!("writing {path}"))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn hooks_are_written_and_stamped() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().join("cache")).unwrap();
        let cache = Cache::new(Some(root)).unwrap();

        let written = write_hooks(&cache).unwrap();
        assert_eq!(written.len(), 4);
        for path in &written {
            let content = std::fs::read_to_string(path.as_std_path()).unwrap();
            assert!(
                content.contains("_ENVY_HOOK_VERSION"),
                "{path} missing version stamp"
            );
            assert!(content.contains(HOOK_VERSION));
        }
        assert!(cache.shell_dir().join("hook.bash").exists());
        assert!(cache.shell_dir().join("hook.ps1").exists());
    }
}
