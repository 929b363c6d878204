//! The seven-slot verb table.
//!
//! Every slot defaults to `None`; absent verbs get the engine's defaulted
//! behavior (fetch from declared sources, stage by extraction, install by
//! copying `stage/`). The concrete implementation runs a configured
//! subprocess per verb with the package's directories exported through the
//! environment; tests install closures directly.

use crate::{EngineError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use envy_config::VerbCommands;
use std::collections::BTreeMap;
use std::process::Command;
use tracing::debug;

/// Directories and dependency artifacts a verb may touch.
#[derive(Debug, Clone)]
pub struct VerbContext {
    pub key: String,
    pub fetch_dir: Utf8PathBuf,
    pub stage_dir: Utf8PathBuf,
    pub work_dir: Utf8PathBuf,
    pub install_dir: Utf8PathBuf,
    /// Published location; present from deploy onward.
    pub pkg_dir: Option<Utf8PathBuf>,
    pub project_root: Utf8PathBuf,
    /// Identity to published `pkg/` path for each dependency.
    pub dep_pkg_paths: Vec<(String, Utf8PathBuf)>,
}

pub type VerbFn = Box<dyn Fn(&VerbContext) -> Result<()> + Send + Sync>;
pub type CheckFn = Box<dyn Fn(&VerbContext) -> Result<bool> + Send + Sync>;

/// Tagged verb table; slots default to `None`.
#[derive(Default)]
pub struct VerbSet {
    pub fetch: Option<VerbFn>,
    pub stage: Option<VerbFn>,
    pub build: Option<VerbFn>,
    pub install: Option<VerbFn>,
    pub check: Option<CheckFn>,
    pub deploy: Option<VerbFn>,
    /// Product name to path relative to `pkg/`.
    pub products: BTreeMap<String, String>,
}

impl std::fmt::Debug for VerbSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerbSet")
            .field("fetch", &self.fetch.is_some())
            .field("stage", &self.stage.is_some())
            .field("build", &self.build.is_some())
            .field("install", &self.install.is_some())
            .field("check", &self.check.is_some())
            .field("deploy", &self.deploy.is_some())
            .field("products", &self.products)
            .finish()
    }
}

impl VerbSet {
    /// Build a subprocess-backed verb table from recipe commands.
    pub fn from_commands(commands: &VerbCommands, products: BTreeMap<String, String>) -> VerbSet {
        let command_verb = |verb: &'static str, cmd: &Option<String>| -> Option<VerbFn> {
            cmd.as_ref().map(|cmd| {
                let cmd = cmd.clone();
                Box::new(move |ctx: &VerbContext| run_command_verb(verb, &cmd, ctx)) as VerbFn
            })
        };

        VerbSet {
            fetch: command_verb("fetch", &commands.fetch),
            stage: command_verb("stage", &commands.stage),
            build: command_verb("build", &commands.build),
            install: command_verb("install", &commands.install),
            deploy: command_verb("deploy", &commands.deploy),
            check: commands.check.as_ref().map(|cmd| {
                let cmd = cmd.clone();
                Box::new(move |ctx: &VerbContext| run_check_verb(&cmd, ctx)) as CheckFn
            }),
            products,
        }
    }
}

fn shell_command(cmd: &str) -> Command {
    #[cfg(unix)]
    {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        command
    }
    #[cfg(windows)]
    {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(cmd);
        command
    }
}

fn configured_command(cmd: &str, ctx: &VerbContext) -> Command {
    let mut command = shell_command(cmd);
    command.current_dir(ctx.work_dir.as_std_path());
    command.env("ENVY_FETCH_DIR", ctx.fetch_dir.as_str());
    command.env("ENVY_STAGE_DIR", ctx.stage_dir.as_str());
    command.env("ENVY_WORK_DIR", ctx.work_dir.as_str());
    command.env("ENVY_INSTALL_DIR", ctx.install_dir.as_str());
    command.env("ENVY_PROJECT_ROOT", ctx.project_root.as_str());
    if let Some(pkg) = &ctx.pkg_dir {
        command.env("ENVY_PKG_DIR", pkg.as_str());
    }
    if !ctx.dep_pkg_paths.is_empty() {
        let joined = ctx
            .dep_pkg_paths
            .iter()
            .map(|(_, p)| p.as_str())
            .collect::<Vec<_>>()
            .join(path_sep());
        command.env("ENVY_DEPS", joined);
    }
    command
}

fn path_sep() -> &'static str {
    if cfg!(windows) {
        ";"
    } else {
        ":"
    }
}

fn run_command_verb(verb: &'static str, cmd: &str, ctx: &VerbContext) -> Result<()> {
    debug!(key = %ctx.key, verb, cmd, "running verb");
    let status = configured_command(cmd, ctx)
        .status()
        .map_err(|e| EngineError::Verb {
            key: ctx.key.clone(),
            verb,
            message: format!("failed to launch {cmd:?}: {e}"),
        })?;
    if !status.success() {
        return Err(EngineError::Verb {
            key: ctx.key.clone(),
            verb,
            message: format!("{cmd:?} exited with {status}"),
        });
    }
    Ok(())
}

/// Run a custom fetch command declared inline in a source table.
pub(crate) fn run_fetch_command(cmd: &str, ctx: &VerbContext) -> Result<()> {
    run_command_verb("fetch", cmd, ctx)
}

/// Exit status zero means "already installed on the host".
fn run_check_verb(cmd: &str, ctx: &VerbContext) -> Result<bool> {
    debug!(key = %ctx.key, cmd, "running check verb");
    let status = configured_command(cmd, ctx)
        .status()
        .map_err(|e| EngineError::Verb {
            key: ctx.key.clone(),
            verb: "check",
            message: format!("failed to launch {cmd:?}: {e}"),
        })?;
    Ok(status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> VerbContext {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        for sub in ["fetch", "stage", "work", "install"] {
            std::fs::create_dir_all(root.join(sub)).unwrap();
        }
        VerbContext {
            key: "test.pkg@v1".to_string(),
            fetch_dir: root.join("fetch"),
            stage_dir: root.join("stage"),
            work_dir: root.join("work"),
            install_dir: root.join("install"),
            pkg_dir: None,
            project_root: root.clone(),
            dep_pkg_paths: Vec::new(),
        }
    }

    #[test]
    fn absent_slots_default_to_none() {
        let set = VerbSet::from_commands(&VerbCommands::default(), BTreeMap::new());
        assert!(set.fetch.is_none());
        assert!(set.stage.is_none());
        assert!(set.build.is_none());
        assert!(set.install.is_none());
        assert!(set.check.is_none());
        assert!(set.deploy.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn command_verb_sees_directories_in_env() {
        let dir = TempDir::new().unwrap();
        let commands = VerbCommands {
            install: Some("echo made > \"$ENVY_INSTALL_DIR/out\"".to_string()),
            ..Default::default()
        };
        let set = VerbSet::from_commands(&commands, BTreeMap::new());
        let ctx = ctx(&dir);
        (set.install.unwrap())(&ctx).unwrap();
        assert!(ctx.install_dir.join("out").exists());
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_a_verb_error() {
        let dir = TempDir::new().unwrap();
        let commands = VerbCommands {
            build: Some("exit 3".to_string()),
            ..Default::default()
        };
        let set = VerbSet::from_commands(&commands, BTreeMap::new());
        let err = (set.build.unwrap())(&ctx(&dir)).unwrap_err();
        assert!(matches!(err, EngineError::Verb { verb: "build", .. }));
    }

    #[cfg(unix)]
    #[test]
    fn check_verb_maps_exit_status() {
        let dir = TempDir::new().unwrap();
        let installed = VerbSet::from_commands(
            &VerbCommands {
                check: Some("true".to_string()),
                ..Default::default()
            },
            BTreeMap::new(),
        );
        assert!((installed.check.unwrap())(&ctx(&dir)).unwrap());

        let missing = VerbSet::from_commands(
            &VerbCommands {
                check: Some("false".to_string()),
                ..Default::default()
            },
            BTreeMap::new(),
        );
        assert!(!(missing.check.unwrap())(&ctx(&dir)).unwrap());
    }
}
