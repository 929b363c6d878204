//! Command-line surface: argument parsing, logging setup, signal handling,
//! and dispatch into command implementations.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "envy", version, about = "Freeform content-addressed package manager")]
pub struct Cli {
    /// Cache root override (beats manifest metadata and platform default).
    #[arg(long, global = true)]
    pub cache_root: Option<Utf8PathBuf>,

    /// Verbose logging with per-phase traces.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve the manifest and bring every package up to date.
    Sync {
        /// Manifest path; discovered by walking up from the current
        /// directory when omitted.
        #[arg(long)]
        manifest: Option<Utf8PathBuf>,
    },
    /// Transfer a single source URI to a destination path.
    Fetch {
        source: String,
        destination: Utf8PathBuf,
    },
    /// Extract an archive into a directory.
    Extract {
        archive: Utf8PathBuf,
        destination: Utf8PathBuf,
    },
    /// Print SHA-256 and BLAKE3 digests of a file.
    Hash { file: Utf8PathBuf },
    /// Export a published cache entry as a tar.zst archive.
    Export {
        /// Entry directory name under packages/.
        entry: String,
        dest_dir: Utf8PathBuf,
    },
    /// Import prebuilt tar.zst archives into the cache.
    Import { archives: Vec<Utf8PathBuf> },
    /// Sync, then run a command with package bin directories on PATH.
    Run {
        /// Manifest path; discovered when omitted.
        #[arg(long)]
        manifest: Option<Utf8PathBuf>,
        /// Command and arguments.
        #[arg(trailing_var_arg = true, required = true)]
        argv: Vec<String>,
    },
    /// Write shell integration hooks and deploy the running binary into
    /// the cache.
    DeployHooks,
    /// Print the envy version.
    Version,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "envy=debug,info" } else { "envy=info,warn" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(verbose)
        .with_writer(std::io::stderr);
    let _ = builder.compact().try_init();
}

fn install_signal_handler() {
    // Killed runs skip engine teardown on purpose; the cache publish
    // protocol tolerates dying mid-entry. 130 = 128 + SIGINT.
    let _ = ctrlc::set_handler(|| {
        std::process::exit(128 + 2);
    });
}

/// Parse arguments, run the selected command, and map errors to exit codes.
pub fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap renders its own help/version output.
            let _ = e.print();
            return if e.use_stderr() { EXIT_USAGE } else { EXIT_OK };
        }
    };

    init_logging(cli.verbose);
    install_signal_handler();

    let outcome = match &cli.command {
        Command::Sync { manifest } => commands::sync::run(&cli, manifest.as_deref()),
        Command::Fetch {
            source,
            destination,
        } => commands::fetch::run(source, destination),
        Command::Extract {
            archive,
            destination,
        } => commands::extract::run(archive, destination),
        Command::Hash { file } => commands::hash::run(file),
        Command::Export { entry, dest_dir } => commands::export::run(&cli, entry, dest_dir),
        Command::Import { archives } => commands::import::run(&cli, archives),
        // On success `run` never returns: the process image is replaced (or,
        // on Windows, exits with the child's status).
        Command::Run { manifest, argv } => commands::run::run(&cli, manifest.as_deref(), argv),
        Command::DeployHooks => commands::deploy_hooks::run(&cli),
        Command::Version => {
            println!("envy {}", crate::envy_version());
            Ok(())
        }
    };

    match outcome {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_sync() {
        let cli = Cli::try_parse_from(["envy", "sync"]).unwrap();
        assert!(matches!(cli.command, Command::Sync { manifest: None }));
        assert!(!cli.verbose);
    }

    #[test]
    fn cli_parses_global_flags_anywhere() {
        let cli = Cli::try_parse_from([
            "envy",
            "sync",
            "--cache-root",
            "/tmp/cache",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(cli.cache_root.as_deref().unwrap(), "/tmp/cache");
        assert!(cli.verbose);
    }

    #[test]
    fn cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["envy", "frobnicate"]).is_err());
    }

    #[test]
    fn cli_parses_fetch_and_export() {
        let cli = Cli::try_parse_from(["envy", "fetch", "https://x/y.tar.gz", "/tmp/out"]).unwrap();
        assert!(matches!(cli.command, Command::Fetch { .. }));

        let cli = Cli::try_parse_from([
            "envy",
            "export",
            "a.b@v1-linux-x86_64-blake3-0011",
            "/tmp/exports",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Export { .. }));
    }
}
