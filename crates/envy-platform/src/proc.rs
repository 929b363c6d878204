//! Process and environment primitives.

use crate::{PlatformError, Result};
use camino::{Utf8Path, Utf8PathBuf};

/// Host platform name as used in cache entry names.
pub fn os_name() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "darwin"
    }
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(windows)]
    {
        "windows"
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", windows)))]
    {
        "unknown"
    }
}

/// Host architecture name as used in cache entry names. Darwin reports
/// `arm64` where other platforms report `aarch64`.
pub fn arch_name() -> &'static str {
    #[cfg(all(target_arch = "aarch64", target_os = "macos"))]
    {
        "arm64"
    }
    #[cfg(all(target_arch = "aarch64", not(target_os = "macos")))]
    {
        "aarch64"
    }
    #[cfg(target_arch = "x86_64")]
    {
        "x86_64"
    }
    #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
    {
        "unknown"
    }
}

/// Resolved path of the running binary.
pub fn current_exe() -> Result<Utf8PathBuf> {
    let exe = std::env::current_exe()?;
    let exe = exe.canonicalize()?;
    Utf8PathBuf::from_path_buf(exe)
        .map_err(|p| PlatformError::Expansion(p.display().to_string()))
}

/// Set a process environment variable.
pub fn set_env_var(name: &str, value: &str) {
    // Safety contract is the caller's: mutation happens before worker threads
    // read the environment.
    std::env::set_var(name, value);
}

/// Snapshot of the process environment as `NAME=value` pairs.
pub fn get_environment() -> Vec<(String, String)> {
    std::env::vars().collect()
}

/// Replace the current process image with `binary`, or on Windows spawn it,
/// wait, and exit with its status. Returns only on error.
#[cfg(unix)]
pub fn exec_process(
    binary: &Utf8Path,
    args: &[String],
    env: Vec<(String, String)>,
) -> Result<std::convert::Infallible> {
    use std::os::unix::process::CommandExt;

    let err = std::process::Command::new(binary.as_std_path())
        .args(args)
        .env_clear()
        .envs(env)
        .exec();
    Err(PlatformError::Exec {
        binary: binary.to_string(),
        source: err,
    })
}

#[cfg(windows)]
pub fn exec_process(
    binary: &Utf8Path,
    args: &[String],
    env: Vec<(String, String)>,
) -> Result<std::convert::Infallible> {
    let status = std::process::Command::new(binary.as_std_path())
        .args(args)
        .env_clear()
        .envs(env)
        .status()
        .map_err(|source| PlatformError::Exec {
            binary: binary.to_string(),
            source,
        })?;
    std::process::exit(status.code().unwrap_or(1));
}
