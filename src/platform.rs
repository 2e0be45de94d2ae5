//! Platform paths and external tool discovery.
//!
//! Optional package-manager CLIs (e.g. `mvn`) give higher-fidelity results
//! when present. Their absence is never an error: callers fall back to
//! parsing files directly.

use anyhow::{bail, Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Returns the cache directory for depscan.
///
/// Platform-specific locations:
/// - Linux: `~/.cache/depscan/`
/// - macOS: `~/Library/Caches/depscan/`
/// - Windows: `%LOCALAPPDATA%\depscan\`
///
/// Falls back to `/tmp/depscan/` if no cache directory can be determined.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("depscan")
}

/// Returns the directory holding `config.toml`.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("depscan")
}

/// Looks up an executable on `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    let candidates: Vec<String> = if cfg!(target_os = "windows") {
        vec![
            format!("{}.exe", name),
            format!("{}.cmd", name),
            name.to_string(),
        ]
    } else {
        vec![name.to_string()]
    };

    std::env::split_paths(&path_var).find_map(|dir| {
        candidates
            .iter()
            .map(|c| dir.join(c))
            .find(|p| p.is_file())
    })
}

pub fn tool_available(name: &str) -> bool {
    find_executable(name).is_some()
}

/// Runs an external tool in `cwd`, killing it if it exceeds `timeout`.
///
/// Returns the captured output even when the exit status is non-zero;
/// callers decide whether a failing status is usable.
pub async fn run_tool<I, S>(program: &str, args: I, cwd: &Path, timeout: Duration) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(output) => output.with_context(|| format!("Failed to execute {}", program)),
        Err(_) => bail!("{} did not finish within {}s", program, timeout.as_secs()),
    }
}
