//! Low-level git subprocess invocation.
//!
//! All arguments are passed directly to `std::process::Command` — never
//! through a shell — so there is no shell-interpolation surface. Output is
//! captured up to a hard cap; exceeding it is an error rather than a silent
//! truncation.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::GitError;

/// Output buffer cap per invocation (50 MiB), per the adapter contract.
pub const OUTPUT_CAP_BYTES: usize = 50 * 1024 * 1024;

/// Result of a successful subprocess invocation.
pub struct Output {
    /// Captured stdout.
    pub stdout: Vec<u8>,
    /// Captured stderr (kept even on success, for diagnostics).
    pub stderr: Vec<u8>,
}

/// Run `git <args>` in `cwd`, with a fixed locale and gc/maintenance disabled
/// so output is stable and invocations never trigger background housekeeping.
///
/// `env_overrides` lets callers layer in `GIT_INDEX_FILE` for isolated-index
/// operations without disturbing the rest of the process environment.
pub fn run(cwd: &Path, args: &[&str], env_overrides: &[(&str, &str)]) -> Result<Output, GitError> {
    let mut cmd = Command::new("git");
    cmd.current_dir(cwd)
        .args(args)
        .env("LANG", "C.UTF-8")
        .env("LC_ALL", "C.UTF-8")
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_OPTIONAL_LOCKS", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env_overrides {
        cmd.env(key, value);
    }

    tracing::debug!(args = ?args, cwd = %cwd.display(), "spawning git");
    let child = cmd.spawn()?;
    let out = child.wait_with_output()?;

    if out.stdout.len() > OUTPUT_CAP_BYTES || out.stderr.len() > OUTPUT_CAP_BYTES {
        return Err(GitError::OutputTooLarge {
            args: args.iter().map(|s| (*s).to_string()).collect(),
            limit_bytes: OUTPUT_CAP_BYTES,
        });
    }

    if !out.status.success() {
        return Err(GitError::command_failed(
            args,
            out.status.code(),
            String::from_utf8_lossy(&out.stderr).into_owned(),
        ));
    }

    Ok(Output {
        stdout: out.stdout,
        stderr: out.stderr,
    })
}

/// Like [`run`] but returns the decoded, trimmed stdout as a `String`.
pub fn run_text(cwd: &Path, args: &[&str], env_overrides: &[(&str, &str)]) -> Result<String, GitError> {
    let out = run(cwd, args, env_overrides)?;
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}
