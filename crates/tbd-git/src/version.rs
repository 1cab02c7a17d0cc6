//! Minimum host git version check.
//!
//! Orphan-worktree creation (`git worktree add --orphan`, used by the
//! worktree manager's from-scratch init path) requires git 2.42+.

use std::path::Path;

use crate::error::GitError;
use crate::process;

/// Minimum supported git version.
pub const REQUIRED: (u32, u32) = (2, 42);

/// Parse the numeric `(major, minor)` out of `git --version` output, e.g.
/// `"git version 2.43.0"` -> `(2, 43)`.
#[must_use]
pub fn parse_version(raw: &str) -> Option<(u32, u32)> {
    let digits = raw.split_whitespace().last()?;
    let mut parts = digits.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn upgrade_hint() -> String {
    if cfg!(target_os = "macos") {
        "upgrade with: brew install git".to_string()
    } else if cfg!(target_os = "windows") {
        "upgrade with: winget upgrade Git.Git".to_string()
    } else {
        "upgrade with your distribution's package manager, e.g.: apt install git".to_string()
    }
}

/// Check that the host's `git` binary is at least [`REQUIRED`].
///
/// # Errors
/// Returns [`GitError::VersionTooOld`] if the detected version is older, or
/// any I/O error from invoking `git --version`.
pub fn check(cwd: &Path) -> Result<(), GitError> {
    let raw = process::run_text(cwd, &["--version"], &[])?;
    let found = parse_version(&raw).ok_or_else(|| GitError::NotFound {
        message: format!("could not parse git version from {raw:?}"),
    })?;
    if found < REQUIRED {
        return Err(GitError::VersionTooOld {
            found: format!("{}.{}", found.0, found.1),
            required: format!("{}.{}", REQUIRED.0, REQUIRED.1),
            upgrade_hint: upgrade_hint(),
        });
    }
    Ok(())
}
