//! Error types for the subprocess git adapter.
//!
//! [`GitError`] is the single error type returned by all [`GitRepo`](crate::GitRepo)
//! methods. Push failures carry their own sub-variant so callers can match on
//! permanent/transient/unknown without re-parsing stderr.

use std::path::PathBuf;

use thiserror::Error;

/// Classification of a failed push, per the host's stderr/exit behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushErrorKind {
    /// Authentication/authorization/not-found — retrying will not help.
    Permanent,
    /// Network blip, rate limit, or a non-fast-forward that a re-merge can fix.
    Transient,
    /// Did not match any known pattern; treated as transient for safety.
    Unknown,
}

/// Errors returned by [`GitRepo`](crate::GitRepo) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A requested ref, object, or branch was not found.
    #[error("not found: {message}")]
    NotFound {
        /// What was missing.
        message: String,
    },

    /// The installed git binary is older than the minimum supported version.
    #[error("git {found} is older than the required {required}")]
    VersionTooOld {
        /// The version string git reported.
        found: String,
        /// The minimum version string required.
        required: String,
        /// Upgrade guidance keyed by the detected OS family.
        upgrade_hint: String,
    },

    /// A git subprocess exited non-zero.
    #[error("git {args:?} failed (exit {exit_code:?}): {stderr}")]
    CommandFailed {
        /// Arguments passed to `git` (the command name is implied).
        args: Vec<String>,
        /// Process exit code, if the process terminated normally.
        exit_code: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },

    /// A subprocess produced more than the 50 MiB output cap.
    #[error("git {args:?} produced more than {limit_bytes} bytes of output")]
    OutputTooLarge {
        /// Arguments passed to `git`.
        args: Vec<String>,
        /// The configured cap.
        limit_bytes: usize,
    },

    /// A push failed; `kind` records the permanent/transient/unknown classification.
    #[error("push to `{remote}` {kind:?}: {message}")]
    PushFailed {
        /// The remote name.
        remote: String,
        /// Classification used by the sync orchestrator to decide next action.
        kind: PushErrorKind,
        /// Raw stderr/message from the failed attempt.
        message: String,
    },

    /// The isolated index path could not be set up or restored.
    #[error("isolated index error at {}: {message}", path.display())]
    IndexGuard {
        /// The alternate index file path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The on-disk checkout is not a valid git worktree.
    #[error("corrupted worktree at {}: {message}", path.display())]
    CorruptedWorktree {
        /// Worktree root.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    /// An I/O error occurred spawning or communicating with a subprocess.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Build a [`GitError::CommandFailed`] from a finished subprocess.
    #[must_use]
    pub fn command_failed(args: &[&str], exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            args: args.iter().map(|s| (*s).to_string()).collect(),
            exit_code,
            stderr: stderr.into(),
        }
    }
}
