//! The unified error type for `tbd` core operations.
//!
//! Mirrors the error kind table in spec.md §7: one variant per kind, each
//! `Display`-ed with enough context — and, where the caller can act on it, a
//! concrete next step — that an agent or a human reading the message alone
//! can recover without consulting source.

use std::fmt;
use std::path::PathBuf;

use tbd_git::GitError;

use crate::id_mapping::IdMappingError;
use crate::model::types::ValidationError;

/// Unified error type for `tbd` core operations.
#[derive(Debug)]
pub enum TbdError {
    /// Malformed front-matter, missing delimiter, or schema failure (§4.1).
    Parse {
        /// The file that failed to parse, if known.
        path: Option<PathBuf>,
        /// What went wrong.
        detail: String,
    },

    /// A requested issue, mapping entry, or remote branch does not exist.
    NotFound {
        /// The id or name that was not found.
        what: String,
    },

    /// The host git binary is older than the minimum supported version.
    HostVersion {
        /// Version string git reported.
        found: String,
        /// Minimum required version string.
        required: String,
        /// OS-specific upgrade guidance.
        upgrade_hint: String,
    },

    /// The sync worktree's health classification requires repair or reports
    /// one (§4.6): `missing`, `prunable`, or `corrupted`.
    WorktreeUnhealthy {
        /// Which unhealthy state was observed.
        state: String,
        /// Path to the worktree.
        path: PathBuf,
    },

    /// A push was rejected for an unrecoverable reason (401/403/404,
    /// permission denied). The orchestrator has already attempted an
    /// outbox save by the time this reaches the caller.
    PushPermanent {
        /// The remote that rejected the push.
        remote: String,
        /// Raw message from git.
        message: String,
        /// Name of the outbox workspace the sync orchestrator saved to, if any.
        outbox_saved: Option<String>,
    },

    /// A push failed for a reason expected to resolve itself (network,
    /// rate limit, or non-fast-forward exhausted its retries).
    PushTransient {
        /// The remote that rejected the push.
        remote: String,
        /// Raw message from git.
        message: String,
    },

    /// A push failed for a reason the adapter could not classify; treated
    /// as transient for safety, but the raw message is always preserved.
    PushUnknown {
        /// The remote that rejected the push.
        remote: String,
        /// Raw message from git.
        message: String,
    },

    /// `resolveToInternalId` was given an input with no mapping entry (§4.3).
    IdUnknown {
        /// The unresolved input as given by the caller.
        input: String,
    },

    /// Short-id allocation exhausted both the optimal and fallback lengths (§4.3).
    MappingCollision {
        /// Count of ids already present in the mapping at failure time.
        existing_count: usize,
    },

    /// The configuration document could not be loaded, parsed, or migrated.
    Config {
        /// Path to the configuration file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// The underlying git adapter reported an error outside the
    /// push-classification path (worktree, ref, or object operations).
    Git(GitError),

    /// An I/O error occurred outside a specific-file parse/storage operation.
    Io(std::io::Error),
}

impl fmt::Display for TbdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { path, detail } => {
                if let Some(path) = path {
                    write!(f, "failed to parse {}: {detail}", path.display())
                } else {
                    write!(f, "failed to parse issue: {detail}")
                }
            }
            Self::NotFound { what } => {
                write!(f, "not found: {what}")
            }
            Self::HostVersion {
                found,
                required,
                upgrade_hint,
            } => {
                write!(
                    f,
                    "git {found} is older than the required {required}.\n  To fix: {upgrade_hint}"
                )
            }
            Self::WorktreeUnhealthy { state, path } => {
                write!(
                    f,
                    "sync worktree at {} is {state}.\n  To fix: run the worktree repair operation, or let the next sync repair it automatically.",
                    path.display()
                )
            }
            Self::PushPermanent {
                remote,
                message,
                outbox_saved,
            } => {
                write!(f, "push to `{remote}` was rejected permanently: {message}")?;
                match outbox_saved {
                    Some(name) => write!(
                        f,
                        "\n  Local changes were saved to the `{name}` workspace; import them once the remote is reachable again."
                    ),
                    None => write!(f, "\n  To fix: check remote permissions/branch protection, then retry."),
                }
            }
            Self::PushTransient { remote, message } => {
                write!(
                    f,
                    "push to `{remote}` failed transiently: {message}\n  To fix: retry; no local state was changed."
                )
            }
            Self::PushUnknown { remote, message } => {
                write!(
                    f,
                    "push to `{remote}` failed with an unrecognized error: {message}\n  Treated as transient; retry, and report this message if it recurs."
                )
            }
            Self::IdUnknown { input } => {
                write!(f, "no mapping entry for id `{input}`")
            }
            Self::MappingCollision { existing_count } => {
                write!(
                    f,
                    "short-id allocation exhausted both lengths ({existing_count} ids already mapped)"
                )
            }
            Self::Config { path, detail } => {
                write!(
                    f,
                    "configuration error in {}: {detail}\n  To fix: edit the config file and correct the issue.",
                    path.display()
                )
            }
            Self::Git(err) => write!(f, "git error: {err}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for TbdError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Git(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TbdError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<GitError> for TbdError {
    fn from(err: GitError) -> Self {
        Self::Git(err)
    }
}

impl From<ValidationError> for TbdError {
    fn from(err: ValidationError) -> Self {
        Self::Parse {
            path: None,
            detail: err.to_string(),
        }
    }
}

impl From<IdMappingError> for TbdError {
    fn from(err: IdMappingError) -> Self {
        match err {
            IdMappingError::Unknown { input } => Self::IdUnknown { input },
            IdMappingError::AllocationExhausted { existing_count } => {
                Self::MappingCollision { existing_count }
            }
        }
    }
}
