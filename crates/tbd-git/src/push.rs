//! Push-with-retry and stderr-based error classification.
//!
//! Grounded on the retry shape used elsewhere in the corpus for CLI-wrapped
//! VCS pushes: classify the failure from stderr text, hand transient
//! failures to the `backoff` crate, surface permanent failures immediately.

use std::path::Path;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;

use crate::error::{GitError, PushErrorKind};
use crate::process;

/// Maximum push attempts, per the adapter contract.
pub const MAX_ATTEMPTS: u32 = 3;

const CONFIG_ERROR_PATTERNS: &[&str] = &[
    "does not appear to be a git repository",
    "no such remote",
];

const PERMANENT_PATTERNS: &[&str] = &[
    "401",
    "403",
    "404",
    "permission denied",
    "authentication failed",
    "could not read username",
    "could not read password",
];

const TRANSIENT_PATTERNS: &[&str] = &[
    "500",
    "502",
    "503",
    "504",
    "429",
    "could not resolve host",
    "connection timed out",
    "connection reset",
    "connection refused",
    "timed out",
    "non-fast-forward",
    "fetch first",
    "curl 7",
    "curl 28",
    "curl 52",
    "curl 56",
];

/// Classify a failed push's stderr per the adapter contract.
///
/// Returns `None` for the configuration-error carve-out (not a git
/// repository / no such remote), which callers should surface verbatim
/// rather than wrap in a push classification.
#[must_use]
pub fn classify(stderr: &str) -> Option<PushErrorKind> {
    let lower = stderr.to_lowercase();
    if CONFIG_ERROR_PATTERNS.iter().any(|p| lower.contains(p)) {
        return None;
    }
    if PERMANENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(PushErrorKind::Permanent);
    }
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(PushErrorKind::Transient);
    }
    Some(PushErrorKind::Unknown)
}

/// Outcome of [`push_with_retry`].
pub enum PushOutcome<C> {
    /// The push succeeded after this many attempts.
    Pushed {
        /// Total attempts made, including the successful one.
        attempts: u32,
    },
    /// A non-fast-forward was resolved by the caller's merge callback, but
    /// the callback reported new conflicts; the push was abandoned.
    Aborted {
        /// The conflicts the merge callback produced.
        conflicts: Vec<C>,
    },
}

/// Push `local_ref` to `remote_ref` on `remote`, retrying up to
/// [`MAX_ATTEMPTS`] times.
///
/// On a non-fast-forward rejection, `resolve_non_fast_forward` is invoked;
/// returning `Ok(None)` means the caller re-merged cleanly and the push
/// should be retried, `Ok(Some(conflicts))` aborts the push with those
/// conflicts attached.
///
/// # Errors
/// Returns [`GitError::PushFailed`] classified permanent/unknown without
/// retrying further, or the raw [`GitError::CommandFailed`] for the
/// configuration-error carve-out (not a repository / no such remote).
pub fn push_with_retry<C>(
    cwd: &Path,
    remote: &str,
    local_ref: &str,
    remote_ref: &str,
    env_overrides: &[(&str, &str)],
    mut resolve_non_fast_forward: impl FnMut() -> Result<Option<Vec<C>>, GitError>,
) -> Result<PushOutcome<C>, GitError> {
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(std::time::Duration::from_millis(200))
        .with_max_elapsed_time(Some(std::time::Duration::from_secs(30)))
        .build();

    let refspec = format!("{local_ref}:{remote_ref}");
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let result = process::run(
            cwd,
            &[
                "-c",
                "core.hooksPath=/dev/null",
                "push",
                remote,
                &refspec,
            ],
            env_overrides,
        );

        match result {
            Ok(_) => return Ok(PushOutcome::Pushed { attempts }),
            Err(GitError::CommandFailed { stderr, .. }) => {
                let Some(kind) = classify(&stderr) else {
                    return Err(GitError::CommandFailed {
                        args: vec!["push".to_string(), remote.to_string(), refspec],
                        exit_code: None,
                        stderr,
                    });
                };

                match kind {
                    PushErrorKind::Permanent => {
                        return Err(GitError::PushFailed {
                            remote: remote.to_string(),
                            kind,
                            message: stderr,
                        });
                    }
                    PushErrorKind::Transient | PushErrorKind::Unknown => {
                        if stderr.to_lowercase().contains("non-fast-forward")
                            || stderr.to_lowercase().contains("fetch first")
                        {
                            match resolve_non_fast_forward()? {
                                None => {
                                    if attempts >= MAX_ATTEMPTS {
                                        return Err(GitError::PushFailed {
                                            remote: remote.to_string(),
                                            kind,
                                            message: stderr,
                                        });
                                    }
                                    continue;
                                }
                                Some(conflicts) => return Ok(PushOutcome::Aborted { conflicts }),
                            }
                        }

                        if attempts >= MAX_ATTEMPTS {
                            return Err(GitError::PushFailed {
                                remote: remote.to_string(),
                                kind,
                                message: stderr,
                            });
                        }
                        if let Some(delay) = backoff.next_backoff() {
                            std::thread::sleep(delay);
                        }
                    }
                }
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_permanent_http_status() {
        assert_eq!(classify("remote: HTTP 403 Forbidden"), Some(PushErrorKind::Permanent));
        assert_eq!(classify("fatal: Authentication failed"), Some(PushErrorKind::Permanent));
    }

    #[test]
    fn classifies_transient_network_errors() {
        assert_eq!(classify("Could not resolve host: github.com"), Some(PushErrorKind::Transient));
        assert_eq!(
            classify("! [rejected] main -> main (non-fast-forward)"),
            Some(PushErrorKind::Transient)
        );
    }

    #[test]
    fn config_errors_bypass_classification() {
        assert_eq!(classify("fatal: 'origin' does not appear to be a git repository"), None);
        assert_eq!(classify("fatal: No such remote 'origin'"), None);
    }

    #[test]
    fn unrecognized_messages_are_unknown() {
        assert_eq!(classify("fatal: something odd happened"), Some(PushErrorKind::Unknown));
    }
}
