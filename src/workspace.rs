//! Workspace save/import/list/delete (§4.8).
//!
//! A workspace is a directory with the same internal layout as the
//! worktree's replicated data directory (`issues/`, `mappings/ids.yml`,
//! `attic/`). Kept free of any git-adapter dependency: callers that need
//! `updates_only` filtering supply the already-fetched remote issue set.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::TbdError;
use crate::id_mapping::IdMapping;
use crate::merge::merge_for_workspace;
use crate::model::types::Status;
use crate::model::Issue;
use crate::parser::serialize_for_hash;
use crate::{attic, storage};

/// Reserved workspace name used as the automatic push-failure fallback.
pub const OUTBOX_NAME: &str = "outbox";

/// Outcome of [`save`] or [`import`].
#[derive(Debug, Clone, Default)]
pub struct TransferOutcome {
    /// Internal ids (ULID portion) written to the destination.
    pub transferred: Vec<String>,
    /// Count of field-level conflicts appended to the destination's attic.
    pub conflicts: usize,
}

/// Status-bucketed counts returned by [`list_with_counts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkspaceCounts {
    /// Issues with `status = open`.
    pub open: usize,
    /// Issues with `status = in_progress`.
    pub in_progress: usize,
    /// Issues with `status = closed`.
    pub closed: usize,
    /// Total issue count, all statuses.
    pub total: usize,
}

fn issues_dir(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join("issues")
}

fn mappings_path(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join("mappings").join("ids.yml")
}

fn attic_dir(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join("attic")
}

/// Merge every issue in `candidates` into `target_dir`, appending conflicts
/// to its attic. Shared by [`save`] and [`import`] — the two operations
/// differ only in which issues count as `candidates` and how mappings are
/// combined afterward.
fn merge_into(target_dir: &Path, candidates: &[Issue], now: DateTime<Utc>) -> Result<TransferOutcome, TbdError> {
    let target_issues_dir = issues_dir(target_dir);
    let target_attic_dir = attic_dir(target_dir);
    let mut outcome = TransferOutcome::default();

    for issue in candidates {
        let merged = match storage::read(&target_issues_dir, &issue.id) {
            Ok(existing) => {
                let result = merge_for_workspace(issue, &existing, now);
                for conflict in &result.conflicts {
                    attic::append(&target_attic_dir, conflict)?;
                    outcome.conflicts += 1;
                }
                result.merged
            }
            Err(TbdError::NotFound { .. }) => issue.clone(),
            Err(e) => return Err(e),
        };
        storage::write(&target_issues_dir, &merged)?;
        outcome.transferred.push(merged.ulid_part().to_string());
    }
    Ok(outcome)
}

/// Save issues from `source_dir` (the worktree's data directory) into the
/// workspace at `target_dir`.
///
/// When `updates_only` is set, restricts to issues that are new or
/// byte-different from `remote_issues`; `remote_issues = None` means the
/// caller's fetch failed, in which case every source issue is saved (§4.8
/// fallback). Only mapping entries whose ULID was actually saved are
/// copied into the target's mapping document.
///
/// # Errors
/// Any I/O or git-independent storage failure during the transfer.
pub fn save(
    source_dir: &Path,
    target_dir: &Path,
    updates_only: bool,
    remote_issues: Option<&[Issue]>,
    now: DateTime<Utc>,
) -> Result<TransferOutcome, TbdError> {
    let source_issues = storage::list(&issues_dir(source_dir))?;

    let candidates = if updates_only {
        match remote_issues {
            Some(remote) => {
                let by_id: std::collections::HashMap<&str, &Issue> = remote.iter().map(|i| (i.id.as_str(), i)).collect();
                source_issues
                    .into_iter()
                    .filter(|issue| {
                        by_id
                            .get(issue.id.as_str())
                            .is_none_or(|r| serialize_for_hash(issue) != serialize_for_hash(r))
                    })
                    .collect()
            }
            None => source_issues,
        }
    } else {
        source_issues
    };

    let outcome = merge_into(target_dir, &candidates, now)?;

    let source_mapping = IdMapping::load(&mappings_path(source_dir))?;
    let saved_ulids: HashSet<String> = outcome.transferred.iter().cloned().collect();
    let mut target_mapping = IdMapping::load(&mappings_path(target_dir))?;
    target_mapping.merge(&source_mapping.subset(&saved_ulids));
    target_mapping.save(&mappings_path(target_dir))?;

    Ok(outcome)
}

/// Import issues from `source_dir` (a workspace) into `target_dir` (the
/// worktree's data directory) — the inverse of [`save`].
///
/// Mappings are unioned in full (not filtered, since every source issue is
/// a candidate).
///
/// # Errors
/// Any I/O or storage failure during the transfer.
pub fn import(source_dir: &Path, target_dir: &Path, clear_on_success: bool, now: DateTime<Utc>) -> Result<TransferOutcome, TbdError> {
    let source_issues = storage::list(&issues_dir(source_dir))?;
    let outcome = merge_into(target_dir, &source_issues, now)?;

    let source_mapping = IdMapping::load(&mappings_path(source_dir))?;
    let mut target_mapping = IdMapping::load(&mappings_path(target_dir))?;
    target_mapping.merge(&source_mapping);
    target_mapping.save(&mappings_path(target_dir))?;

    if clear_on_success {
        delete_dir(source_dir)?;
    }
    Ok(outcome)
}

fn delete_dir(dir: &Path) -> Result<(), TbdError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// List workspace names under `workspaces_root`.
///
/// # Errors
/// Any I/O error other than the root being absent (absent returns empty).
pub fn list(workspaces_root: &Path) -> Result<Vec<String>, TbdError> {
    let dir = match fs::read_dir(workspaces_root) {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in dir {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && let Some(name) = entry.file_name().to_str()
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Status-bucketed issue counts for the workspace at `workspace_dir`.
///
/// # Errors
/// Any I/O error listing issues.
pub fn list_with_counts(workspace_dir: &Path) -> Result<WorkspaceCounts, TbdError> {
    let issues = storage::list(&issues_dir(workspace_dir))?;
    let mut counts = WorkspaceCounts {
        total: issues.len(),
        ..WorkspaceCounts::default()
    };
    for issue in &issues {
        match issue.status {
            Status::Open => counts.open += 1,
            Status::InProgress => counts.in_progress += 1,
            Status::Closed => counts.closed += 1,
            Status::Blocked | Status::Deferred => {}
        }
    }
    Ok(counts)
}

/// Whether a workspace directory exists.
#[must_use]
pub fn exists(workspaces_root: &Path, name: &str) -> bool {
    workspaces_root.join(name).is_dir()
}

/// Delete a workspace by name. Idempotent.
///
/// # Errors
/// Any I/O error other than the workspace being absent.
pub fn delete(workspaces_root: &Path, name: &str) -> Result<(), TbdError> {
    delete_dir(&workspaces_root.join(name))
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::IssueKind;

    #[test]
    fn save_then_import_round_trips_an_issue() {
        let worktree = tempfile::tempdir().unwrap();
        let workspaces = tempfile::tempdir().unwrap();
        let outbox = workspaces.path().join(OUTBOX_NAME);

        let issue = Issue::new("proj", "alice", "First", IssueKind::Task);
        storage::write(&issues_dir(worktree.path()), &issue).unwrap();

        let now = Utc::now();
        let saved = save(worktree.path(), &outbox, true, None, now).unwrap();
        assert_eq!(saved.transferred, vec![issue.ulid_part().to_string()]);
        assert!(exists(workspaces.path(), OUTBOX_NAME));

        let fresh_worktree = tempfile::tempdir().unwrap();
        let imported = import(&outbox, fresh_worktree.path(), true, now).unwrap();
        assert_eq!(imported.transferred, vec![issue.ulid_part().to_string()]);
        assert!(!outbox.is_dir());

        let recovered = storage::read(&issues_dir(fresh_worktree.path()), &issue.id).unwrap();
        assert_eq!(recovered.title, "First");
    }

    #[test]
    fn updates_only_skips_issues_identical_to_remote() {
        let worktree = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();

        let issue = Issue::new("proj", "alice", "First", IssueKind::Task);
        storage::write(&issues_dir(worktree.path()), &issue).unwrap();

        let outcome = save(worktree.path(), target.path(), true, Some(&[issue.clone()]), Utc::now()).unwrap();
        assert!(outcome.transferred.is_empty());
    }

    #[test]
    fn list_with_counts_buckets_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut open = Issue::new("proj", "alice", "A", IssueKind::Task);
        let mut closed = Issue::new("proj", "alice", "B", IssueKind::Task);
        closed.status = Status::Closed;
        closed.closed_at = Some(Utc::now());
        storage::write(&issues_dir(dir.path()), &open).unwrap();
        storage::write(&issues_dir(dir.path()), &closed).unwrap();
        open.status = Status::Open;

        let counts = list_with_counts(dir.path()).unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.open, 1);
        assert_eq!(counts.closed, 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        delete(dir.path(), "does-not-exist").unwrap();
        delete(dir.path(), "does-not-exist").unwrap();
    }
}
