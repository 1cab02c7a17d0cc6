//! Sync orchestrator (§4.7): fetch, three-way merge, commit, push-with-retry,
//! outbox fallback, local state update.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tbd_git::{CliGitRepo, GitError, GitRepo, PushErrorKind};

use crate::config::Config;
use crate::error::TbdError;
use crate::id_mapping::IdMapping;
use crate::model::Issue;
use crate::state::LocalState;
use crate::worktree::Worktree;
use crate::{attic, merge, parser, storage, workspace};

/// Summary returned to the caller on a completed sync attempt.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Total push attempts made.
    pub attempts: u32,
    /// Whether the push ultimately succeeded.
    pub pushed: bool,
    /// Number of issues touched by the final merge round.
    pub merged_count: usize,
    /// Number of field-level conflicts appended to the attic.
    pub conflict_count: usize,
    /// Name of the outbox workspace saved to, if the push failed permanently.
    pub outbox_saved: Option<String>,
}

struct MergeRound {
    merged_ids: Vec<String>,
    conflict_count: usize,
    remote_issues: Vec<Issue>,
}

fn remote_issues_rel(wt: &Worktree) -> PathBuf {
    wt.data_dir()
        .strip_prefix(wt.path())
        .unwrap_or(&wt.data_dir())
        .join("issues")
}

fn mappings_rel(wt: &Worktree) -> PathBuf {
    wt.data_dir()
        .strip_prefix(wt.path())
        .unwrap_or(&wt.data_dir())
        .join("mappings")
        .join("ids.yml")
}

fn to_git_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn read_remote_issues(repo: &dyn GitRepo, rev: &str, issues_rel: &Path) -> Result<Vec<Issue>, TbdError> {
    let dir = to_git_path(issues_rel);
    let mut issues = Vec::new();
    for file in repo.list_files_at(rev, &dir)? {
        if !Path::new(&file).extension().is_some_and(|ext| ext.eq_ignore_ascii_case("md")) {
            continue;
        }
        if let Some(bytes) = repo.read_file_at(rev, &file)? {
            let raw = String::from_utf8_lossy(&bytes).to_string();
            match parser::parse(&raw) {
                Ok(issue) => issues.push(issue),
                Err(e) => tracing::warn!(path = %file, error = %e, "skipping unparseable remote issue"),
            }
        }
    }
    Ok(issues)
}

fn read_remote_issue(repo: &dyn GitRepo, rev: &str, issues_rel: &Path, id: &str) -> Result<Option<Issue>, TbdError> {
    let path = issues_rel.join(format!("{id}.md"));
    let path_str = to_git_path(&path);
    match repo.read_file_at(rev, &path_str)? {
        Some(bytes) => {
            let raw = String::from_utf8_lossy(&bytes).to_string();
            let issue = parser::parse(&raw).map_err(|e| TbdError::Parse {
                path: Some(path),
                detail: e.to_string(),
            })?;
            Ok(Some(issue))
        }
        None => Ok(None),
    }
}

/// Run one fetch/merge/commit round (§4.7 steps 3-7), returning the set of
/// post-merge ids and conflict count so the caller can build a commit
/// message and drive push retry.
fn merge_round(repo: &dyn GitRepo, wt: &Worktree, remote: &str, branch: &str, now: DateTime<Utc>) -> Result<MergeRound, TbdError> {
    if let Err(e) = repo.fetch(remote, branch) {
        tracing::warn!(error = %e, "fetch failed; syncing against local ref only");
    }

    let local_rev = repo.rev_parse_opt(&format!("refs/heads/{branch}"))?;
    let remote_rev = repo.rev_parse_opt(&format!("refs/remotes/{remote}/{branch}"))?;
    let issues_rel = remote_issues_rel(wt);

    // Re-parent the local branch onto the fetched remote tip before building
    // the merge commit: the per-field merge below already folds the remote
    // content in, so the new commit must descend from it to stay
    // fast-forwardable on push (§4.7 non-fast-forward retry).
    if let Some(rev) = remote_rev.as_ref().filter(|rev| local_rev.as_deref() != Some(rev.as_str())) {
        repo.set_branch_ref(branch, rev)?;
    }

    let local_issues = storage::list(&wt.issues_dir())?;
    let remote_issues = match &remote_rev {
        Some(rev) => read_remote_issues(repo, rev, &issues_rel)?,
        None => Vec::new(),
    };

    let base_rev = match (&local_rev, &remote_rev) {
        (Some(l), Some(r)) => repo.merge_base(l, r)?,
        _ => None,
    };

    let mut by_id: BTreeMap<String, (Option<Issue>, Option<Issue>)> = BTreeMap::new();
    for issue in local_issues {
        let id = issue.id.clone();
        by_id.entry(id).or_default().0 = Some(issue);
    }
    for issue in &remote_issues {
        by_id.entry(issue.id.clone()).or_default().1 = Some(issue.clone());
    }

    let mut merged_ids = Vec::new();
    let mut conflict_count = 0;

    for (id, (local_opt, remote_opt)) in by_id {
        let merged = match (local_opt, remote_opt) {
            (Some(local), Some(remote)) => {
                let base = match &base_rev {
                    Some(rev) => read_remote_issue(repo, rev, &issues_rel, &id)?,
                    None => None,
                };
                let outcome = merge::merge_issues(base.as_ref(), &local, &remote, now);
                for conflict in &outcome.conflicts {
                    attic::append(&wt.attic_conflicts_dir(), conflict)?;
                    conflict_count += 1;
                }
                outcome.merged
            }
            (Some(local), None) => local,
            (None, Some(remote)) => remote,
            (None, None) => unreachable!("by_id key always has at least one side populated"),
        };
        storage::write(&wt.issues_dir(), &merged)?;
        merged_ids.push(merged.ulid_part().to_string());
    }

    let mapping_path = wt.mappings_path();
    let history = IdMapping::load(&mapping_path)?;
    let mut mapping = history.clone();
    mapping.reconcile(&merged_ids, &history);
    mapping.save(&mapping_path)?;

    Ok(MergeRound {
        merged_ids,
        conflict_count,
        remote_issues,
    })
}

fn commit_round(repo: &dyn GitRepo, wt: &Worktree, branch: &str, round: &MergeRound) -> Result<Option<String>, TbdError> {
    let issues_rel = remote_issues_rel(wt);
    let mut paths: Vec<PathBuf> = round.merged_ids.iter().map(|id| issues_rel.join(format!("{id}.md"))).collect();
    paths.push(mappings_rel(wt));

    let message = format!("sync: merge {} issue(s)", round.merged_ids.len());
    Ok(repo.commit_paths(&wt.path(), branch, &paths, &message)?)
}


/// Run a full sync: worktree health, fetch/merge/commit, push with retry,
/// outbox fallback on a permanent push failure, local state update (§4.7).
///
/// # Errors
/// [`TbdError::HostVersion`] if git is too old; [`TbdError::PushTransient`]/
/// [`TbdError::PushUnknown`] if the push could not be completed after
/// retries; [`TbdError::PushPermanent`] if the remote rejected the push for
/// an unrecoverable reason (an outbox save is attempted first).
pub fn sync(repo: &CliGitRepo, host_root: &Path, config: &Config, now: DateTime<Utc>) -> Result<SyncReport, TbdError> {
    repo.check_version()?;

    let wt = Worktree::new(repo, host_root, &config.sync.remote, &config.sync.branch);
    wt.ensure_valid()?;
    wt.ensure_attached()?;
    wt.migrate_data_location(false)?;

    let remote = config.sync.remote.clone();
    let branch = config.sync.branch.clone();

    let mut round = merge_round(repo, &wt, &remote, &branch, now)?;
    commit_round(repo, &wt, &branch, &round)?;

    let mut report = SyncReport {
        merged_count: round.merged_ids.len(),
        conflict_count: round.conflict_count,
        ..SyncReport::default()
    };

    let local_ref = format!("refs/heads/{branch}");
    let push_result = repo.push_with_retry(&remote, &local_ref, &local_ref, || -> Result<Option<Vec<()>>, GitError> {
        round = merge_round(repo, &wt, &remote, &branch, now).map_err(|e| match e {
            TbdError::Git(git_err) => git_err,
            other => GitError::NotFound {
                message: other.to_string(),
            },
        })?;
        commit_round(repo, &wt, &branch, &round).map_err(|e| match e {
            TbdError::Git(git_err) => git_err,
            other => GitError::NotFound {
                message: other.to_string(),
            },
        })?;
        report.merged_count = round.merged_ids.len();
        report.conflict_count = round.conflict_count;
        Ok(None)
    });

    let state_path = host_root.join(".tbd").join("state.yml");
    let workspaces_root = host_root.join(".tbd").join("workspaces");

    match push_result {
        Ok(tbd_git::push::PushOutcome::Pushed { attempts }) => {
            report.attempts = attempts;
            report.pushed = true;

            let outbox = workspaces_root.join(workspace::OUTBOX_NAME);
            if outbox.is_dir() {
                workspace::import(&outbox, &wt.data_dir(), true, now)?;
            }

            let mut state = LocalState::load(&state_path)?;
            state.last_sync_at = Some(now);
            state.save(&state_path)?;
            Ok(report)
        }
        Ok(tbd_git::push::PushOutcome::Aborted { .. }) => {
            unreachable!("the re-merge callback is total and never reports new conflicts")
        }
        Err(GitError::PushFailed {
            remote: failed_remote,
            kind: PushErrorKind::Permanent,
            message,
        }) => {
            let outbox = workspaces_root.join(workspace::OUTBOX_NAME);
            workspace::save(&wt.data_dir(), &outbox, true, Some(&round.remote_issues), now)?;
            Err(TbdError::PushPermanent {
                remote: failed_remote,
                message,
                outbox_saved: Some(workspace::OUTBOX_NAME.to_string()),
            })
        }
        Err(GitError::PushFailed {
            remote: failed_remote,
            kind: PushErrorKind::Transient,
            message,
        }) => Err(TbdError::PushTransient {
            remote: failed_remote,
            message,
        }),
        Err(GitError::PushFailed {
            remote: failed_remote,
            kind: PushErrorKind::Unknown,
            message,
        }) => Err(TbdError::PushUnknown {
            remote: failed_remote,
            message,
        }),
        Err(other) => Err(other.into()),
    }
}
