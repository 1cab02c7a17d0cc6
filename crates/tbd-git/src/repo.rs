//! The [`GitRepo`] trait — the single abstraction boundary between `tbd` and git.
//!
//! Every caller interacts with git exclusively through this trait so that
//! domain-crate tests can substitute an in-memory double instead of
//! shelling out. The only production implementation, [`CliGitRepo`], is a
//! thin subprocess façade: every method maps to one or a handful of `git`
//! invocations, arguments passed directly (no shell interpolation).

use std::path::{Path, PathBuf};

use crate::error::GitError;
use crate::index_guard::IndexGuard;
use crate::process;
use crate::types::WorktreeEntry;
use crate::{push, version};

/// The git abstraction trait used by the `tbd` domain crate.
///
/// Object-safe: no generic methods, no `Self` in return position. Callers
/// may use `&dyn GitRepo` or `Box<dyn GitRepo>`.
pub trait GitRepo {
    /// Verify the host git binary meets the minimum required version.
    fn check_version(&self) -> Result<(), GitError>;

    /// Resolve a revision spec, returning `None` if it does not resolve.
    fn rev_parse_opt(&self, spec: &str) -> Result<Option<String>, GitError>;

    /// Whether a local branch exists.
    fn local_branch_exists(&self, branch: &str) -> Result<bool, GitError>;

    /// Whether a branch exists on `remote` (consults the remote-tracking ref).
    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool, GitError>;

    /// Fetch a single branch from `remote`. Failure is reported, not panicked;
    /// callers may treat a fetch failure as non-fatal per the sync contract.
    fn fetch(&self, remote: &str, branch: &str) -> Result<(), GitError>;

    /// Add a linked worktree checking out an orphan branch with no history.
    fn worktree_add_orphan(&self, path: &Path, branch: &str) -> Result<(), GitError>;

    /// Add a linked worktree attached to an existing local branch.
    fn worktree_add_branch(&self, path: &Path, branch: &str) -> Result<(), GitError>;

    /// List all linked worktrees (excluding the main working tree).
    fn worktree_list(&self) -> Result<Vec<WorktreeEntry>, GitError>;

    /// Remove a linked worktree by path. Idempotent if already gone.
    fn worktree_remove(&self, path: &Path, force: bool) -> Result<(), GitError>;

    /// Prune worktree administrative files for checkouts deleted externally.
    fn worktree_prune(&self) -> Result<(), GitError>;

    /// Re-attach a worktree's `HEAD` to `branch` (undoing a detached checkout).
    fn checkout_branch(&self, worktree_path: &Path, branch: &str) -> Result<(), GitError>;

    /// Commit `paths` (relative to `worktree_path`) onto `branch` using an
    /// isolated index, so the worktree's real staging area is untouched.
    /// Returns the new commit OID, or `None` if there was nothing to commit
    /// (no-op — every path already matched the branch tip).
    fn commit_paths(
        &self,
        worktree_path: &Path,
        branch: &str,
        paths: &[PathBuf],
        message: &str,
    ) -> Result<Option<String>, GitError>;

    /// Force a local branch ref to point at `oid`, regardless of whether
    /// that is a fast-forward. Used to re-parent a pending merge commit onto
    /// a freshly fetched remote tip so the next push can fast-forward.
    fn set_branch_ref(&self, branch: &str, oid: &str) -> Result<(), GitError>;

    /// Read a file's content at a given ref (`git show <ref>:<path>`),
    /// without checking anything out.
    fn read_file_at(&self, rev: &str, path: &str) -> Result<Option<Vec<u8>>, GitError>;

    /// List file paths under `dir` at a given ref.
    fn list_files_at(&self, rev: &str, dir: &str) -> Result<Vec<String>, GitError>;

    /// Best common ancestor of two commits, or `None` if unrelated.
    fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>, GitError>;
}

/// Subprocess-backed [`GitRepo`] implementation rooted at a host repository.
pub struct CliGitRepo {
    /// The host repository's top-level working directory.
    root: PathBuf,
}

impl CliGitRepo {
    /// Open an adapter rooted at `root` (the host repository's working tree).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn git_dir(&self) -> Result<PathBuf, GitError> {
        let raw = process::run_text(&self.root, &["rev-parse", "--git-common-dir"], &[])?;
        let path = PathBuf::from(raw);
        Ok(if path.is_absolute() {
            path
        } else {
            self.root.join(path)
        })
    }
}

impl GitRepo for CliGitRepo {
    fn check_version(&self) -> Result<(), GitError> {
        version::check(&self.root)
    }

    fn rev_parse_opt(&self, spec: &str) -> Result<Option<String>, GitError> {
        match process::run_text(&self.root, &["rev-parse", "--verify", "--quiet", spec], &[]) {
            Ok(oid) if !oid.is_empty() => Ok(Some(oid)),
            Ok(_) | Err(GitError::CommandFailed { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    fn local_branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        Ok(self.rev_parse_opt(&format!("refs/heads/{branch}"))?.is_some())
    }

    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool, GitError> {
        Ok(self
            .rev_parse_opt(&format!("refs/remotes/{remote}/{branch}"))?
            .is_some())
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        process::run(
            &self.root,
            &["fetch", remote, &format!("{branch}:refs/remotes/{remote}/{branch}")],
            &[],
        )?;
        Ok(())
    }

    fn worktree_add_orphan(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        process::run(
            &self.root,
            &[
                "-c",
                "core.hooksPath=/dev/null",
                "worktree",
                "add",
                "--orphan",
                "-b",
                branch,
                &path.display().to_string(),
            ],
            &[],
        )?;
        Ok(())
    }

    fn worktree_add_branch(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        process::run(
            &self.root,
            &["worktree", "add", &path.display().to_string(), branch],
            &[],
        )?;
        Ok(())
    }

    fn worktree_list(&self) -> Result<Vec<WorktreeEntry>, GitError> {
        let raw = process::run_text(&self.root, &["worktree", "list", "--porcelain"], &[])?;
        let mut entries = Vec::new();
        let mut path = None;
        let mut head = None;
        let mut branch = None;
        for line in raw.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                if let Some(prev) = path.take() {
                    entries.push(WorktreeEntry { path: prev, branch: branch.take(), head: head.take() });
                }
                path = Some(PathBuf::from(p));
            } else if let Some(h) = line.strip_prefix("HEAD ") {
                head = Some(h.to_string());
            } else if let Some(b) = line.strip_prefix("branch ") {
                branch = Some(b.trim_start_matches("refs/heads/").to_string());
            }
        }
        if let Some(prev) = path.take() {
            entries.push(WorktreeEntry { path: prev, branch: branch.take(), head: head.take() });
        }
        // First entry is always the main working tree; callers filter by path.
        Ok(entries)
    }

    fn worktree_remove(&self, path: &Path, force: bool) -> Result<(), GitError> {
        let display = path.display().to_string();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&display);
        match process::run(&self.root, &args, &[]) {
            Ok(_) | Err(GitError::NotFound { .. }) => Ok(()),
            Err(GitError::CommandFailed { stderr, .. }) if stderr.contains("is not a working tree") => Ok(()),
            Err(other) => Err(other),
        }
    }

    fn worktree_prune(&self) -> Result<(), GitError> {
        process::run(&self.root, &["worktree", "prune"], &[])?;
        Ok(())
    }

    fn checkout_branch(&self, worktree_path: &Path, branch: &str) -> Result<(), GitError> {
        process::run(worktree_path, &["checkout", branch], &[])?;
        Ok(())
    }

    fn commit_paths(
        &self,
        worktree_path: &Path,
        branch: &str,
        paths: &[PathBuf],
        message: &str,
    ) -> Result<Option<String>, GitError> {
        let git_dir = self.git_dir()?;
        let guard = IndexGuard::acquire(&git_dir);
        let (env_key, env_value) = guard.env_override();
        let env_overrides = [(env_key, env_value.as_str())];

        let parent = self.rev_parse_opt(&format!("refs/heads/{branch}"))?;

        if let Some(parent_oid) = &parent {
            process::run(worktree_path, &["read-tree", parent_oid], &env_overrides)?;
        } else {
            process::run(worktree_path, &["read-tree", "--empty"], &env_overrides)?;
        }

        if !paths.is_empty() {
            let mut add_args = vec!["add", "--"];
            let rel: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
            add_args.extend(rel.iter().map(String::as_str));
            process::run(worktree_path, &add_args, &env_overrides)?;
        }

        let tree = process::run_text(worktree_path, &["write-tree"], &env_overrides)?;

        if let Some(parent_oid) = &parent {
            let parent_tree =
                process::run_text(worktree_path, &["rev-parse", &format!("{parent_oid}^{{tree}}")], &env_overrides)?;
            if parent_tree == tree {
                return Ok(None);
            }
        }

        let mut commit_args = vec!["commit-tree".to_string(), tree];
        if let Some(parent_oid) = &parent {
            commit_args.push("-p".to_string());
            commit_args.push(parent_oid.clone());
        }
        commit_args.push("-m".to_string());
        commit_args.push(message.to_string());
        let commit_args_ref: Vec<&str> = commit_args.iter().map(String::as_str).collect();
        let commit_oid = process::run_text(worktree_path, &commit_args_ref, &env_overrides)?;

        process::run(
            worktree_path,
            &["update-ref", &format!("refs/heads/{branch}"), &commit_oid],
            &env_overrides,
        )?;

        Ok(Some(commit_oid))
    }

    fn set_branch_ref(&self, branch: &str, oid: &str) -> Result<(), GitError> {
        process::run(&self.root, &["update-ref", &format!("refs/heads/{branch}"), oid], &[])?;
        Ok(())
    }

    fn read_file_at(&self, rev: &str, path: &str) -> Result<Option<Vec<u8>>, GitError> {
        match process::run(&self.root, &["show", &format!("{rev}:{path}")], &[]) {
            Ok(out) => Ok(Some(out.stdout)),
            Err(GitError::CommandFailed { stderr, .. })
                if stderr.contains("does not exist") || stderr.contains("exists on disk, but not in") =>
            {
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    fn list_files_at(&self, rev: &str, dir: &str) -> Result<Vec<String>, GitError> {
        match process::run_text(
            &self.root,
            &["ls-tree", "-r", "--name-only", rev, "--", dir],
            &[],
        ) {
            Ok(raw) => Ok(raw.lines().map(ToString::to_string).collect()),
            Err(GitError::CommandFailed { .. }) => Ok(Vec::new()),
            Err(other) => Err(other),
        }
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>, GitError> {
        match process::run_text(&self.root, &["merge-base", a, b], &[]) {
            Ok(oid) => Ok(Some(oid)),
            Err(GitError::CommandFailed { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }
}

impl CliGitRepo {
    /// Push with retry and stderr-based classification.
    ///
    /// Not part of [`GitRepo`]: the non-fast-forward merge callback is
    /// generic over the caller's conflict type, which a generic method
    /// would make the trait non-object-safe. Callers that need a test
    /// double for push still go through [`GitRepo`] for everything else and
    /// call this directly on the concrete adapter.
    pub fn push_with_retry<C>(
        &self,
        remote: &str,
        local_ref: &str,
        remote_ref: &str,
        resolve_non_fast_forward: impl FnMut() -> Result<Option<Vec<C>>, GitError>,
    ) -> Result<push::PushOutcome<C>, GitError> {
        push::push_with_retry(&self.root, remote, local_ref, remote_ref, &[], resolve_non_fast_forward)
    }
}
