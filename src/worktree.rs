//! Worktree lifecycle: health classification, init, repair, migration (§4.6).

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tbd_git::GitRepo;

use crate::error::TbdError;

/// Fixed name of the auxiliary checkout, beneath `<host_root>/.tbd/`.
pub const WORKTREE_DIR_NAME: &str = "data-sync-worktree";
/// Current on-disk schema stamped into `meta.yml` on first init.
pub const SCHEMA_VERSION: u32 = 1;

/// Health classification of the auxiliary worktree (§4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    /// Registered, on disk, and `HEAD` resolves.
    Valid {
        /// Current commit OID.
        commit: String,
        /// Branch name, or `None` if `HEAD` is detached.
        branch: Option<String>,
    },
    /// Directory absent and not registered with the host.
    Missing,
    /// Registered but the directory was deleted externally.
    Prunable,
    /// Directory exists but is not a valid checkout, or is registered
    /// without a resolvable `HEAD`.
    Corrupted,
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    schema_version: u32,
}

/// The auxiliary worktree attached to the sync branch.
pub struct Worktree<'a> {
    git: &'a dyn GitRepo,
    host_root: PathBuf,
    remote: String,
    branch: String,
}

impl<'a> Worktree<'a> {
    /// Open a handle rooted at `host_root`, targeting `branch` on `remote`.
    #[must_use]
    pub fn new(git: &'a dyn GitRepo, host_root: impl Into<PathBuf>, remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            git,
            host_root: host_root.into(),
            remote: remote.into(),
            branch: branch.into(),
        }
    }

    /// Path to the worktree checkout itself.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.host_root.join(".tbd").join(WORKTREE_DIR_NAME)
    }

    /// Path to the replicated data directory inside the worktree.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.path().join(".tbd").join("data-sync")
    }

    /// The *wrong* path some earlier data may have been written to: directly
    /// under the host repository's own `.tbd/data-sync`, bypassing the
    /// worktree entirely (§4.6 data-location migration).
    #[must_use]
    pub fn legacy_data_dir(&self) -> PathBuf {
        self.host_root.join(".tbd").join("data-sync")
    }

    /// Directory holding issue files.
    #[must_use]
    pub fn issues_dir(&self) -> PathBuf {
        self.data_dir().join("issues")
    }

    /// Path to the short-ID mapping document.
    #[must_use]
    pub fn mappings_path(&self) -> PathBuf {
        self.data_dir().join("mappings").join("ids.yml")
    }

    /// Directory holding conflict attic entries from sync merges.
    #[must_use]
    pub fn attic_conflicts_dir(&self) -> PathBuf {
        self.data_dir().join("attic").join("conflicts")
    }

    fn backups_dir(&self) -> PathBuf {
        self.host_root.join(".tbd").join("backups")
    }

    /// Classify current health (§4.6).
    ///
    /// # Errors
    /// Any git-adapter failure listing worktrees.
    pub fn check(&self) -> Result<Health, TbdError> {
        let path = self.path();
        let entry = self.git.worktree_list()?.into_iter().find(|w| w.path == path);
        let exists = path.is_dir();

        match (entry, exists) {
            (None, false) => Ok(Health::Missing),
            (None, true) => Ok(Health::Corrupted),
            (Some(_), false) => Ok(Health::Prunable),
            (Some(entry), true) => match entry.head {
                Some(commit) => Ok(Health::Valid {
                    commit,
                    branch: entry.branch,
                }),
                None => Ok(Health::Corrupted),
            },
        }
    }

    /// Classify current health and fail unless it is `Valid` (§4.6/§7:
    /// "repair automatically when requested; report otherwise"). Callers
    /// that want the repairing path should use [`Self::ensure_valid`]
    /// instead.
    ///
    /// # Errors
    /// Any git-adapter failure from [`Self::check`], or
    /// [`TbdError::WorktreeUnhealthy`] if the worktree needs repair.
    pub fn report(&self) -> Result<(String, Option<String>), TbdError> {
        match self.check()? {
            Health::Valid { commit, branch } => Ok((commit, branch)),
            other => Err(TbdError::WorktreeUnhealthy {
                state: health_state_name(&other).to_string(),
                path: self.path(),
            }),
        }
    }

    /// Ensure the worktree is `Valid`, repairing it first if necessary.
    ///
    /// # Errors
    /// Any git-adapter or I/O failure during repair/init.
    pub fn ensure_valid(&self) -> Result<(), TbdError> {
        match self.check()? {
            Health::Valid { .. } => Ok(()),
            Health::Prunable | Health::Missing => {
                self.git.worktree_prune()?;
                self.init()
            }
            Health::Corrupted => {
                self.backup()?;
                let _ = self.git.worktree_remove(&self.path(), true);
                self.git.worktree_prune()?;
                self.init()
            }
        }
    }

    fn backup(&self) -> Result<(), TbdError> {
        let path = self.path();
        if !path.is_dir() {
            return Ok(());
        }
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let dest = self.backups_dir().join(format!("worktree-{stamp}"));
        fs::create_dir_all(&dest)?;
        copy_dir_contents(&path, &dest)?;
        Ok(())
    }

    /// Run the initialization decision tree (§4.6).
    fn init(&self) -> Result<(), TbdError> {
        if matches!(self.check()?, Health::Valid { .. }) {
            return Ok(());
        }

        let path = self.path();
        if self.git.local_branch_exists(&self.branch)? {
            self.git.worktree_add_branch(&path, &self.branch)?;
        } else if self.git.remote_branch_exists(&self.remote, &self.branch)? {
            self.git.fetch(&self.remote, &self.branch)?;
            self.git
                .worktree_add_branch(&path, &format!("{}/{}", self.remote, self.branch))?;
        } else {
            self.git.worktree_add_orphan(&path, &self.branch)?;
            self.scaffold()?;
        }
        Ok(())
    }

    fn scaffold(&self) -> Result<(), TbdError> {
        let data_dir = self.data_dir();
        fs::create_dir_all(data_dir.join("issues"))?;
        fs::create_dir_all(data_dir.join("mappings"))?;
        fs::create_dir_all(data_dir.join("attic").join("conflicts"))?;
        let meta_path = data_dir.join("meta.yml");
        let meta = Meta {
            schema_version: SCHEMA_VERSION,
        };
        fs::write(&meta_path, serde_yaml::to_string(&meta).map_err(|e| TbdError::Config {
            path: meta_path.clone(),
            detail: e.to_string(),
        })?)?;

        let rel_meta = meta_path.strip_prefix(self.path()).unwrap_or(&meta_path).to_path_buf();
        self.git
            .commit_paths(&self.path(), &self.branch, &[rel_meta], "Initialize tbd-sync branch")?;
        Ok(())
    }

    /// Detect and repair a detached `HEAD` left by an earlier init bug
    /// (§4.6 attachment repair). Returns whether a repair occurred.
    ///
    /// # Errors
    /// Any git-adapter failure.
    pub fn ensure_attached(&self) -> Result<bool, TbdError> {
        match self.check()? {
            Health::Valid { branch: None, .. } => {
                self.git.checkout_branch(&self.path(), &self.branch)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Detect issues/mappings written to [`Self::legacy_data_dir`] and copy
    /// them into the worktree (§4.6 data-location migration).
    ///
    /// # Errors
    /// Any git-adapter or I/O failure during migration.
    pub fn migrate_data_location(&self, remove_originals: bool) -> Result<bool, TbdError> {
        let legacy = self.legacy_data_dir();
        if !legacy.is_dir() {
            return Ok(false);
        }

        self.backup_legacy(&legacy)?;
        self.ensure_attached()?;

        let data_dir = self.data_dir();
        fs::create_dir_all(&data_dir)?;
        copy_dir_contents(&legacy, &data_dir)?;

        let mut paths = Vec::new();
        collect_relative_files(&data_dir, &data_dir, &mut paths);

        self.git
            .commit_paths(&self.path(), &self.branch, &paths, "Migrate data written outside the worktree")?;

        if remove_originals {
            fs::remove_dir_all(&legacy)?;
        }
        Ok(true)
    }

    fn backup_legacy(&self, legacy: &Path) -> Result<(), TbdError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let dest = self.backups_dir().join(format!("legacy-data-{stamp}"));
        fs::create_dir_all(&dest)?;
        copy_dir_contents(legacy, &dest)?;
        Ok(())
    }
}

const fn health_state_name(health: &Health) -> &'static str {
    match health {
        Health::Valid { .. } => "valid",
        Health::Missing => "missing",
        Health::Prunable => "prunable",
        Health::Corrupted => "corrupted",
    }
}

fn copy_dir_contents(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&target)?;
            copy_dir_contents(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

fn collect_relative_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_relative_files(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::Path as StdPath;
    use tbd_git::{GitError, WorktreeEntry};

    #[derive(Default)]
    struct FakeGit {
        worktrees: RefCell<Vec<WorktreeEntry>>,
        local_branches: RefCell<Vec<String>>,
    }

    impl GitRepo for FakeGit {
        fn check_version(&self) -> Result<(), GitError> {
            Ok(())
        }
        fn rev_parse_opt(&self, _spec: &str) -> Result<Option<String>, GitError> {
            Ok(None)
        }
        fn local_branch_exists(&self, branch: &str) -> Result<bool, GitError> {
            Ok(self.local_branches.borrow().iter().any(|b| b == branch))
        }
        fn remote_branch_exists(&self, _remote: &str, _branch: &str) -> Result<bool, GitError> {
            Ok(false)
        }
        fn fetch(&self, _remote: &str, _branch: &str) -> Result<(), GitError> {
            Ok(())
        }
        fn worktree_add_orphan(&self, path: &StdPath, branch: &str) -> Result<(), GitError> {
            fs::create_dir_all(path).unwrap();
            self.worktrees.borrow_mut().push(WorktreeEntry {
                path: path.to_path_buf(),
                branch: Some(branch.to_string()),
                head: Some("0".repeat(40)),
            });
            self.local_branches.borrow_mut().push(branch.to_string());
            Ok(())
        }
        fn worktree_add_branch(&self, path: &StdPath, branch: &str) -> Result<(), GitError> {
            fs::create_dir_all(path).unwrap();
            self.worktrees.borrow_mut().push(WorktreeEntry {
                path: path.to_path_buf(),
                branch: Some(branch.to_string()),
                head: Some("0".repeat(40)),
            });
            Ok(())
        }
        fn worktree_list(&self) -> Result<Vec<WorktreeEntry>, GitError> {
            Ok(self.worktrees.borrow().clone())
        }
        fn worktree_remove(&self, path: &StdPath, _force: bool) -> Result<(), GitError> {
            self.worktrees.borrow_mut().retain(|w| w.path != path);
            Ok(())
        }
        fn worktree_prune(&self) -> Result<(), GitError> {
            Ok(())
        }
        fn checkout_branch(&self, _worktree_path: &StdPath, _branch: &str) -> Result<(), GitError> {
            Ok(())
        }
        fn commit_paths(
            &self,
            _worktree_path: &StdPath,
            _branch: &str,
            _paths: &[PathBuf],
            _message: &str,
        ) -> Result<Option<String>, GitError> {
            Ok(Some("0".repeat(40)))
        }
        fn set_branch_ref(&self, _branch: &str, _oid: &str) -> Result<(), GitError> {
            Ok(())
        }
        fn read_file_at(&self, _rev: &str, _path: &str) -> Result<Option<Vec<u8>>, GitError> {
            Ok(None)
        }
        fn list_files_at(&self, _rev: &str, _dir: &str) -> Result<Vec<String>, GitError> {
            Ok(Vec::new())
        }
        fn merge_base(&self, _a: &str, _b: &str) -> Result<Option<String>, GitError> {
            Ok(None)
        }
    }

    #[test]
    fn absent_and_unregistered_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::default();
        let wt = Worktree::new(&git, dir.path(), "origin", "tbd-sync");
        assert_eq!(wt.check().unwrap(), Health::Missing);
    }

    #[test]
    fn init_from_scratch_creates_orphan_and_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::default();
        let wt = Worktree::new(&git, dir.path(), "origin", "tbd-sync");
        wt.ensure_valid().unwrap();
        assert!(matches!(wt.check().unwrap(), Health::Valid { .. }));
        assert!(wt.data_dir().join("meta.yml").is_file());
    }

    #[test]
    fn registered_but_deleted_directory_is_prunable() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::default();
        let wt = Worktree::new(&git, dir.path(), "origin", "tbd-sync");
        wt.ensure_valid().unwrap();
        fs::remove_dir_all(wt.path()).unwrap();
        assert_eq!(wt.check().unwrap(), Health::Prunable);
    }

    #[test]
    fn repair_from_prunable_reinitializes() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::default();
        let wt = Worktree::new(&git, dir.path(), "origin", "tbd-sync");
        wt.ensure_valid().unwrap();
        fs::remove_dir_all(wt.path()).unwrap();
        wt.ensure_valid().unwrap();
        assert!(matches!(wt.check().unwrap(), Health::Valid { .. }));
    }

    #[test]
    fn report_succeeds_once_valid() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::default();
        let wt = Worktree::new(&git, dir.path(), "origin", "tbd-sync");
        wt.ensure_valid().unwrap();
        assert!(wt.report().is_ok());
    }

    #[test]
    fn report_fails_on_a_prunable_worktree_without_repairing() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::default();
        let wt = Worktree::new(&git, dir.path(), "origin", "tbd-sync");
        wt.ensure_valid().unwrap();
        fs::remove_dir_all(wt.path()).unwrap();

        let err = wt.report().unwrap_err();
        assert!(matches!(
            err,
            TbdError::WorktreeUnhealthy { ref state, .. } if state == "prunable"
        ));
        assert_eq!(wt.check().unwrap(), Health::Prunable);
    }
}
