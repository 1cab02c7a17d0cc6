//! Integration-test infrastructure: a real git remote plus one or more real
//! clones, driven through the public `tbd` API.
//!
//! Grounded on the corpus's `tests/manifold_common/mod.rs`: a self-contained
//! repository in its own temp dir, real git subprocesses underneath, cleaned
//! up on drop.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use tbd::config::Config;
use tbd::sync::SyncReport;
use tbd_git::CliGitRepo;
use tempfile::TempDir;

/// Skip the calling test if the host's git predates the worktree-orphan
/// requirement (2.42, §4.6) the sync orchestrator's `check_version` enforces.
///
/// Returns `true` (and prints a notice) when the test should return early.
#[must_use]
pub fn skip_if_git_too_old() -> bool {
    let Ok(output) = Command::new("git").arg("--version").output() else {
        return true;
    };
    let raw = String::from_utf8_lossy(&output.stdout);
    let found = tbd_git::version::parse_version(&raw);
    if found.is_none_or(|v| v < tbd_git::version::REQUIRED) {
        eprintln!(
            "skipping: host git ({}) predates the {}.{} this scenario requires",
            raw.trim(),
            tbd_git::version::REQUIRED.0,
            tbd_git::version::REQUIRED.1
        );
        return true;
    }
    false
}

fn git_ok(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {args:?}: {e}"));
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn configure_identity(cwd: &Path) {
    git_ok(cwd, &["init", "-q"]);
    git_ok(cwd, &["config", "user.name", "Test"]);
    git_ok(cwd, &["config", "user.email", "test@localhost"]);
    git_ok(cwd, &["config", "commit.gpgsign", "false"]);
}

/// A host repository wired to a bare remote, ready to drive `tbd::sync::sync`.
pub struct TestRepo {
    _host_dir: TempDir,
    _remote_dir: TempDir,
    host_root: PathBuf,
    remote_root: PathBuf,
    config: Config,
}

impl TestRepo {
    /// Create a fresh bare remote and a host clone with `origin` pointed at it.
    #[must_use]
    pub fn new() -> Self {
        let remote_dir = TempDir::new().expect("temp dir");
        let remote_root = remote_dir.path().to_path_buf();
        git_ok(&remote_root, &["init", "-q", "--bare"]);

        let host_dir = TempDir::new().expect("temp dir");
        let host_root = host_dir.path().to_path_buf();
        configure_identity(&host_root);
        git_ok(&host_root, &["checkout", "-q", "-B", "main"]);
        git_ok(&host_root, &["commit", "-q", "--allow-empty", "-m", "initial"]);
        git_ok(&host_root, &["remote", "add", "origin", &remote_root.display().to_string()]);

        let mut config = Config::new("proj");
        config.sync.branch = "tbd-sync".to_string();
        config.sync.remote = "origin".to_string();

        Self {
            _host_dir: host_dir,
            _remote_dir: remote_dir,
            host_root,
            remote_root,
            config,
        }
    }

    /// Clone a second independent host checkout pointed at the same remote,
    /// simulating a disconnected collaborator.
    #[must_use]
    pub fn second_clone(&self) -> Self {
        let host_dir = TempDir::new().expect("temp dir");
        let host_root = host_dir.path().to_path_buf();
        configure_identity(&host_root);
        git_ok(&host_root, &["checkout", "-q", "-B", "main"]);
        git_ok(&host_root, &["commit", "-q", "--allow-empty", "-m", "initial"]);
        git_ok(&host_root, &["remote", "add", "origin", &self.remote_root.display().to_string()]);

        Self {
            _host_dir: host_dir,
            _remote_dir: TempDir::new().expect("temp dir"),
            host_root,
            remote_root: self.remote_root.clone(),
            config: self.config.clone(),
        }
    }

    /// Install a `pre-receive` hook on the bare remote that rejects every
    /// push with the given stderr message, simulating e.g. branch protection.
    pub fn reject_pushes_with(&self, message: &str) {
        let hooks_dir = self.remote_root.join("hooks");
        std::fs::create_dir_all(&hooks_dir).unwrap();
        let hook_path = hooks_dir.join("pre-receive");
        std::fs::write(&hook_path, format!("#!/bin/sh\necho '{message}' >&2\nexit 1\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&hook_path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&hook_path, perms).unwrap();
        }
    }

    #[must_use]
    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    #[must_use]
    pub fn git(&self) -> CliGitRepo {
        CliGitRepo::new(self.host_root.clone())
    }

    /// Run `tbd::sync::sync` against this repo at the current time.
    pub fn sync_now(&self) -> Result<SyncReport, tbd::error::TbdError> {
        tbd::sync::sync(&self.git(), &self.host_root, &self.config, Utc::now())
    }

    /// Path to the worktree's replicated issues directory (valid only after
    /// at least one successful sync has initialized the worktree).
    #[must_use]
    pub fn issues_dir(&self) -> PathBuf {
        self.worktree().issues_dir()
    }

    #[must_use]
    pub fn worktree(&self) -> tbd::worktree::Worktree<'static> {
        // Leaked `CliGitRepo` reference: test-only, and each `TestRepo`
        // creates at most a handful of these over its lifetime.
        let git: &'static CliGitRepo = Box::leak(Box::new(self.git()));
        tbd::worktree::Worktree::new(git, self.host_root.clone(), &self.config.sync.remote, &self.config.sync.branch)
    }
}
