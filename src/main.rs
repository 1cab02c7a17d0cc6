//! Thin `clap` dispatch over the `tbd` library. Command parsing, help text,
//! and output formatting are explicitly out of scope (spec.md §1); this
//! binary exists only to exercise the library end-to-end.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tbd::config::Config;
use tbd::workspace;

#[derive(Parser)]
#[command(name = "tbd", version, about = "Git-backed, offline-first distributed issue store")]
struct Cli {
    #[arg(long, env = "TBD_ROOT", default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize `.tbd/` and the sync worktree in the current repository.
    Init {
        /// Display id prefix (1-16 lowercase alphanumerics/hyphens).
        #[arg(long)]
        prefix: String,
    },
    /// Fetch, merge, commit, and push.
    Sync,
    /// Report worktree health and local state.
    Status,
    /// Save/import/list/delete workspaces.
    Workspace {
        #[command(subcommand)]
        action: WorkspaceCommand,
    },
}

#[derive(Subcommand)]
enum WorkspaceCommand {
    /// Save worktree issues into a workspace.
    Save {
        name: String,
        #[arg(long)]
        all: bool,
    },
    /// Import a workspace's issues into the worktree.
    Import {
        name: String,
        #[arg(long)]
        keep: bool,
    },
    /// List workspaces.
    List,
    /// Delete a workspace.
    Delete { name: String },
}

fn config_path(root: &Path) -> PathBuf {
    root.join(".tbd").join("config.yml")
}

fn workspaces_root(root: &Path) -> PathBuf {
    root.join(".tbd").join("workspaces")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let root = cli.root.canonicalize().unwrap_or(cli.root);

    match cli.command {
        Command::Init { prefix } => cmd_init(&root, &prefix),
        Command::Sync => cmd_sync(&root),
        Command::Status => cmd_status(&root),
        Command::Workspace { action } => cmd_workspace(&root, action),
    }
}

fn cmd_init(root: &Path, prefix: &str) -> Result<()> {
    let path = config_path(root);
    if path.exists() {
        bail!("already initialized: {} exists", path.display());
    }
    let config = Config::new(prefix);
    tbd::config::save(&path, &config).context("writing config.yml")?;

    let repo = tbd_git::CliGitRepo::new(root);
    let wt = tbd::worktree::Worktree::new(&repo, root, &config.sync.remote, &config.sync.branch);
    wt.ensure_valid().context("initializing sync worktree")?;

    println!("initialized tbd in {}", root.display());
    Ok(())
}

fn cmd_sync(root: &Path) -> Result<()> {
    let config = tbd::config::load(&config_path(root)).context("loading config.yml")?;
    let repo = tbd_git::CliGitRepo::new(root);
    let report = tbd::sync::sync(&repo, root, &config, Utc::now())?;

    println!(
        "synced: {} issue(s) merged, {} conflict(s), {} attempt(s), pushed={}",
        report.merged_count, report.conflict_count, report.attempts, report.pushed
    );
    if let Some(outbox) = &report.outbox_saved {
        println!("push failed permanently; changes saved to workspace `{outbox}`");
    }
    Ok(())
}

fn cmd_status(root: &Path) -> Result<()> {
    let config = tbd::config::load(&config_path(root)).context("loading config.yml")?;
    let repo = tbd_git::CliGitRepo::new(root);
    let wt = tbd::worktree::Worktree::new(&repo, root, &config.sync.remote, &config.sync.branch);
    let (commit, branch) = wt.report()?;
    println!(
        "worktree: valid at {commit} (branch: {})",
        branch.as_deref().unwrap_or("detached")
    );

    let state_path = root.join(".tbd").join("state.yml");
    let state = tbd::state::LocalState::load(&state_path)?;
    match state.last_sync_at {
        Some(ts) => println!("last_sync_at: {ts}"),
        None => println!("last_sync_at: never"),
    }
    Ok(())
}

fn cmd_workspace(root: &Path, action: WorkspaceCommand) -> Result<()> {
    let config = tbd::config::load(&config_path(root)).context("loading config.yml")?;
    let repo = tbd_git::CliGitRepo::new(root);
    let wt = tbd::worktree::Worktree::new(&repo, root, &config.sync.remote, &config.sync.branch);
    let workspaces = workspaces_root(root);

    match action {
        WorkspaceCommand::Save { name, all } => {
            let outcome = workspace::save(&wt.data_dir(), &workspaces.join(&name), !all, None, Utc::now())?;
            println!("saved {} issue(s) to workspace `{name}`", outcome.transferred.len());
        }
        WorkspaceCommand::Import { name, keep } => {
            let outcome = workspace::import(&workspaces.join(&name), &wt.data_dir(), !keep, Utc::now())?;
            println!("imported {} issue(s) from workspace `{name}`", outcome.transferred.len());
        }
        WorkspaceCommand::List => {
            for name in workspace::list(&workspaces)? {
                let counts = workspace::list_with_counts(&workspaces.join(&name))?;
                println!(
                    "{name}: total={} open={} in_progress={} closed={}",
                    counts.total, counts.open, counts.in_progress, counts.closed
                );
            }
        }
        WorkspaceCommand::Delete { name } => {
            workspace::delete(&workspaces, &name)?;
            println!("deleted workspace `{name}`");
        }
    }
    Ok(())
}
