//! Git operations for the apply-and-push workflow
//!
//! Mutating steps shell out to `git` so hooks, credentials helpers, and
//! the CI checkout's configuration all apply. Read-only queries go through
//! git2.

use crate::patch::VcsBackend;
use anyhow::{Context, Result};
use git2::Repository;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// `git` invoked in a fixed working directory.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_path: PathBuf,
}

impl GitCli {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        debug!(args = ?args, "git");
        let output = Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute git {}", args.first().unwrap_or(&"")))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(anyhow::anyhow!(
                "git {} failed ({}): {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow::anyhow!("Patch path is not valid UTF-8: {}", path.display()))
}

impl VcsBackend for GitCli {
    fn apply(&self, patch_file: &Path) -> Result<()> {
        self.run(&["apply", path_arg(patch_file)?]).map(|_| ())
    }

    fn stage_all(&self) -> Result<()> {
        self.run(&["add", "-A"]).map(|_| ())
    }

    fn commit(&self, message: &str) -> Result<()> {
        self.run(&["commit", "-m", message]).map(|_| ())
    }

    fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["push", remote, branch]).map(|_| ())
    }

    fn revert_patch(&self, patch_file: &Path) -> Result<()> {
        // Unstage first so the reverse apply sees the patched working tree only.
        self.run(&["reset", "-q"])?;
        self.run(&["apply", "-R", path_arg(patch_file)?]).map(|_| ())
    }

    fn head_commit(&self) -> Result<String> {
        head_commit(&self.repo_path)
    }
}

/// Commit id HEAD points at.
pub fn head_commit(repo_path: &Path) -> Result<String> {
    let repo = Repository::open(repo_path).context("Failed to open repository")?;
    let head = repo.head().context("Failed to get HEAD")?;
    let commit = head.peel_to_commit().context("HEAD does not point at a commit")?;
    Ok(commit.id().to_string())
}

/// Top-level working directory of the repository containing `path`.
pub fn discover_root(path: &Path) -> Result<PathBuf> {
    let repo = Repository::discover(path)
        .with_context(|| format!("No git repository found at {}", path.display()))?;
    repo.workdir()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow::anyhow!("Repository at {} is bare", path.display()))
}
