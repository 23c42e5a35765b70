//! Patch application
//!
//! Stages the patch on disk, then runs apply, add, commit, push in order.
//! The first failing step stops the sequence; the error says which step
//! failed and what state the working tree was left in.

use crate::remediation::PatchArtifact;
use anyhow::Result;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Version-control operations the saga needs.
pub trait VcsBackend {
    fn apply(&self, patch_file: &Path) -> Result<()>;
    fn stage_all(&self) -> Result<()>;
    fn commit(&self, message: &str) -> Result<()>;
    fn push(&self, remote: &str, branch: &str) -> Result<()>;
    /// Undo a previously applied patch in the working tree.
    fn revert_patch(&self, patch_file: &Path) -> Result<()>;
    fn head_commit(&self) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WritePatch,
    Apply,
    StageAll,
    Commit,
    Push,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::WritePatch => "write patch",
            Stage::Apply => "apply",
            Stage::StageAll => "stage",
            Stage::Commit => "commit",
            Stage::Push => "push",
        };
        f.write_str(name)
    }
}

/// Working-tree state after a failed saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    /// No change from the patch reached the working tree
    Untouched,
    /// Patch applied but not committed
    Dirty,
    /// Patch applied, then reverted
    RolledBack,
    /// Local commit exists but did not reach the remote
    CommittedUnpushed,
}

impl fmt::Display for TreeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TreeState::Untouched => "working tree untouched",
            TreeState::Dirty => "patch left applied and uncommitted",
            TreeState::RolledBack => "patch rolled back",
            TreeState::CommittedUnpushed => "fix committed locally but not pushed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{stage} step failed ({tree}): {cause:#}")]
pub struct ApplyError {
    pub stage: Stage,
    pub tree: TreeState,
    pub cause: anyhow::Error,
}

/// What a successful saga produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPatch {
    pub commit: String,
    pub patch_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PatchApplier<B> {
    backend: B,
    repo_root: PathBuf,
    /// Relative to `repo_root`
    patch_file: PathBuf,
    commit_message: String,
    remote: String,
    branch: String,
    rollback_on_failure: bool,
}

impl<B: VcsBackend> PatchApplier<B> {
    pub fn new(
        backend: B,
        repo_root: impl Into<PathBuf>,
        patch_file: impl Into<PathBuf>,
        commit_message: impl Into<String>,
        remote: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            repo_root: repo_root.into(),
            patch_file: patch_file.into(),
            commit_message: commit_message.into(),
            remote: remote.into(),
            branch: branch.into(),
            rollback_on_failure: false,
        }
    }

    pub fn with_rollback(mut self, enabled: bool) -> Self {
        self.rollback_on_failure = enabled;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Write the patch to its staging file and return the absolute path.
    pub fn stage_patch(&self, patch: &PatchArtifact) -> Result<PathBuf, ApplyError> {
        let path = self.repo_root.join(&self.patch_file);
        write_patch(&path, patch.as_str()).map_err(|cause| ApplyError {
            stage: Stage::WritePatch,
            tree: TreeState::Untouched,
            cause,
        })?;
        Ok(path)
    }

    /// Run the whole saga for `patch`.
    pub fn apply(&self, patch: &PatchArtifact) -> Result<AppliedPatch, ApplyError> {
        let patch_path = self.stage_patch(patch)?;

        self.backend
            .apply(&self.patch_file)
            .map_err(|cause| ApplyError {
                stage: Stage::Apply,
                tree: TreeState::Untouched,
                cause,
            })?;
        info!(patch = %self.patch_file.display(), "patch applied");

        if let Err(cause) = self.backend.stage_all() {
            return Err(self.fail_after_apply(Stage::StageAll, cause));
        }
        if let Err(cause) = self.backend.commit(&self.commit_message) {
            return Err(self.fail_after_apply(Stage::Commit, cause));
        }

        let commit = self.backend.head_commit().map_err(|cause| ApplyError {
            stage: Stage::Commit,
            tree: TreeState::CommittedUnpushed,
            cause,
        })?;
        info!(commit = %commit, "fix committed");

        self.backend
            .push(&self.remote, &self.branch)
            .map_err(|cause| ApplyError {
                stage: Stage::Push,
                tree: TreeState::CommittedUnpushed,
                cause,
            })?;
        info!(remote = %self.remote, branch = %self.branch, "fix pushed");

        Ok(AppliedPatch {
            commit,
            patch_file: patch_path,
        })
    }

    fn fail_after_apply(&self, stage: Stage, cause: anyhow::Error) -> ApplyError {
        if !self.rollback_on_failure {
            return ApplyError {
                stage,
                tree: TreeState::Dirty,
                cause,
            };
        }
        let tree = match self.backend.revert_patch(&self.patch_file) {
            Ok(()) => TreeState::RolledBack,
            Err(err) => {
                warn!(error = %format!("{:#}", err), "rollback failed, leaving patch applied");
                TreeState::Dirty
            }
        };
        ApplyError {
            stage,
            tree,
            cause,
        }
    }
}

fn write_patch(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    // git apply rejects a patch whose last hunk line lacks a newline
    let mut content = content.to_string();
    if !content.ends_with('\n') {
        content.push('\n');
    }
    fs::write(path, content)?;
    Ok(())
}
