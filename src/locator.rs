//! Failure locator
//!
//! Finds the watched workflow by display name, then the most recent failed
//! run of it on the tracked branch.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

/// A workflow definition as the CI host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Workflow {
    pub id: u64,
    pub name: String,
    /// Definition file, e.g. `.github/workflows/ci.yml`
    pub path: String,
}

/// One execution of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub head_sha: String,
    #[serde(default)]
    pub head_branch: Option<String>,
    /// `None` while the run is still in progress
    #[serde(default)]
    pub conclusion: Option<String>,
    pub logs_url: String,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn is_failure(&self) -> bool {
        self.conclusion.as_deref() == Some(FAILURE_CONCLUSION)
    }
}

const FAILURE_CONCLUSION: &str = "failure";

/// The run selected for repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailingRun {
    pub run_id: u64,
    pub head_sha: String,
    pub logs_url: String,
    pub conclusion: String,
    pub created_at: DateTime<Utc>,
}

impl From<WorkflowRun> for FailingRun {
    fn from(run: WorkflowRun) -> Self {
        Self {
            run_id: run.id,
            head_sha: run.head_sha,
            logs_url: run.logs_url,
            conclusion: run.conclusion.unwrap_or_default(),
            created_at: run.created_at,
        }
    }
}

/// Read side of the CI host.
#[allow(async_fn_in_trait)]
pub trait FailingRunSource {
    async fn list_workflows(&self) -> Result<Vec<Workflow>>;

    /// Runs of `workflow` restricted to `branch`.
    async fn list_runs(&self, workflow: &Workflow, branch: &str) -> Result<Vec<WorkflowRun>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    WorkflowNotFound,
    NoFailingRun { workflow: Workflow },
    Found { workflow: Workflow, run: FailingRun },
}

/// Locate the newest failed run of `workflow_name` on `branch`.
pub async fn locate<S: FailingRunSource>(
    source: &S,
    workflow_name: &str,
    branch: &str,
) -> Result<Located> {
    let workflows = source
        .list_workflows()
        .await
        .context("Failed to list workflows")?;

    let Some(workflow) = select_workflow(workflows, workflow_name) else {
        return Ok(Located::WorkflowNotFound);
    };
    debug!(workflow = %workflow.name, id = workflow.id, path = %workflow.path, "workflow matched");

    let runs = source
        .list_runs(&workflow, branch)
        .await
        .with_context(|| format!("Failed to list runs for workflow '{}'", workflow.name))?;
    debug!(runs = runs.len(), branch, "runs listed");

    match select_failing_run(runs, branch) {
        Some(run) => Ok(Located::Found {
            workflow,
            run: run.into(),
        }),
        None => Ok(Located::NoFailingRun { workflow }),
    }
}

/// First workflow whose display name matches exactly.
pub fn select_workflow(workflows: Vec<Workflow>, name: &str) -> Option<Workflow> {
    workflows.into_iter().find(|wf| wf.name == name)
}

/// Newest failed run on `branch`.
///
/// Runs are ordered by creation time rather than trusting the listing order;
/// the sort is stable so equal timestamps keep the host's order.
pub fn select_failing_run(mut runs: Vec<WorkflowRun>, branch: &str) -> Option<WorkflowRun> {
    runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    runs.into_iter().find(|run| {
        let on_branch = run
            .head_branch
            .as_deref()
            .map_or(true, |head| head == branch);
        on_branch && run.is_failure()
    })
}
