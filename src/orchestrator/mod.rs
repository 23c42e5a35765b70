//! Self-heal orchestration
//!
//! One invocation walks a fixed sequence:
//!
//! ```text
//! locate failure -> check ceiling -> collect evidence -> request patch -> apply/commit/push
//! ```
//!
//! Each step may end the run early with an [`Outcome`] that means "nothing
//! more to do". Only collaborator faults (log transport, patch service,
//! apply/commit/push) come back as errors.
//!
//! The attempt is written to the ledger before any evidence is fetched, so a
//! run that later crashes still counts against the commit's ceiling.

use crate::config::Settings;
use crate::evidence::{self, LogSource};
use crate::ledger::{AttemptLedger, RecordOutcome};
use crate::locator::{self, FailingRunSource, Located};
use crate::patch::{PatchApplier, VcsBackend};
use crate::remediation::{self, PatchGenerator, RemediationRequest};
use anyhow::Result;
use std::path::PathBuf;
use tracing::{error, info};


/// How a run ended without a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    MissingConfiguration { missing: Vec<&'static str> },
    WorkflowNotFound { workflow: String },
    NoFailingRun { workflow: String, branch: String },
    CeilingReached { sha: String, attempts: u32 },
    NoUsablePatch { sha: String, attempt: u32 },
    /// Dry run: the patch was written but not applied
    PatchStaged { sha: String, attempt: u32, patch_file: PathBuf },
    Healed { sha: String, attempt: u32, commit: String },
}

impl Outcome {
    /// Human-readable reason, suitable for the run log.
    pub fn reason(&self) -> String {
        match self {
            Outcome::MissingConfiguration { missing } => format!(
                "Required environment variables are missing: {}",
                missing.join(", ")
            ),
            Outcome::WorkflowNotFound { workflow } => {
                format!("Workflow '{}' not found", workflow)
            }
            Outcome::NoFailingRun { workflow, branch } => format!(
                "No failed run of '{}' found on branch '{}'",
                workflow, branch
            ),
            Outcome::CeilingReached { sha, attempts } => format!(
                "Maximum self-heal attempts reached for commit {} ({} attempts)",
                short_sha(sha),
                attempts
            ),
            Outcome::NoUsablePatch { sha, .. } => format!(
                "No valid diff received for commit {}",
                short_sha(sha)
            ),
            Outcome::PatchStaged { sha, patch_file, .. } => format!(
                "Dry run: patch for commit {} written to {}",
                short_sha(sha),
                patch_file.display()
            ),
            Outcome::Healed { sha, attempt, commit } => format!(
                "Pushed fix {} for commit {} (attempt {})",
                short_sha(commit),
                short_sha(sha),
                attempt
            ),
        }
    }

    /// True for every outcome that did not land a fix.
    pub fn is_no_op(&self) -> bool {
        !matches!(self, Outcome::Healed { .. })
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}

/// One self-heal run over injected collaborators.
pub struct Orchestrator<S, G, B> {
    settings: Settings,
    repository: String,
    source: S,
    generator: G,
    applier: PatchApplier<B>,
    ledger: AttemptLedger,
    dry_run: bool,
}

impl<S, G, B> Orchestrator<S, G, B>
where
    S: FailingRunSource + LogSource,
    G: PatchGenerator,
    B: VcsBackend,
{
    pub fn new(
        settings: Settings,
        repository: impl Into<String>,
        source: S,
        generator: G,
        applier: PatchApplier<B>,
        ledger: AttemptLedger,
    ) -> Self {
        Self {
            settings,
            repository: repository.into(),
            source,
            generator,
            applier,
            ledger,
            dry_run: false,
        }
    }

    /// Stop after writing the patch; the ledger is only read, never written.
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Execute the run. Consumes the orchestrator: one ledger mutation per run.
    pub async fn run(mut self) -> Result<Outcome> {
        let settings = &self.settings;

        let (workflow, run) = match locator::locate(
            &self.source,
            &settings.workflow_name,
            &settings.branch,
        )
        .await?
        {
            Located::WorkflowNotFound => {
                return Ok(finish(Outcome::WorkflowNotFound {
                    workflow: settings.workflow_name.clone(),
                }))
            }
            Located::NoFailingRun { .. } => {
                return Ok(finish(Outcome::NoFailingRun {
                    workflow: settings.workflow_name.clone(),
                    branch: settings.branch.clone(),
                }))
            }
            Located::Found { workflow, run } => (workflow, run),
        };
        let sha = run.head_sha.clone();
        info!(sha = %sha, run_id = run.run_id, workflow = %workflow.name, "failed run found");

        let recorded = if self.dry_run {
            self.ledger.peek(&sha)
        } else {
            self.ledger.record(&sha)?
        };
        let attempt = match recorded {
            RecordOutcome::CeilingReached(attempts) => {
                return Ok(finish(Outcome::CeilingReached { sha, attempts }))
            }
            RecordOutcome::Recorded(attempt) => attempt,
        };
        info!(
            sha = %sha,
            attempt,
            ceiling = self.ledger.ceiling(),
            dry_run = self.dry_run,
            "self-heal attempt started"
        );

        let evidence = evidence::collect(&self.source, &run, settings.evidence_window)
            .await
            .inspect_err(|err| error!(sha = %sha, error = %format!("{:#}", err), "evidence collection failed"))?;
        info!(
            chars = evidence.as_str().chars().count(),
            truncated = evidence.was_truncated(),
            "evidence collected"
        );

        let request = RemediationRequest {
            repository: self.repository.clone(),
            branch: settings.branch.clone(),
            pipeline_path: workflow.path.clone(),
            evidence,
            verification_commands: settings.verification_commands.clone(),
        };
        let Some(patch) = remediation::request_patch(&self.generator, &request)
            .await
            .inspect_err(|err| error!(sha = %sha, error = %format!("{:#}", err), "remediation failed"))?
        else {
            return Ok(finish(Outcome::NoUsablePatch { sha, attempt }));
        };

        if self.dry_run {
            let patch_file = self.applier.stage_patch(&patch)?;
            return Ok(finish(Outcome::PatchStaged {
                sha,
                attempt,
                patch_file,
            }));
        }

        let applied = self.applier.apply(&patch).map_err(|err| {
            error!(
                sha = %sha,
                stage = %err.stage,
                tree = %err.tree,
                error = %format!("{:#}", err.cause),
                "self-heal failed"
            );
            anyhow::Error::new(err)
        })?;

        Ok(finish(Outcome::Healed {
            sha,
            attempt,
            commit: applied.commit,
        }))
    }
}

fn finish(outcome: Outcome) -> Outcome {
    info!(no_op = outcome.is_no_op(), "{}", outcome.reason());
    outcome
}
