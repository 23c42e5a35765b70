//! Remediation requests
//!
//! Builds the repair request from the failure evidence, sends it to the
//! patch service, and screens the reply. A reply that is not a unified diff
//! is an ordinary outcome (`None`), not an error.

pub mod client;
pub mod prompt;

pub use client::OpenAiClient;

use crate::evidence::EvidenceBundle;
use anyhow::{Context, Result};
use tracing::{debug, info};

/// Marker every acceptable patch must contain.
pub const DIFF_HEADER_MARKER: &str = "diff --git";

/// Anything that can turn a prompt into candidate patch text.
#[allow(async_fn_in_trait)]
pub trait PatchGenerator {
    /// Primary text of the service's reply; empty when it produced nothing.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct RemediationRequest {
    pub repository: String,
    pub branch: String,
    pub pipeline_path: String,
    pub evidence: EvidenceBundle,
    /// Gates the fix should pass, quoted into the instructions
    pub verification_commands: Vec<String>,
}

impl RemediationRequest {
    pub fn to_prompt(&self) -> String {
        prompt::render(self)
    }
}

/// Candidate patch text that passed screening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchArtifact(String);

impl PatchArtifact {
    /// Trim `raw` and accept it only if it looks like a unified diff.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.contains(DIFF_HEADER_MARKER) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Ask `generator` for a patch. `Ok(None)` means no usable patch came back.
pub async fn request_patch<G: PatchGenerator>(
    generator: &G,
    request: &RemediationRequest,
) -> Result<Option<PatchArtifact>> {
    let prompt = request.to_prompt();
    debug!(prompt_chars = prompt.chars().count(), "requesting remediation");

    let raw = generator
        .generate(&prompt)
        .await
        .context("Remediation request failed")?;

    let artifact = PatchArtifact::parse(&raw);
    if artifact.is_none() {
        info!(response_chars = raw.chars().count(), "remediation reply is not a unified diff");
    }
    Ok(artifact)
}
