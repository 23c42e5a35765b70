//! Configuration management for selfheal
//!
//! Policy settings live in an optional `.selfheal.toml` at the repository
//! root. Credentials only ever come from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings file looked up at the repository root when `--config` is not given
pub const SETTINGS_FILE: &str = ".selfheal.toml";

pub const GITHUB_TOKEN_VAR: &str = "GITHUB_TOKEN";
pub const REMEDIATION_KEY_VAR: &str = "OPENAI_API_KEY";
pub const REPOSITORY_VAR: &str = "GITHUB_REPOSITORY";

// ============================================================================
// Credentials
// ============================================================================

/// Secrets and identity needed to talk to the collaborators.
#[derive(Clone)]
pub struct Credentials {
    pub github_token: String,
    pub remediation_api_key: String,
    /// Full repository name, `owner/repo`
    pub repository: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("github_token", &"<redacted>")
            .field("remediation_api_key", &"<redacted>")
            .field("repository", &self.repository)
            .finish()
    }
}

impl Credentials {
    /// Resolve credentials from the process environment.
    ///
    /// On failure returns the names of every missing variable.
    pub fn from_env() -> std::result::Result<Self, Vec<&'static str>> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve credentials through an arbitrary lookup. Values are trimmed and
    /// empty values count as absent.
    pub fn from_lookup<F>(lookup: F) -> std::result::Result<Self, Vec<&'static str>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fetch = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let github_token = fetch(GITHUB_TOKEN_VAR);
        let remediation_api_key = fetch(REMEDIATION_KEY_VAR);
        let repository = fetch(REPOSITORY_VAR);

        match (github_token, remediation_api_key, repository) {
            (Some(github_token), Some(remediation_api_key), Some(repository)) => Ok(Self {
                github_token,
                remediation_api_key,
                repository,
            }),
            (token, key, repo) => {
                let mut missing = Vec::new();
                if token.is_none() {
                    missing.push(GITHUB_TOKEN_VAR);
                }
                if key.is_none() {
                    missing.push(REMEDIATION_KEY_VAR);
                }
                if repo.is_none() {
                    missing.push(REPOSITORY_VAR);
                }
                Err(missing)
            }
        }
    }
}

// ============================================================================
// Policy settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Branch whose failures are healed and where fixes are pushed
    pub branch: String,
    /// Display name of the workflow to watch
    pub workflow_name: String,
    /// Repair attempts allowed per failing commit
    pub max_attempts: u32,
    /// Characters of trailing log output sent as evidence
    pub evidence_window: usize,
    pub commit_message: String,
    /// Where the candidate patch is staged, relative to the repository root
    pub patch_file: PathBuf,
    /// Attempt ledger location, relative to the repository root
    pub state_file: PathBuf,
    pub remote: String,
    pub model: String,
    pub github_api_url: String,
    pub remediation_api_url: String,
    /// Checks the fix is expected to pass; rendered into the request
    pub verification_commands: Vec<String>,
    /// Revert an applied patch when staging or committing fails
    pub rollback_on_failure: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            branch: "dev".to_string(),
            workflow_name: ".NET 8.0 Desktop CI/CD".to_string(),
            max_attempts: 3,
            evidence_window: 15_000,
            commit_message: "fix: self-heal pipeline failure (automated)".to_string(),
            patch_file: PathBuf::from(".selfheal/fix.patch"),
            state_file: PathBuf::from(".selfheal/state.json"),
            remote: "origin".to_string(),
            model: "gpt-4o".to_string(),
            github_api_url: "https://api.github.com".to_string(),
            remediation_api_url: "https://api.openai.com/v1".to_string(),
            verification_commands: vec![
                "dotnet build".to_string(),
                "dotnet test".to_string(),
                "dotnet format --verify-no-changes".to_string(),
            ],
            rollback_on_failure: false,
        }
    }
}

impl Settings {
    /// Load settings for a repository.
    ///
    /// An explicit path must exist. Without one, `.selfheal.toml` at the
    /// repository root is used when present, defaults otherwise.
    pub fn load(repo_root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let candidate = repo_root.join(SETTINGS_FILE);
                if !candidate.exists() {
                    return Ok(Self::default());
                }
                candidate
            }
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings = Self::parse(&content)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        if self.evidence_window == 0 {
            anyhow::bail!("evidence_window must be at least 1");
        }
        for (field, value) in [
            ("branch", &self.branch),
            ("workflow_name", &self.workflow_name),
            ("commit_message", &self.commit_message),
            ("remote", &self.remote),
            ("model", &self.model),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{} must not be empty", field);
            }
        }
        for (field, value) in [
            ("github_api_url", &self.github_api_url),
            ("remediation_api_url", &self.remediation_api_url),
        ] {
            url::Url::parse(value).with_context(|| format!("{} is not a valid URL", field))?;
        }
        Ok(())
    }
}
