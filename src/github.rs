//! GitHub Actions API integration
//!
//! Lists workflows and runs and downloads run logs over the REST API,
//! authenticated with a bearer token.

use crate::evidence::{LogPayload, LogSource};
use crate::locator::{FailingRun, FailingRunSource, Workflow, WorkflowRun};
use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::debug;

const USER_AGENT: &str = "selfheal";
const API_VERSION: &str = "2022-11-28";
const PER_PAGE: u32 = 100;

/// Maximum length for error body content in error messages
const MAX_ERROR_BODY_LEN: usize = 200;

/// Sanitize an API error body to prevent credential leakage.
/// Truncates long responses and redacts potential secrets.
pub(crate) fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "token",
        "secret",
        "password",
        "credential",
        "bearer",
        "ghp_",        // GitHub personal access token prefix
        "gho_",        // GitHub OAuth token prefix
        "ghs_",        // GitHub Actions installation token prefix
        "github_pat_", // GitHub PAT prefix
        "sk-",         // OpenAI key prefix
    ];

    let truncated = if body.chars().count() > MAX_ERROR_BODY_LEN {
        let head: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    };

    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(error details redacted - may contain sensitive data)".to_string();
        }
    }

    truncated
}

#[derive(Deserialize)]
struct WorkflowsPage {
    workflows: Vec<Workflow>,
}

#[derive(Deserialize)]
struct RunsPage {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
}

/// Client for one repository's Actions data.
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    repository: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_base: &str, repository: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            token: token.to_string(),
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let resp = self
            .request(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        let resp = ensure_success(resp).await?;
        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

/// Turn a non-success response into an error with a sanitized body.
async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&body) {
        return Err(anyhow::anyhow!(
            "GitHub API error ({}): {}",
            status,
            sanitize_error_body(&api_error.message)
        ));
    }
    Err(anyhow::anyhow!(
        "GitHub API error ({}): {}",
        status,
        sanitize_error_body(&body)
    ))
}

impl FailingRunSource for GitHubClient {
    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let url = format!(
            "{}/repos/{}/actions/workflows?per_page={}",
            self.api_base, self.repository, PER_PAGE
        );
        let page: WorkflowsPage = self.get_json(&url).await?;
        debug!(count = page.workflows.len(), "workflows listed");
        Ok(page.workflows)
    }

    async fn list_runs(&self, workflow: &Workflow, branch: &str) -> Result<Vec<WorkflowRun>> {
        let mut url = url::Url::parse(&format!(
            "{}/repos/{}/actions/workflows/{}/runs",
            self.api_base, self.repository, workflow.id
        ))
        .context("Invalid GitHub API URL")?;
        url.query_pairs_mut()
            .append_pair("branch", branch)
            .append_pair("per_page", &PER_PAGE.to_string());

        let page: RunsPage = self.get_json(url.as_str()).await?;
        Ok(page.workflow_runs)
    }
}

impl LogSource for GitHubClient {
    async fn fetch_logs(&self, run: &FailingRun) -> Result<LogPayload> {
        let resp = self
            .request(&run.logs_url)
            .send()
            .await
            .with_context(|| format!("Log download for run {} failed", run.run_id))?;
        let resp = ensure_success(resp).await?;

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp
            .bytes()
            .await
            .context("Failed to read log download body")?
            .to_vec();

        Ok(LogPayload {
            content_type,
            bytes,
        })
    }
}
