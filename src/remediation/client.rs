use super::PatchGenerator;
use crate::github::sanitize_error_body;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Chat-completions client for the remediation service.
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    n: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    /// Null when the model refuses or returns tool calls only
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_base: &str, api_key: &str, model: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
            n: 1,
        }
    }
}

impl PatchGenerator for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(prompt))
            .send()
            .await
            .context("Failed to reach the remediation service")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read remediation response")?;

        if !status.is_success() {
            let msg = match status.as_u16() {
                401 => "Invalid remediation API key.".to_string(),
                429 => "Rate limited by the remediation service.".to_string(),
                500..=599 => format!(
                    "Remediation service error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, sanitize_error_body(&text)),
            };
            return Err(anyhow::anyhow!("{}", msg));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Failed to parse remediation response: {}", e))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}
