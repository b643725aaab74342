use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{GenerationProvider, GenerationSettings};
use crate::error::ModelNotFound;

/// OpenAI-compatible chat completions client.
pub struct OpenAiProvider {
    base_url: String,
    model: String,
    settings: GenerationSettings,
    client: Client,
}

impl OpenAiProvider {
    /// Builds a chat client for `model` rooted at `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: String,
        settings: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            settings,
            client,
        })
    }

    /// Checks that the model is served by the API.
    pub fn probe(&self) -> Result<()> {
        let url = format!("{}/models/{}", self.base_url, self.model);
        let resp = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("failed to call {url}"))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        if status == StatusCode::NOT_FOUND {
            return Err(ModelNotFound::new(&self.model, text).into());
        }
        bail!("OpenAI model lookup returned {}: {}", status, text);
    }
}

impl GenerationProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            max_tokens: self.settings.max_output_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .context("failed to call OpenAI chat completions")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("OpenAI returned {}: {}", status, text);
        }
        let parsed: ChatResponse = resp.json().context("failed to parse OpenAI response")?;
        parsed.into_text()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    top_p: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl ChatResponse {
    fn into_text(self) -> Result<String> {
        let answer = self
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        if answer.trim().is_empty() {
            bail!("OpenAI response missing message content");
        }
        Ok(answer)
    }
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}
