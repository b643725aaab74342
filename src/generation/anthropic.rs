use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{GenerationProvider, GenerationSettings};
use crate::error::ModelNotFound;

const ANTHROPIC_API: &str = "https://api.anthropic.com/v1";

/// Anthropic messages API client.
pub struct AnthropicProvider {
    model: String,
    settings: GenerationSettings,
    client: Client,
}

impl AnthropicProvider {
    /// Builds a client for `model` against the public Anthropic API.
    pub fn new(
        api_key: &str,
        model: String,
        settings: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Anthropic API key");
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.trim()).context("invalid Anthropic API key")?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Anthropic HTTP client")?;
        Ok(Self {
            model,
            settings,
            client,
        })
    }

    /// Checks that the model is served by the API.
    pub fn probe(&self) -> Result<()> {
        let url = format!("{ANTHROPIC_API}/models/{}", self.model);
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
        bail!("Anthropic model lookup returned {}: {}", status, text);
    }
}

impl GenerationProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: self.settings.max_output_tokens,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            top_k: self.settings.top_k,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicContentBlock {
                    kind: "text",
                    text: prompt,
                }],
            }],
        };
        let resp = self
            .client
            .post(format!("{ANTHROPIC_API}/messages"))
            .json(&body)
            .send()
            .context("failed to call Anthropic messages API")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("Anthropic returned {}: {}", status, text);
        }
        let parsed: AnthropicResponse =
            resp.json().context("failed to parse Anthropic response")?;
        parsed.into_text()
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

impl AnthropicResponse {
    fn into_text(self) -> Result<String> {
        let answer = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(text),
                AnthropicResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if answer.is_empty() {
            bail!("Anthropic response missing text content");
        }
        Ok(answer)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
