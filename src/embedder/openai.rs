//! OpenAI-compatible `/embeddings` client.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};

use super::http::JsonEndpoint;
use super::{embed_in_batches, EmbeddingProvider};

/// Embeds text with one OpenAI model.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    endpoint: JsonEndpoint,
    model: String,
    dimensions: Option<usize>,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// Builds a client for `model` against `{base_url}/embeddings`.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing OpenAI model name");
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .context("invalid OpenAI API key")?,
        );
        let url = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            endpoint: JsonEndpoint::new("OpenAI", url, headers, timeout, max_retries)?,
            model,
            dimensions,
            batch_size: batch_size.max(1),
        })
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };
        let response: EmbeddingResponse = self.endpoint.post(&self.model, &request)?;
        response.into_ordered(inputs.len())
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        embed_in_batches(texts, self.batch_size, |batch| self.embed_batch(batch))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<IndexedEmbedding>,
}

#[derive(Debug, Deserialize)]
struct IndexedEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

impl EmbeddingResponse {
    // The API may answer out of order; `index` points back at the input.
    fn into_ordered(mut self, expected: usize) -> Result<Vec<Vec<f32>>> {
        anyhow::ensure!(
            self.data.len() == expected,
            "OpenAI returned {} embeddings for {expected} inputs",
            self.data.len()
        );
        self.data.sort_by_key(|entry| entry.index);
        Ok(self.data.into_iter().map(|entry| entry.embedding).collect())
    }
}
