//! Qdrant Cloud Inference embedding client.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use super::http::JsonEndpoint;
use super::{embed_in_batches, EmbeddingProvider};

/// Embeds text through a cluster's `/inference/text` endpoint.
#[derive(Clone)]
pub struct QdrantEmbedder {
    endpoint: JsonEndpoint,
    model: String,
    batch_size: usize,
}

impl QdrantEmbedder {
    /// `endpoint` is the full inference URL, e.g. `https://<cluster>.cloud.qdrant.io/inference/text`.
    pub fn new(
        api_key: &str,
        endpoint: &str,
        model: String,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Qdrant API key");
        anyhow::ensure!(
            endpoint.starts_with("http://") || endpoint.starts_with("https://"),
            "Qdrant endpoint must be an http(s) URL"
        );
        anyhow::ensure!(!model.trim().is_empty(), "missing Qdrant model name");
        let mut headers = HeaderMap::new();
        headers.insert(
            "api-key",
            HeaderValue::from_str(api_key.trim()).context("invalid Qdrant API key")?,
        );
        let url = endpoint.trim_end_matches('/').to_string();
        Ok(Self {
            endpoint: JsonEndpoint::new("Qdrant", url, headers, timeout, max_retries)?,
            model,
            batch_size: batch_size.max(1),
        })
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let request = InferenceRequest {
            model: &self.model,
            input: inputs,
        };
        let response: InferenceResponse = self.endpoint.post(&self.model, &request)?;
        response.into_embeddings(inputs.len())
    }
}

impl EmbeddingProvider for QdrantEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        embed_in_batches(texts, self.batch_size, |batch| self.embed_batch(batch))
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

/// Clusters answer either with indexed `data` entries or a flat `embeddings` list.
#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    data: Vec<InferenceData>,
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct InferenceData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl InferenceResponse {
    fn into_embeddings(self, expected: usize) -> Result<Vec<Vec<f32>>> {
        let vectors = if !self.data.is_empty() {
            let mut data = self.data;
            data.sort_by_key(|d| d.index.unwrap_or(0));
            data.into_iter().map(|d| d.embedding).collect::<Vec<_>>()
        } else if !self.embeddings.is_empty() {
            self.embeddings
        } else {
            return Err(anyhow!("Qdrant response missing embedding payloads"));
        };
        anyhow::ensure!(
            vectors.len() == expected,
            "Qdrant returned {} embeddings for {expected} inputs",
            vectors.len()
        );
        Ok(vectors)
    }
}
