//! JSON-over-HTTP transport shared by the embedding clients.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::ModelNotFound;

/// One inference endpoint plus its retry budget.
#[derive(Clone)]
pub(crate) struct JsonEndpoint {
    client: Client,
    url: String,
    provider: &'static str,
    max_attempts: usize,
}

impl JsonEndpoint {
    /// `headers` carries the provider's auth header; the JSON content type is added here.
    pub(crate) fn new(
        provider: &'static str,
        url: String,
        mut headers: HeaderMap,
        timeout: Duration,
        max_attempts: usize,
    ) -> Result<Self> {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .with_context(|| format!("failed to build {provider} HTTP client"))?;
        Ok(Self {
            client,
            url,
            provider,
            max_attempts: max_attempts.max(1),
        })
    }

    /// Posts `body` and decodes the reply, retrying throttling, 5xx and transport errors.
    ///
    /// A 404 (or an OpenAI `model_not_found` body) becomes [`ModelNotFound`] so the resolver
    /// moves on to the next candidate instead of retrying.
    pub(crate) fn post<B, R>(&self, model: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let retry = match self.client.post(&self.url).json(body).send() {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json()
                        .with_context(|| format!("failed to parse {} response", self.provider));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let detail = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if status == StatusCode::NOT_FOUND || detail.contains("model_not_found") {
                        return Err(ModelNotFound::new(model, detail).into());
                    }
                    if !retryable_status(status) || attempt >= self.max_attempts {
                        anyhow::bail!(
                            "{} embeddings request failed ({status}): {detail}",
                            self.provider
                        );
                    }
                    status.to_string()
                }
                Err(err) => {
                    let transient =
                        err.is_timeout() || err.is_connect() || err.is_body() || err.is_request();
                    if !transient || attempt >= self.max_attempts {
                        return Err(err).with_context(|| {
                            format!("{} embeddings request failed", self.provider)
                        });
                    }
                    err.to_string()
                }
            };
            warn!(provider = self.provider, model, attempt, reason = %retry, "retrying embeddings request");
            thread::sleep(backoff(attempt));
        }
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Exponential backoff starting at one second, capped at 16 seconds.
fn backoff(attempt: usize) -> Duration {
    Duration::from_millis(500 << attempt.clamp(1, 5))
}
