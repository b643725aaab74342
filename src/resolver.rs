//! Ordered-candidate model resolution with a process-lifetime cache.
//!
//! Every candidate is tried in priority order. "Not found" answers and any other failure are both
//! soft: the next candidate is tried and the error is remembered. The first success wins; if all
//! candidates fail the caller receives the full attempt history plus the last error.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::embedder::EmbeddingProvider;
use crate::error::{ModelNotFound, RagError};
use crate::generation::GenerationProvider;

/// What happened when one candidate was tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The candidate answered and was selected.
    Succeeded,
    /// The provider reported the model as unknown.
    NotFound(String),
    /// Any other failure.
    Failed(String),
}

/// One entry of the resolution history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Candidate model identifier.
    pub model: String,
    /// Result of trying it.
    pub outcome: AttemptOutcome,
}

/// Every candidate failed.
#[derive(Debug, Clone, Error)]
#[error(
    "could not resolve any {capability} model (tried: [{}]); last error: {}",
    tried_models(.attempts),
    .last_error.as_deref().unwrap_or("no candidates configured")
)]
pub struct ResolutionError {
    /// Capability being resolved (`embedding`, `generation`).
    pub capability: &'static str,
    /// Attempts in the order they were made.
    pub attempts: Vec<Attempt>,
    /// Last underlying error message.
    pub last_error: Option<String>,
}

fn tried_models(attempts: &[Attempt]) -> String {
    attempts
        .iter()
        .map(|a| a.model.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Outcome of [`resolve_candidates`].
pub enum Resolution<T> {
    /// A candidate succeeded.
    Resolved {
        /// Handle produced by the winning candidate.
        handle: T,
        /// Winning model identifier.
        model: String,
        /// Full attempt history, ending with the success.
        attempts: Vec<Attempt>,
    },
    /// No candidate succeeded.
    Failed(ResolutionError),
}

impl<T> Resolution<T> {
    /// Converts into a plain result, dropping the success-side history.
    pub fn into_result(self) -> Result<(T, String), ResolutionError> {
        match self {
            Resolution::Resolved { handle, model, .. } => Ok((handle, model)),
            Resolution::Failed(err) => Err(err),
        }
    }
}

/// Tries `candidates` in order with `factory`, stopping at the first success.
pub fn resolve_candidates<T, F>(
    capability: &'static str,
    candidates: &[String],
    mut factory: F,
) -> Resolution<T>
where
    F: FnMut(&str) -> Result<T>,
{
    let mut attempts = Vec::with_capacity(candidates.len());
    let mut last_error = None;
    for model in candidates {
        match factory(model) {
            Ok(handle) => {
                attempts.push(Attempt {
                    model: model.clone(),
                    outcome: AttemptOutcome::Succeeded,
                });
                return Resolution::Resolved {
                    handle,
                    model: model.clone(),
                    attempts,
                };
            }
            Err(err) => {
                let message = format!("{err:#}");
                let outcome = if is_not_found(&err) {
                    debug!(capability, candidate = %model, "model not found");
                    AttemptOutcome::NotFound(message.clone())
                } else {
                    debug!(capability, candidate = %model, error = %message, "model failed to load");
                    AttemptOutcome::Failed(message.clone())
                };
                attempts.push(Attempt {
                    model: model.clone(),
                    outcome,
                });
                last_error = Some(message);
            }
        }
    }
    Resolution::Failed(ResolutionError {
        capability,
        attempts,
        last_error,
    })
}

fn is_not_found(err: &anyhow::Error) -> bool {
    if err.downcast_ref::<ModelNotFound>().is_some() {
        return true;
    }
    let message = format!("{err:#}").to_lowercase();
    message.contains("404") || message.contains("not found")
}

type Factory<T> = Box<dyn Fn(&str) -> Result<Arc<T>> + Send + Sync>;

struct ResolvedHandle<T: ?Sized> {
    handle: Arc<T>,
    model: String,
}

/// Resolves a capability once and shares the handle for the rest of the process.
///
/// Concurrent first callers queue on the mutex, so only one resolution runs at a time.
/// Failures are not cached; the next caller resolves again.
pub struct Resolver<T: ?Sized> {
    capability: &'static str,
    candidates: Vec<String>,
    factory: Factory<T>,
    resolved: Mutex<Option<ResolvedHandle<T>>>,
}

impl<T: ?Sized> Resolver<T> {
    /// Builds a resolver over `candidates` (highest priority first).
    pub fn new<F>(capability: &'static str, candidates: Vec<String>, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            capability,
            candidates,
            factory: Box::new(factory),
            resolved: Mutex::new(None),
        }
    }

    /// Candidate list in priority order.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Model selected by a previous successful resolution.
    pub fn resolved_model(&self) -> Option<String> {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.model.clone())
    }

    /// Returns the cached handle, resolving it first if needed.
    pub fn get(&self) -> Result<Arc<T>, ResolutionError> {
        let mut guard = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(resolved) = guard.as_ref() {
            return Ok(resolved.handle.clone());
        }
        match resolve_candidates(self.capability, &self.candidates, |model| {
            (self.factory)(model)
        }) {
            Resolution::Resolved {
                handle,
                model,
                attempts,
            } => {
                info!(
                    capability = self.capability,
                    model = %model,
                    attempts = attempts.len(),
                    "resolved model"
                );
                *guard = Some(ResolvedHandle {
                    handle: handle.clone(),
                    model,
                });
                Ok(handle)
            }
            Resolution::Failed(err) => {
                warn!(capability = self.capability, error = %err, "model resolution failed");
                Err(err)
            }
        }
    }
}

/// Embedding provider backed by a lazily resolved candidate list.
pub struct ResolvingEmbedder {
    label: String,
    resolver: Resolver<dyn EmbeddingProvider>,
}

impl ResolvingEmbedder {
    /// Wraps a resolver.
    pub fn new(resolver: Resolver<dyn EmbeddingProvider>) -> Self {
        let label = resolver.candidates().join("|");
        Self { label, resolver }
    }

    /// Access to the underlying resolver (eager warm-up, health output).
    pub fn resolver(&self) -> &Resolver<dyn EmbeddingProvider> {
        &self.resolver
    }
}

impl EmbeddingProvider for ResolvingEmbedder {
    fn name(&self) -> &str {
        &self.label
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let provider = self
            .resolver
            .get()
            .map_err(RagError::EmbeddingUnavailable)?;
        provider.embed(texts)
    }
}

/// Generation provider backed by a lazily resolved candidate list.
pub struct ResolvingGenerator {
    label: String,
    resolver: Resolver<dyn GenerationProvider>,
}

impl ResolvingGenerator {
    /// Wraps a resolver.
    pub fn new(resolver: Resolver<dyn GenerationProvider>) -> Self {
        let label = resolver.candidates().join("|");
        Self { label, resolver }
    }

    /// Access to the underlying resolver.
    pub fn resolver(&self) -> &Resolver<dyn GenerationProvider> {
        &self.resolver
    }
}

impl GenerationProvider for ResolvingGenerator {
    fn name(&self) -> &str {
        &self.label
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let provider = self.resolver.get()?;
        provider.generate(prompt)
    }
}
