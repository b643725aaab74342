//! Error taxonomy shared by the answer pipeline.

use thiserror::Error;

use crate::resolver::ResolutionError;

/// Convenience alias for results carrying a [`RagError`].
pub type Result<T, E = RagError> = std::result::Result<T, E>;

/// Failures surfaced by the retrieval-augmented answer pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// No candidate embedding model could be resolved.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(#[source] ResolutionError),

    /// Embedding or vector-store failure. The retriever recovers from this locally.
    #[error("retrieval failed: {0}")]
    RetrievalFailure(String),

    /// The generation provider failed to produce an answer.
    #[error("generation failed: {0}")]
    GenerationFailure(String),

    /// A precondition on a core operation was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Embeddings of different dimensions were mixed inside one collection.
    #[error("embedding dimension mismatch for {id}: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Record identifier that carried the offending vector.
        id: String,
        /// Dimension already fixed by the collection.
        expected: usize,
        /// Dimension of the rejected vector.
        found: usize,
    },

    /// Vector-store backend failure outside the query path (loading, persisting).
    #[error("vector store error: {0}")]
    Store(String),

    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed JSON payload.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Raised by capability adapters when the remote API reports an unknown model.
///
/// The fallback resolver treats this as a soft "not found" outcome.
#[derive(Debug, Error)]
#[error("model {model} not found: {detail}")]
pub struct ModelNotFound {
    /// Requested model identifier.
    pub model: String,
    /// Response body or status line returned by the API.
    pub detail: String,
}

impl ModelNotFound {
    /// Builds a new not-found error.
    pub fn new(model: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            detail: detail.into(),
        }
    }
}
