//! Query embedding, nearest-neighbor lookup and hit normalization.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::embedder::{embed_one, EmbeddingProvider};
use crate::error::RagError;
use crate::records::{filename_from_path, split_chunk_key, RetrievedContext};
use crate::text_cache::ChunkTextCache;
use crate::vector_store::{DistanceMetric, VectorHit, VectorStore};

/// Default number of chunks retrieved per question.
pub const DEFAULT_TOP_K: usize = 5;
/// Largest accepted `top_k`.
pub const MAX_TOP_K: usize = 20;

/// Result of one retrieval attempt, keeping the failure reason around for logging.
#[derive(Debug)]
pub enum RetrievalOutcome {
    /// Hits in ascending distance order, possibly empty.
    Found(Vec<RetrievedContext>),
    /// Retrieval failed. Holds `EmbeddingUnavailable` or `RetrievalFailure`.
    Unavailable(RagError),
}

impl RetrievalOutcome {
    /// Collapses the outcome into the public best-effort contract.
    pub fn into_contexts(self) -> Vec<RetrievedContext> {
        match self {
            Self::Found(contexts) => contexts,
            Self::Unavailable(reason) => {
                warn!(error = %reason, "retrieval unavailable; continuing without context");
                Vec::new()
            }
        }
    }
}

/// Embeds questions and fetches their nearest chunks.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    text_cache: Option<Arc<ChunkTextCache>>,
}

impl Retriever {
    /// Builds a retriever over already-constructed capability handles.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            text_cache: None,
        }
    }

    /// Serves chunk text from `cache` when the store does not return it.
    pub fn with_text_cache(mut self, cache: Arc<ChunkTextCache>) -> Self {
        self.text_cache = Some(cache);
        self
    }

    /// Metric of the underlying store.
    pub fn metric(&self) -> DistanceMetric {
        self.store.metric()
    }

    /// Vector store handle, for health reporting.
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Returns up to `top_k` chunks nearest to `query`, or nothing when retrieval fails.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Vec<RetrievedContext> {
        self.retrieve_outcome(query, top_k).into_contexts()
    }

    /// Like [`Retriever::retrieve`] but reports why retrieval failed.
    ///
    /// `top_k` is clamped to `1..=MAX_TOP_K`.
    pub fn retrieve_outcome(&self, query: &str, top_k: usize) -> RetrievalOutcome {
        let top_k = top_k.clamp(1, MAX_TOP_K);
        let embedding = match embed_one(self.embedder.as_ref(), query) {
            Ok(embedding) => embedding,
            Err(err) => return RetrievalOutcome::Unavailable(classify_embedding_error(err)),
        };
        let hits = match self.store.query(&embedding, top_k) {
            Ok(hits) => hits,
            Err(err) => {
                return RetrievalOutcome::Unavailable(RagError::RetrievalFailure(format!(
                    "{} query failed: {err:#}",
                    self.store.describe()
                )))
            }
        };

        let mut contexts: Vec<RetrievedContext> = hits
            .into_iter()
            .take(top_k)
            .map(|hit| normalize_hit(hit, self.text_cache.as_deref()))
            .collect();
        contexts.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        debug!(top_k, chunks = contexts.len(), "retrieved context");
        RetrievalOutcome::Found(contexts)
    }
}

fn classify_embedding_error(err: anyhow::Error) -> RagError {
    match err.downcast::<RagError>() {
        Ok(RagError::EmbeddingUnavailable(reason)) => RagError::EmbeddingUnavailable(reason),
        Ok(other) => RagError::RetrievalFailure(other.to_string()),
        Err(err) => RagError::RetrievalFailure(format!("query embedding failed: {err:#}")),
    }
}

/// Converts a raw store hit into a [`RetrievedContext`].
///
/// Metadata wins over values parsed from the id. Missing text is looked up in `cache` and
/// replaced by a placeholder naming the chunk when absent there too.
pub fn normalize_hit(hit: VectorHit, cache: Option<&ChunkTextCache>) -> RetrievedContext {
    let (id_path, id_index) = split_chunk_key(&hit.id);
    let file_path = metadata_value(&hit, "file_path").unwrap_or(id_path).to_string();
    let chunk_index = metadata_value(&hit, "chunk_index")
        .unwrap_or(id_index)
        .to_string();
    let filename = metadata_value(&hit, "filename")
        .map(str::to_string)
        .unwrap_or_else(|| filename_from_path(&file_path));

    let text = match hit.text {
        Some(text) => text,
        None => match cache.and_then(|cache| cache.get(&hit.id)) {
            Some(text) => text.to_string(),
            None => missing_text_placeholder(&chunk_index, &filename),
        },
    };

    RetrievedContext {
        text,
        file_path,
        filename,
        chunk_index,
        id: hit.id,
        distance: hit.distance.max(0.0),
    }
}

fn metadata_value<'a>(hit: &'a VectorHit, key: &str) -> Option<&'a str> {
    hit.metadata
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn missing_text_placeholder(chunk_index: &str, filename: &str) -> String {
    format!("[Chunk {chunk_index} from {filename} is not available in the text cache]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ResolutionError, Resolver, ResolvingEmbedder};
    use anyhow::{anyhow, Result};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct FixedEmbedder;

    impl EmbeddingProvider for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed"
        }

        fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct ScriptedStore {
        hits: Mutex<Option<Result<Vec<VectorHit>>>>,
        requested_k: Mutex<Option<usize>>,
    }

    impl ScriptedStore {
        fn new(hits: Result<Vec<VectorHit>>) -> Arc<Self> {
            Arc::new(Self {
                hits: Mutex::new(Some(hits)),
                requested_k: Mutex::new(None),
            })
        }
    }

    impl VectorStore for ScriptedStore {
        fn query(&self, _embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
            *self.requested_k.lock().expect("lock") = Some(k);
            self.hits
                .lock()
                .expect("lock")
                .take()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        fn count(&self) -> Result<usize> {
            Ok(0)
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn metric(&self) -> DistanceMetric {
            DistanceMetric::Cosine
        }
    }

    fn bare_hit(id: &str, distance: f64) -> VectorHit {
        VectorHit {
            id: id.to_string(),
            text: None,
            metadata: BTreeMap::new(),
            distance,
        }
    }

    #[test]
    fn normalizes_id_without_metadata() {
        let context = normalize_hit(bare_hit("docs/a.md:3", 0.1), None);

        assert_eq!(context.file_path, "docs/a.md");
        assert_eq!(context.chunk_index, "3");
        assert_eq!(context.filename, "a.md");
        assert_eq!(context.id, "docs/a.md:3");
        assert_eq!(
            context.text,
            "[Chunk 3 from a.md is not available in the text cache]"
        );
    }

    #[test]
    fn metadata_overrides_id_parsing() {
        let mut hit = bare_hit("ignored:9", 0.2);
        hit.text = Some("body".to_string());
        hit.metadata
            .insert("file_path".to_string(), "modules\\core\\README.md".to_string());
        hit.metadata
            .insert("chunk_index".to_string(), "4".to_string());

        let context = normalize_hit(hit, None);

        assert_eq!(context.file_path, "modules\\core\\README.md");
        assert_eq!(context.filename, "README.md");
        assert_eq!(context.chunk_index, "4");
        assert_eq!(context.text, "body");
    }

    #[test]
    fn id_without_separator_has_empty_path() {
        let context = normalize_hit(bare_hit("orphan", 0.0), None);
        assert_eq!(context.file_path, "");
        assert_eq!(context.filename, "");
    }

    #[test]
    fn detached_hits_read_text_cache() {
        let cache = ChunkTextCache::parse(
            r#"[{"text":"cached body","metadata":{"file_path":"docs/a.md","chunk_index":3}}]"#,
        )
        .expect("cache");

        let context = normalize_hit(bare_hit("docs/a.md:3", 0.1), Some(&cache));

        assert_eq!(context.text, "cached body");
    }

    #[test]
    fn retrieve_returns_sorted_contexts_and_clamps_k() {
        let store = ScriptedStore::new(Ok(vec![
            bare_hit("b.md:0", 0.4),
            bare_hit("a.md:0", 0.2),
        ]));
        let retriever = Retriever::new(Arc::new(FixedEmbedder), store.clone());

        let contexts = retriever.retrieve("how do modules load?", 50);

        let ids: Vec<&str> = contexts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a.md:0", "b.md:0"]);
        assert_eq!(*store.requested_k.lock().expect("lock"), Some(MAX_TOP_K));
    }

    #[test]
    fn store_failure_degrades_to_empty() {
        let store = ScriptedStore::new(Err(anyhow!("connection refused")));
        let retriever = Retriever::new(Arc::new(FixedEmbedder), store);

        let outcome = retriever.retrieve_outcome("question", 5);
        assert!(matches!(
            outcome,
            RetrievalOutcome::Unavailable(RagError::RetrievalFailure(_))
        ));
        assert!(outcome.into_contexts().is_empty());
    }

    #[test]
    fn unresolvable_embedder_is_reported_as_unavailable() {
        let resolver: Resolver<dyn EmbeddingProvider> =
            Resolver::new("embedding", vec!["missing-model".to_string()], |model: &str| {
                Err(anyhow!("no such model {model}"))
            });
        let embedder = Arc::new(ResolvingEmbedder::new(resolver));
        let retriever = Retriever::new(embedder, ScriptedStore::new(Ok(Vec::new())));

        let outcome = retriever.retrieve_outcome("question", 5);

        match outcome {
            RetrievalOutcome::Unavailable(RagError::EmbeddingUnavailable(ResolutionError {
                attempts,
                ..
            })) => assert_eq!(attempts.len(), 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(retriever.retrieve("question", 5).is_empty());
    }
}
