//! Embedding provider contract plus the concrete HTTP clients.

mod http;
pub mod openai;
pub mod qdrant;

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use lru::LruCache;

/// Maps texts to fixed-dimension vectors, one per input, preserving order.
pub trait EmbeddingProvider: Send + Sync {
    /// Label used in logs (usually the resolved model name).
    fn name(&self) -> &str;

    /// Embeds every input text.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(texts)
    }
}

/// Embeds a single text; the provider must answer with exactly one vector.
pub fn embed_one(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let vectors = provider.embed(&[text])?;
    let [vector]: [Vec<f32>; 1] = vectors.try_into().map_err(|vectors: Vec<Vec<f32>>| {
        anyhow!(
            "{} returned {} embeddings for one input",
            provider.name(),
            vectors.len()
        )
    })?;
    Ok(vector)
}

/// Confirms a freshly built client answers, returning its vector dimension.
pub fn probe_dimensions(provider: &dyn EmbeddingProvider) -> Result<usize> {
    let dims = embed_one(provider, "ping")?.len();
    anyhow::ensure!(dims > 0, "model {} returned an empty probe vector", provider.name());
    Ok(dims)
}

/// Splits `inputs` into batches of at most `batch_size` and concatenates the results.
pub(crate) fn embed_in_batches<F>(
    inputs: &[&str],
    batch_size: usize,
    mut embed_batch: F,
) -> Result<Vec<Vec<f32>>>
where
    F: FnMut(&[&str]) -> Result<Vec<Vec<f32>>>,
{
    let mut out = Vec::with_capacity(inputs.len());
    for batch in inputs.chunks(batch_size.max(1)) {
        out.extend(embed_batch(batch)?);
    }
    anyhow::ensure!(
        out.len() == inputs.len(),
        "embedding count {} mismatched inputs {}",
        out.len(),
        inputs.len()
    );
    Ok(out)
}

/// Query-embedding cache in front of another provider.
///
/// Only single-text requests are cached; batch requests pass straight through.
pub struct CachingEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachingEmbedder {
    /// Wraps `inner` with an LRU cache; `None` when `capacity` is zero.
    pub fn wrap(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Arc<dyn EmbeddingProvider> {
        match NonZeroUsize::new(capacity) {
            Some(capacity) => Arc::new(Self {
                inner,
                cache: Mutex::new(LruCache::new(capacity)),
            }),
            None => inner,
        }
    }
}

impl EmbeddingProvider for CachingEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let [text] = texts else {
            return self.inner.embed(texts);
        };
        let hit = {
            let mut guard = self
                .cache
                .lock()
                .map_err(|_| anyhow!("embedding cache lock poisoned"))?;
            guard.get(*text).cloned()
        };
        if let Some(hit) = hit {
            return Ok(vec![hit]);
        }
        let embedding = embed_one(self.inner.as_ref(), text)?;
        self.cache
            .lock()
            .map_err(|_| anyhow!("embedding cache lock poisoned"))?
            .put(text.to_string(), embedding.clone());
        Ok(vec![embedding])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for CountingEmbedder {
        fn name(&self) -> &str {
            "counting"
        }

        fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    #[test]
    fn cache_serves_repeated_queries() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachingEmbedder::wrap(inner.clone(), 8);

        let first = embed_one(cached.as_ref(), "what is a module?").expect("embed");
        let second = embed_one(cached.as_ref(), "what is a module?").expect("embed");

        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachingEmbedder::wrap(inner.clone(), 0);

        embed_one(cached.as_ref(), "q").expect("embed");
        embed_one(cached.as_ref(), "q").expect("embed");

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    struct Answering(Vec<Vec<f32>>);

    impl EmbeddingProvider for Answering {
        fn name(&self) -> &str {
            "answering"
        }

        fn embed(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn single_embedding_requires_exactly_one_vector() {
        let one = Answering(vec![vec![0.5, 0.5]]);
        assert_eq!(embed_one(&one, "q").expect("one"), vec![0.5, 0.5]);

        let two = Answering(vec![vec![1.0], vec![2.0]]);
        let err = embed_one(&two, "q").expect_err("two vectors");
        assert_eq!(err.to_string(), "answering returned 2 embeddings for one input");

        let none = Answering(Vec::new());
        assert!(embed_one(&none, "q").is_err());
    }

    #[test]
    fn dimension_check_rejects_empty_vectors() {
        assert_eq!(probe_dimensions(&Answering(vec![vec![0.0; 3]])).expect("dims"), 3);
        assert!(probe_dimensions(&Answering(vec![Vec::new()])).is_err());
    }

    #[test]
    fn batches_preserve_order() {
        let inputs = ["a", "bb", "ccc", "dddd", "eeeee"];
        let mut batch_sizes = Vec::new();

        let out = embed_in_batches(&inputs, 2, |batch| {
            batch_sizes.push(batch.len());
            Ok(batch.iter().map(|t| vec![t.len() as f32]).collect())
        })
        .expect("embed");

        assert_eq!(batch_sizes, vec![2, 2, 1]);
        assert_eq!(out, vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0], vec![5.0]]);
    }
}
