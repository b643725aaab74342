//! Post-ingestion collection check.
//!
//! Counts the records, lists a few of them and queries the store with one record's own vector
//! (or its freshly re-embedded text). A healthy collection returns that record as the top hit.

use anyhow::Result;
use tracing::{debug, warn};

use crate::embedder::{embed_one, EmbeddingProvider};
use crate::records::{filename_from_path, split_chunk_key};
use crate::text_cache::ChunkTextCache;
use crate::vector_store::{StoredVector, VectorStore};

/// Characters of chunk text shown per sampled record.
pub const PREVIEW_CHARS: usize = 100;

/// Neighbors requested by the self-query.
pub const SELF_QUERY_K: usize = 3;

const TIE_EPSILON: f64 = 1e-9;

/// One listed record.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSummary {
    /// Record key.
    pub id: String,
    /// Display name of the source document.
    pub filename: String,
    /// Leading text of the chunk; `None` for detached records missing from the cache.
    pub preview: Option<String>,
}

/// Outcome of querying the store with a stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfQuery {
    /// Record used as the query.
    pub id: String,
    /// Whether the query vector came from re-embedding the record's text.
    pub reembedded: bool,
    /// Number of hits returned.
    pub returned: usize,
    /// Id of the closest hit.
    pub top_id: Option<String>,
    /// Hits strictly closer than the queried record; `None` when it was not returned.
    pub rank: Option<usize>,
}

impl SelfQuery {
    /// The queried record came back first (ties with identical vectors count as first).
    pub fn passed(&self) -> bool {
        self.rank == Some(0)
    }
}

/// Everything the validation learned about a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// Backend label.
    pub store: String,
    /// Indexed record count.
    pub count: usize,
    /// First records in backend order.
    pub samples: Vec<SampleSummary>,
    /// Self-query result; `None` for an empty collection.
    pub self_query: Option<SelfQuery>,
}

impl ValidationReport {
    /// Non-empty and the self-query found its own record first.
    pub fn is_healthy(&self) -> bool {
        self.count > 0 && self.self_query.as_ref().is_some_and(SelfQuery::passed)
    }
}

/// Validates `store`.
///
/// With an `embedder`, the first sample's text is re-embedded for the self-query, which also
/// proves the query-time model matches the one used at ingestion. Detached records take their
/// text from `text_cache`; without text the stored vector is used.
pub fn validate_collection(
    store: &dyn VectorStore,
    sample_size: usize,
    embedder: Option<&dyn EmbeddingProvider>,
    text_cache: Option<&ChunkTextCache>,
) -> Result<ValidationReport> {
    let count = store.count()?;
    let mut report = ValidationReport {
        store: store.describe(),
        count,
        samples: Vec::new(),
        self_query: None,
    };
    if count == 0 {
        warn!(store = %report.store, "collection is empty");
        return Ok(report);
    }

    let records = store.sample(sample_size.max(1))?;
    report.samples = records
        .iter()
        .map(|record| summarize(record, text_cache))
        .collect();
    let Some(first) = records.first() else {
        anyhow::bail!("{} reported {count} records but listed none", report.store);
    };

    let text = record_text(first, text_cache);
    let (query, reembedded) = match (embedder, text) {
        (Some(embedder), Some(text)) => (embed_one(embedder, text)?, true),
        (Some(_), None) => {
            warn!(id = %first.id, "no text to re-embed; querying with the stored vector");
            (first.embedding.clone(), false)
        }
        (None, _) => (first.embedding.clone(), false),
    };
    let hits = store.query(&query, SELF_QUERY_K.min(count))?;
    let rank = hits.iter().find(|hit| hit.id == first.id).map(|own| {
        hits.iter()
            .filter(|hit| hit.distance < own.distance - TIE_EPSILON)
            .count()
    });
    debug!(id = %first.id, returned = hits.len(), ?rank, "self-query finished");
    report.self_query = Some(SelfQuery {
        id: first.id.clone(),
        reembedded,
        returned: hits.len(),
        top_id: hits.first().map(|hit| hit.id.clone()),
        rank,
    });
    Ok(report)
}

fn record_text<'a>(
    record: &'a StoredVector,
    text_cache: Option<&'a ChunkTextCache>,
) -> Option<&'a str> {
    record
        .document
        .as_deref()
        .or_else(|| text_cache.and_then(|cache| cache.get(&record.id)))
}

fn summarize(record: &StoredVector, text_cache: Option<&ChunkTextCache>) -> SampleSummary {
    let filename = record
        .metadata
        .get("filename")
        .filter(|name| !name.is_empty())
        .cloned()
        .unwrap_or_else(|| {
            let path = record
                .metadata
                .get("file_path")
                .map(String::as_str)
                .unwrap_or_else(|| split_chunk_key(&record.id).0);
            filename_from_path(path)
        });
    SampleSummary {
        id: record.id.clone(),
        filename,
        preview: record_text(record, text_cache)
            .map(|text| text.chars().take(PREVIEW_CHARS).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::{DistanceMetric, LocalVectorStore, VectorHit};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn record(id: &str, embedding: Vec<f32>, document: Option<&str>) -> StoredVector {
        let (file_path, chunk_index) = split_chunk_key(id);
        let mut metadata = BTreeMap::new();
        metadata.insert("file_path".to_string(), file_path.to_string());
        metadata.insert("chunk_index".to_string(), chunk_index.to_string());
        StoredVector {
            id: id.to_string(),
            embedding,
            document: document.map(str::to_string),
            metadata,
        }
    }

    fn store(records: Vec<StoredVector>) -> LocalVectorStore {
        let mut store = LocalVectorStore::create("unused.json", "docs", DistanceMetric::Cosine);
        store.upsert(records).expect("upsert");
        store
    }

    /// Embeds by keyword so tests control which record a text lands near.
    struct KeywordEmbedder;

    impl EmbeddingProvider for KeywordEmbedder {
        fn name(&self) -> &str {
            "keyword"
        }

        fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    if text.contains("modules") {
                        vec![1.0, 0.0, 0.0]
                    } else {
                        vec![0.0, 1.0, 0.0]
                    }
                })
                .collect())
        }
    }

    #[test]
    fn stored_vector_finds_itself_first() {
        let long = "x".repeat(250);
        let store = store(vec![
            record("docs/modules.md:0", vec![1.0, 0.0, 0.0], Some(&long)),
            record("docs/blocks.md:0", vec![0.0, 1.0, 0.0], Some("Blocks are cubes.")),
            record("docs/world.md:3", vec![0.0, 0.0, 1.0], None),
        ]);

        let report = validate_collection(&store, 2, None, None).expect("validate");

        assert_eq!(report.count, 3);
        assert_eq!(report.samples.len(), 2);
        assert_eq!(report.samples[0].filename, "modules.md");
        assert_eq!(
            report.samples[0].preview.as_deref().map(str::len),
            Some(PREVIEW_CHARS)
        );
        let self_query = report.self_query.clone().expect("self query");
        assert_eq!(self_query.id, "docs/modules.md:0");
        assert_eq!(self_query.returned, 3);
        assert_eq!(self_query.top_id.as_deref(), Some("docs/modules.md:0"));
        assert!(!self_query.reembedded);
        assert!(report.is_healthy());
    }

    #[test]
    fn empty_collection_is_not_healthy() {
        let report = validate_collection(&store(Vec::new()), 3, None, None).expect("validate");

        assert_eq!(report.count, 0);
        assert!(report.samples.is_empty());
        assert_eq!(report.self_query, None);
        assert!(!report.is_healthy());
    }

    #[test]
    fn reembedded_text_must_land_on_its_record() {
        let healthy = store(vec![
            record("docs/modules.md:0", vec![1.0, 0.0, 0.0], Some("All about modules.")),
            record("docs/blocks.md:0", vec![0.0, 1.0, 0.0], Some("Blocks are cubes.")),
        ]);
        let report =
            validate_collection(&healthy, 1, Some(&KeywordEmbedder), None).expect("validate");
        let self_query = report.self_query.clone().expect("self query");
        assert!(self_query.reembedded);
        assert!(report.is_healthy());

        // Text that the query model places near another record.
        let drifted = store(vec![
            record("docs/modules.md:0", vec![1.0, 0.0, 0.0], Some("Blocks and cubes.")),
            record("docs/blocks.md:0", vec![0.0, 1.0, 0.0], Some("Blocks are cubes.")),
        ]);
        let report =
            validate_collection(&drifted, 1, Some(&KeywordEmbedder), None).expect("validate");
        let self_query = report.self_query.clone().expect("self query");
        assert_eq!(self_query.top_id.as_deref(), Some("docs/blocks.md:0"));
        assert_eq!(self_query.rank, Some(1));
        assert!(!report.is_healthy());
    }

    #[test]
    fn detached_records_read_text_from_cache() {
        let cache = ChunkTextCache::parse(
            r#"[{"text":"Cached modules text.","metadata":{"file_path":"docs/modules.md","chunk_index":0}}]"#,
        )
        .expect("cache");
        let store = store(vec![
            record("docs/modules.md:0", vec![1.0, 0.0, 0.0], None),
            record("docs/blocks.md:0", vec![0.0, 1.0, 0.0], None),
        ]);

        let report = validate_collection(&store, 2, Some(&KeywordEmbedder), Some(&cache))
            .expect("validate");

        assert_eq!(
            report.samples[0].preview.as_deref(),
            Some("Cached modules text.")
        );
        assert_eq!(report.samples[1].preview, None);
        assert!(report.self_query.as_ref().is_some_and(|q| q.reembedded));
        assert!(report.is_healthy());
    }

    #[test]
    fn stores_without_listing_report_an_error() {
        struct CountOnly;

        impl VectorStore for CountOnly {
            fn query(&self, _embedding: &[f32], _k: usize) -> Result<Vec<VectorHit>> {
                Ok(Vec::new())
            }

            fn count(&self) -> Result<usize> {
                Ok(4)
            }

            fn describe(&self) -> String {
                "count-only".to_string()
            }

            fn metric(&self) -> DistanceMetric {
                DistanceMetric::Cosine
            }
        }

        let err = validate_collection(&CountOnly, 3, None, None).expect_err("no listing");
        assert_eq!(err.to_string(), "count-only cannot list stored records");
    }
}
