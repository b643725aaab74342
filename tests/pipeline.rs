use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use mascot_rag::pipeline::apology;
use mascot_rag::records::{filename_from_path, DEFAULT_SOURCE};
use mascot_rag::resolver::ResolvingEmbedder;
use mascot_rag::validate::validate_collection;
use mascot_rag::vector_store::StoredVector;
use mascot_rag::{
    AnswerPipeline, ChunkMetadata, ChunkTextCache, DistanceMetric, EmbeddedChunkRecord,
    EmbeddingProvider, GenerationProvider, LocalVectorStore, Mascot, RagError, Resolver,
    Retriever, VectorHit, VectorStore, NO_CONTEXT_ANSWER,
};
use pretty_assertions::assert_eq;

struct FixedEmbedder;

impl EmbeddingProvider for FixedEmbedder {
    fn name(&self) -> &str {
        "fixed"
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

/// Returns canned hits regardless of the query vector.
struct CannedStore {
    hits: Result<Vec<VectorHit>, String>,
}

impl VectorStore for CannedStore {
    fn query(&self, _embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        match &self.hits {
            Ok(hits) => Ok(hits.iter().take(k).cloned().collect()),
            Err(message) => Err(anyhow!("{message}")),
        }
    }

    fn count(&self) -> Result<usize> {
        Ok(self.hits.as_ref().map(Vec::len).unwrap_or_default())
    }

    fn describe(&self) -> String {
        "canned".to_string()
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }
}

#[derive(Default)]
struct RecordingGenerator {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    fail_with: Option<String>,
}

impl GenerationProvider for RecordingGenerator {
    fn name(&self) -> &str {
        "recording"
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("lock")
            .push(prompt.to_string());
        match &self.fail_with {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok("Blorp! Modules live in the modules folder.".to_string()),
        }
    }
}

fn hit(file_path: &str, chunk_index: usize, text: Option<&str>, distance: f64) -> VectorHit {
    let mut metadata = BTreeMap::new();
    metadata.insert("file_path".to_string(), file_path.to_string());
    metadata.insert("chunk_index".to_string(), chunk_index.to_string());
    VectorHit {
        id: format!("{file_path}:{chunk_index}"),
        text: text.map(str::to_string),
        metadata,
        distance,
    }
}

fn pipeline_over(store: CannedStore, generator: Arc<RecordingGenerator>) -> AnswerPipeline {
    let retriever = Retriever::new(Arc::new(FixedEmbedder), Arc::new(store));
    AnswerPipeline::new(retriever, generator, 16_384)
}

#[test]
fn empty_retrieval_skips_generation() {
    let generator = Arc::new(RecordingGenerator::default());
    let pipeline = pipeline_over(CannedStore { hits: Ok(Vec::new()) }, generator.clone());

    let answer = pipeline
        .answer(Mascot::Gooey, "How do I install Terasology?", 5)
        .expect("answer");

    assert_eq!(answer.response, NO_CONTEXT_ANSWER);
    assert!(answer.sources.is_empty());
    assert_eq!(answer.confidence, 0.0);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn answers_with_ranked_sources_and_confidence() {
    let generator = Arc::new(RecordingGenerator::default());
    let store = CannedStore {
        hits: Ok(vec![
            hit("docs/modules.md", 1, Some("Modules are loaded at startup."), 0.4),
            hit("README.md", 0, Some("Terasology is a voxel game."), 0.2),
        ]),
    };
    let pipeline = pipeline_over(store, generator.clone());

    let answer = pipeline
        .answer(Mascot::Gooey, "  Where do modules live?  ", 5)
        .expect("answer");

    assert_eq!(answer.response, "Blorp! Modules live in the modules folder.");
    assert_eq!(answer.sources, vec!["README.md", "docs/modules.md"]);
    assert!((answer.confidence - 0.7).abs() < 1e-9, "{}", answer.confidence);

    let prompts = generator.prompts.lock().expect("lock");
    assert_eq!(prompts.len(), 1);
    let prompt = &prompts[0];
    assert!(prompt.starts_with(Mascot::Gooey.personality()));
    assert!(prompt.ends_with("Question: Where do modules live?\n\nAnswer:"), "{prompt}");
    let readme = prompt.find("From README.md:").expect("readme context");
    let modules = prompt.find("From modules.md:").expect("modules context");
    assert!(readme < modules);
}

#[test]
fn generation_failure_becomes_apology() {
    let generator = Arc::new(RecordingGenerator {
        fail_with: Some("upstream 500".to_string()),
        ..RecordingGenerator::default()
    });
    let store = CannedStore {
        hits: Ok(vec![hit("README.md", 0, Some("Bill likes votes."), 0.1)]),
    };
    let pipeline = pipeline_over(store, generator.clone());

    let answer = pipeline
        .answer(Mascot::Bill, "How are proposals approved?", 3)
        .expect("answer");

    assert_eq!(answer.response, apology("upstream 500"));
    assert!(answer
        .response
        .starts_with("I apologize, but I encountered an error: "));
    assert_eq!(answer.sources, vec!["README.md"]);
    assert!((answer.confidence - 0.9).abs() < 1e-9);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn store_failure_degrades_to_no_context() {
    let generator = Arc::new(RecordingGenerator::default());
    let store = CannedStore {
        hits: Err("connection refused".to_string()),
    };
    let pipeline = pipeline_over(store, generator.clone());

    let answer = pipeline
        .answer(Mascot::Gooey, "Is the store up?", 5)
        .expect("answer");

    assert_eq!(answer.response, NO_CONTEXT_ANSWER);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn unresolvable_embedding_model_is_an_error() {
    let resolver: Resolver<dyn EmbeddingProvider> = Resolver::new(
        "embedding",
        vec!["retired-a".to_string(), "retired-b".to_string()],
        |model: &str| Err(anyhow!("model {model} not found")),
    );
    let retriever = Retriever::new(
        Arc::new(ResolvingEmbedder::new(resolver)),
        Arc::new(CannedStore { hits: Ok(Vec::new()) }),
    );
    let generator = Arc::new(RecordingGenerator::default());
    let pipeline = AnswerPipeline::new(retriever, generator.clone(), 16_384);

    let err = pipeline
        .answer(Mascot::Gooey, "Anything?", 5)
        .expect_err("no embedding model");

    assert!(matches!(err, RagError::EmbeddingUnavailable(_)), "{err}");
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn invalid_arguments_are_rejected() {
    let generator = Arc::new(RecordingGenerator::default());
    let pipeline = pipeline_over(CannedStore { hits: Ok(Vec::new()) }, generator);

    assert!(matches!(
        pipeline.answer(Mascot::Gooey, "   ", 5),
        Err(RagError::InvalidArgument(_))
    ));
    assert!(matches!(
        pipeline.answer(Mascot::Gooey, "hello", 0),
        Err(RagError::InvalidArgument(_))
    ));
    assert!(matches!(
        pipeline.answer(Mascot::Gooey, "hello", 21),
        Err(RagError::InvalidArgument(_))
    ));
}

#[test]
fn detached_hits_are_filled_from_text_cache() {
    let cache = ChunkTextCache::parse(
        r#"[{"text":"Cached module docs.","metadata":{"file_path":"docs/modules.md","chunk_index":2}}]"#,
    )
    .expect("cache");
    let store = CannedStore {
        hits: Ok(vec![
            hit("docs/modules.md", 2, None, 0.1),
            hit("docs/missing.md", 7, None, 0.3),
        ]),
    };
    let retriever = Retriever::new(Arc::new(FixedEmbedder), Arc::new(store))
        .with_text_cache(Arc::new(cache));
    let generator = Arc::new(RecordingGenerator::default());
    let pipeline = AnswerPipeline::new(retriever, generator, 16_384);

    let prepared = pipeline
        .prepare(Mascot::Gooey, "What are modules?", 5)
        .expect("prepare");

    let texts: Vec<&str> = prepared.contexts.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(
        texts,
        vec![
            "Cached module docs.",
            "[Chunk 7 from missing.md is not available in the text cache]",
        ]
    );
    let prompt = prepared.prompt.expect("prompt");
    assert!(prompt.contains("Cached module docs."));
}

#[test]
fn local_collection_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("collections").join("mascot.json");
    let embedded = |file_path: &str, embedding: Vec<f32>| EmbeddedChunkRecord {
        text: format!("Text of {file_path}"),
        metadata: ChunkMetadata {
            file_path: file_path.to_string(),
            filename: filename_from_path(file_path),
            chunk_index: 0,
            total_chunks: 1,
            source: DEFAULT_SOURCE.to_string(),
        },
        embedding,
    };

    let mut store = LocalVectorStore::open_or_create(&path, "mascot", DistanceMetric::Cosine)
        .expect("create");
    let records = vec![
        embedded("docs/near.md", vec![1.0, 0.0, 0.0]),
        embedded("docs/side.md", vec![0.0, 1.0, 0.0]),
    ];
    let written = store
        .upsert(
            records
                .iter()
                .map(|record| StoredVector::from_embedded(record, false))
                .collect(),
        )
        .expect("upsert");
    assert_eq!(written, 2);
    store.persist().expect("persist");

    let reopened = LocalVectorStore::open(&path).expect("reopen");
    assert_eq!(reopened.len(), 2);
    let generator = Arc::new(RecordingGenerator::default());
    let retriever = Retriever::new(Arc::new(FixedEmbedder), Arc::new(reopened));
    let pipeline = AnswerPipeline::new(retriever, generator, 16_384);

    let answer = pipeline
        .answer(Mascot::Bill, "Which doc is nearest?", 2)
        .expect("answer");

    assert_eq!(answer.sources, vec!["docs/near.md", "docs/side.md"]);
    assert!((answer.confidence - 0.5).abs() < 1e-6, "{}", answer.confidence);
}

#[test]
fn persisted_collection_passes_validation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("mascot.json");
    let mut store = LocalVectorStore::open_or_create(&path, "mascot", DistanceMetric::Cosine)
        .expect("create");
    let record = |id: &str, embedding: Vec<f32>| {
        let mut metadata = BTreeMap::new();
        metadata.insert("file_path".to_string(), id.split(':').next().unwrap_or_default().to_string());
        StoredVector {
            id: id.to_string(),
            embedding,
            document: Some(format!("Text of {id}")),
            metadata,
        }
    };
    store
        .upsert(vec![
            record("docs/install.md:0", vec![0.0, 1.0, 0.0]),
            record("docs/install.md:1", vec![0.0, 0.0, 1.0]),
        ])
        .expect("upsert");
    store.persist().expect("persist");

    let reopened = LocalVectorStore::open(&path).expect("reopen");
    let report = validate_collection(&reopened, 5, None, None).expect("validate");

    assert_eq!(report.count, 2);
    assert_eq!(report.samples.len(), 2);
    assert_eq!(report.samples[1].filename, "install.md");
    let self_query = report.self_query.clone().expect("self query");
    assert_eq!(self_query.id, "docs/install.md:0");
    assert_eq!(self_query.top_id.as_deref(), Some("docs/install.md:0"));
    assert!(report.is_healthy());
}
