#![warn(missing_docs)]
//! Retrieval-augmented answers over project documentation.
//!
//! Ingestion chunks markdown documents and embeds them into a vector store; at query time the
//! [`AnswerPipeline`] retrieves the nearest chunks, assembles a bounded prompt in a mascot's
//! voice, asks a generation model and scores the answer by retrieval distance.

pub mod chunker;
pub mod confidence;
pub mod config;
pub mod embedder;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod mascot;
pub mod pipeline;
pub mod prompt;
pub mod records;
pub mod resolver;
pub mod retriever;
pub mod telemetry;
pub mod text_cache;
pub mod validate;
pub mod vector_store;

pub use chunker::{chunk, chunk_document, ChunkerConfig};
pub use embedder::EmbeddingProvider;
pub use error::{ModelNotFound, RagError, Result};
pub use generation::{GenerationProvider, GenerationSettings};
pub use mascot::Mascot;
pub use pipeline::{AnswerPipeline, AnswerResult, PreparedAnswer, NO_CONTEXT_ANSWER};
pub use prompt::assemble;
pub use records::{Chunk, ChunkMetadata, ChunkRecord, EmbeddedChunkRecord, RetrievedContext};
pub use resolver::{Resolution, ResolutionError, Resolver};
pub use retriever::{RetrievalOutcome, Retriever};
pub use text_cache::ChunkTextCache;
pub use vector_store::{DistanceMetric, LocalVectorStore, PgVectorStore, VectorHit, VectorStore};
