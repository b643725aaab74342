//! Chunk, embedding and retrieval records shared across ingestion and query stages.

use std::fmt;

use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

/// Default value of the `source` metadata field written during ingestion.
pub const DEFAULT_SOURCE: &str = "github";

/// Stable vector-store key for a chunk: `"<file_path>:<chunk_index>"`.
pub fn chunk_key(file_path: &str, chunk_index: impl fmt::Display) -> String {
    format!("{file_path}:{chunk_index}")
}

/// Splits a chunk key on its first `:` into `(file_path, chunk_index)`.
///
/// Keys without a `:` yield two empty parts.
pub fn split_chunk_key(id: &str) -> (&str, &str) {
    id.split_once(':').unwrap_or(("", ""))
}

/// Last path segment of `file_path`, treating `\` and `/` alike.
pub fn filename_from_path(file_path: &str) -> String {
    file_path
        .replace('\\', "/")
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Bounded excerpt of a source document tagged with its position among siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk body.
    pub text: String,
    /// Document path the chunk was cut from.
    pub file_path: String,
    /// Zero-based position within the document.
    pub chunk_index: usize,
    /// Number of chunks the document produced.
    pub total_chunks: usize,
}

impl Chunk {
    /// Vector-store key for this chunk.
    pub fn key(&self) -> String {
        chunk_key(&self.file_path, self.chunk_index)
    }
}

/// Metadata block of a chunk record file entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Document path relative to the ingested repository.
    pub file_path: String,
    /// Last path segment of `file_path`.
    #[serde(default)]
    pub filename: String,
    /// Zero-based chunk position. Accepts integers or numeric strings on input.
    #[serde(deserialize_with = "deserialize_index")]
    pub chunk_index: usize,
    /// Number of chunks cut from the document.
    #[serde(default, deserialize_with = "deserialize_index")]
    pub total_chunks: usize,
    /// Where the document came from.
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

/// Entry of the chunk record file produced by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Chunk body.
    pub text: String,
    /// Positional metadata.
    pub metadata: ChunkMetadata,
}

impl ChunkRecord {
    /// Converts a chunk into its on-disk record.
    pub fn from_chunk(chunk: &Chunk, source: &str) -> Self {
        Self {
            text: chunk.text.clone(),
            metadata: ChunkMetadata {
                file_path: chunk.file_path.clone(),
                filename: filename_from_path(&chunk.file_path),
                chunk_index: chunk.chunk_index,
                total_chunks: chunk.total_chunks,
                source: source.to_string(),
            },
        }
    }

    /// Vector-store key for this record.
    pub fn key(&self) -> String {
        chunk_key(&self.metadata.file_path, self.metadata.chunk_index)
    }
}

/// Output row emitted by embedding jobs and consumed by vector-store loaders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunkRecord {
    /// Chunk body submitted to the embedding model.
    pub text: String,
    /// Positional metadata carried over from the chunk record.
    pub metadata: ChunkMetadata,
    /// Model embedding vector.
    pub embedding: Vec<f32>,
}

impl EmbeddedChunkRecord {
    /// Vector-store key for this record.
    pub fn key(&self) -> String {
        chunk_key(&self.metadata.file_path, self.metadata.chunk_index)
    }
}

/// Chunk returned for one query, normalized across vector-store backends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedContext {
    /// Chunk body (or a placeholder when a detached index had no cached text).
    pub text: String,
    /// Source document path.
    pub file_path: String,
    /// Last segment of `file_path`.
    pub filename: String,
    /// Chunk position as stored in the backend (string-valued metadata).
    pub chunk_index: String,
    /// Stable key, canonically `"<file_path>:<chunk_index>"`.
    pub id: String,
    /// Distance to the query embedding (smaller is closer).
    pub distance: f64,
}

/// Parses a record file written either as one JSON array or as JSON lines.
pub fn parse_records<T: DeserializeOwned>(raw: &str) -> serde_json::Result<Vec<T>> {
    if raw.trim_start().starts_with('[') {
        return serde_json::from_str(raw);
    }
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

fn deserialize_index<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    struct IndexVisitor;

    impl Visitor<'_> for IndexVisitor {
        type Value = usize;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer or numeric string")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<usize, E> {
            usize::try_from(value).map_err(E::custom)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<usize, E> {
            usize::try_from(value).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<usize, E> {
            value.trim().parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(IndexVisitor)
}
