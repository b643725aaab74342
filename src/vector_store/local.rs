//! Local persistent collection stored as one JSON file.
//!
//! The whole collection is loaded into memory and searched by brute force, which is plenty for
//! a documentation corpus of a few thousand chunks.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DistanceMetric, VectorHit, VectorStore};
use crate::error::RagError;
use crate::records::EmbeddedChunkRecord;

/// One record of the collection file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVector {
    /// Record key, `"<file_path>:<chunk_index>"`.
    pub id: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Chunk text; absent for detached indexes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    /// String-valued metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl StoredVector {
    /// Builds a store record from an embedded chunk, dropping the text when `detached`.
    pub fn from_embedded(record: &EmbeddedChunkRecord, detached: bool) -> Self {
        let meta = &record.metadata;
        let mut metadata = BTreeMap::new();
        metadata.insert("file_path".to_string(), meta.file_path.clone());
        metadata.insert("chunk_index".to_string(), meta.chunk_index.to_string());
        metadata.insert("filename".to_string(), meta.filename.clone());
        Self {
            id: record.key(),
            embedding: record.embedding.clone(),
            document: (!detached).then(|| record.text.clone()),
            metadata,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CollectionFile {
    name: String,
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    metric: DistanceMetric,
    #[serde(default)]
    records: Vec<StoredVector>,
}

/// In-memory collection backed by a JSON file.
#[derive(Debug)]
pub struct LocalVectorStore {
    path: PathBuf,
    name: String,
    metric: DistanceMetric,
    dimension: Option<usize>,
    records: Vec<StoredVector>,
    positions: HashMap<String, usize>,
}

impl LocalVectorStore {
    /// Starts an empty collection that will persist to `path`.
    pub fn create(path: impl Into<PathBuf>, name: impl Into<String>, metric: DistanceMetric) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            metric,
            dimension: None,
            records: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Loads an existing collection file.
    pub fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let parsed: CollectionFile = serde_json::from_reader(BufReader::new(file))?;
        let mut store = Self {
            path,
            name: parsed.name,
            metric: parsed.metric,
            dimension: parsed.dimension,
            records: Vec::with_capacity(parsed.records.len()),
            positions: HashMap::new(),
        };
        store.upsert(parsed.records)?;
        debug!(
            path = %store.path.display(),
            records = store.records.len(),
            "loaded local collection"
        );
        Ok(store)
    }

    /// Opens `path` when it exists, otherwise starts an empty collection there.
    pub fn open_or_create(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        metric: DistanceMetric,
    ) -> crate::Result<Self> {
        let path = path.into();
        if path.exists() {
            let store = Self::open(path)?;
            if store.metric != metric {
                return Err(RagError::Store(format!(
                    "collection {} uses {} distance, requested {}",
                    store.name, store.metric, metric
                )));
            }
            Ok(store)
        } else {
            Ok(Self::create(path, name, metric))
        }
    }

    /// Inserts or replaces records by id, enforcing one dimension per collection.
    ///
    /// Returns the number of records written. Nothing is written when any record is rejected.
    pub fn upsert(&mut self, records: Vec<StoredVector>) -> crate::Result<usize> {
        let mut dimension = self.dimension;
        for record in &records {
            let found = record.embedding.len();
            if found == 0 {
                return Err(RagError::InvalidArgument(format!(
                    "record {} has an empty embedding",
                    record.id
                )));
            }
            match dimension {
                Some(expected) if expected != found => {
                    return Err(RagError::DimensionMismatch {
                        id: record.id.clone(),
                        expected,
                        found,
                    });
                }
                Some(_) => {}
                None => dimension = Some(found),
            }
        }
        self.dimension = dimension;

        let written = records.len();
        for record in records {
            match self.positions.get(&record.id) {
                Some(&pos) => self.records[pos] = record,
                None => {
                    self.positions.insert(record.id.clone(), self.records.len());
                    self.records.push(record);
                }
            }
        }
        Ok(written)
    }

    /// Writes the collection next to its target and renames it into place.
    pub fn persist(&self) -> crate::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(&self.path);
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(
                &mut writer,
                &CollectionRef {
                    name: &self.name,
                    dimension: self.dimension,
                    metric: self.metric,
                    records: &self.records,
                },
            )?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File the collection persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Embedding dimension fixed by the first record, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the collection holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Serialize)]
struct CollectionRef<'a> {
    name: &'a str,
    dimension: Option<usize>,
    metric: DistanceMetric,
    records: &'a [StoredVector],
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

impl VectorStore for LocalVectorStore {
    fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.dimension {
            anyhow::ensure!(
                embedding.len() == expected,
                "query embedding has {} dimensions, collection {} expects {}",
                embedding.len(),
                self.name,
                expected
            );
        }
        let mut scored: Vec<(f64, &StoredVector)> = self
            .records
            .iter()
            .map(|record| (self.metric.distance(embedding, &record.embedding), record))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(distance, record)| VectorHit {
                id: record.id.clone(),
                text: record.document.clone(),
                metadata: record.metadata.clone(),
                distance,
            })
            .collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.records.len())
    }

    fn describe(&self) -> String {
        format!("local:{} ({})", self.name, self.path.display())
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn sample(&self, limit: usize) -> Result<Vec<StoredVector>> {
        Ok(self.records.iter().take(limit).cloned().collect())
    }
}
