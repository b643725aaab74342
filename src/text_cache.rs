//! Id → text side cache used when the vector store only returns ids and distances.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{RagError, Result};
use crate::records::{chunk_key, parse_records, ChunkRecord};

/// Chunk texts keyed by `"<file_path>:<chunk_index>"`.
#[derive(Debug, Default, Clone)]
pub struct ChunkTextCache {
    texts: HashMap<String, String>,
}

impl ChunkTextCache {
    /// Loads a chunk record file, either a JSON array or one JSON record per line.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::parse(&raw).map_err(|err| match err {
            RagError::Json(json) => RagError::Store(format!(
                "invalid chunk record file {}: {json}",
                path.as_ref().display()
            )),
            other => other,
        })
    }

    /// Parses chunk records from an in-memory payload.
    pub fn parse(raw: &str) -> Result<Self> {
        let records: Vec<ChunkRecord> = parse_records(raw)?;
        Ok(records.into_iter().collect())
    }

    /// Text stored for `id`.
    pub fn get(&self, id: &str) -> Option<&str> {
        self.texts.get(id).map(String::as_str)
    }

    /// Number of cached chunks.
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

impl FromIterator<ChunkRecord> for ChunkTextCache {
    fn from_iter<I: IntoIterator<Item = ChunkRecord>>(iter: I) -> Self {
        let texts = iter
            .into_iter()
            .map(|record| {
                let key = chunk_key(&record.metadata.file_path, record.metadata.chunk_index);
                (key, record.text)
            })
            .collect();
        Self { texts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const ARRAY: &str = r#"[
        {"text": "first", "metadata": {"file_path": "docs/a.md", "chunk_index": 0}},
        {"text": "second", "metadata": {"file_path": "docs/a.md", "chunk_index": "1"}}
    ]"#;

    #[test]
    fn parses_json_array() {
        let cache = ChunkTextCache::parse(ARRAY).expect("parse");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("docs/a.md:1"), Some("second"));
        assert_eq!(cache.get("docs/a.md:2"), None);
    }

    #[test]
    fn loads_jsonl_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"{{"text":"alpha","metadata":{{"file_path":"README.md","chunk_index":0}}}}"#
        )
        .expect("write");
        writeln!(file).expect("write");
        writeln!(
            file,
            r#"{{"text":"beta","metadata":{{"file_path":"README.md","chunk_index":1}}}}"#
        )
        .expect("write");

        let cache = ChunkTextCache::load(file.path()).expect("load");

        assert_eq!(cache.get("README.md:0"), Some("alpha"));
        assert_eq!(cache.get("README.md:1"), Some("beta"));
    }

    #[test]
    fn malformed_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, "{{not json").expect("write");

        let err = ChunkTextCache::load(file.path()).expect_err("malformed");

        assert!(matches!(err, RagError::Store(_)));
    }
}
