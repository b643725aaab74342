//! Markdown discovery and chunking for a documentation repository.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunker::{chunk_document, ChunkerConfig};
use crate::records::ChunkRecord;

/// Path fragments that exclude a file from ingestion.
pub const SKIP_FRAGMENTS: [&str; 3] = [".git", "node_modules", "CHANGELOG"];

/// Documents shorter than this many characters are ignored.
pub const MIN_DOCUMENT_CHARS: usize = 100;

/// Chunk records produced from one repository plus counters for reporting.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Chunk records in file then chunk order.
    pub records: Vec<ChunkRecord>,
    /// Markdown files that produced chunks.
    pub files: usize,
    /// Markdown files skipped as too small or unreadable.
    pub skipped: usize,
}

/// Whether a repository-relative path falls under one of [`SKIP_FRAGMENTS`].
pub fn is_skipped(relative: &str) -> bool {
    SKIP_FRAGMENTS
        .iter()
        .any(|fragment| relative.contains(fragment))
}

/// Lists `*.md` files under `root` in a stable order, as `/`-separated relative paths.
pub fn find_markdown(root: &Path) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
            continue;
        }
        let relative = relative_path(root, path);
        if is_skipped(&relative) {
            debug!(path = %relative, "skipping excluded path");
            continue;
        }
        found.push(relative);
    }
    Ok(found)
}

/// Chunks every eligible markdown file under `root`.
///
/// Unreadable or tiny files are logged and skipped; only walking errors abort.
pub fn chunk_repository(root: &Path, config: &ChunkerConfig, source: &str) -> Result<IngestReport> {
    let files = find_markdown(root)?;
    info!(root = %root.display(), files = files.len(), "found markdown files");

    let mut report = IngestReport::default();
    for relative in files {
        let absolute: PathBuf = root.join(&relative);
        let content = match fs::read_to_string(&absolute) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %relative, error = %err, "failed to read document");
                report.skipped += 1;
                continue;
            }
        };
        if content.chars().count() < MIN_DOCUMENT_CHARS {
            debug!(path = %relative, "skipping small document");
            report.skipped += 1;
            continue;
        }
        let chunks = chunk_document(&relative, &content, config);
        debug!(path = %relative, chunks = chunks.len(), "chunked document");
        report.files += 1;
        report
            .records
            .extend(chunks.iter().map(|chunk| ChunkRecord::from_chunk(chunk, source)));
    }
    Ok(report)
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
