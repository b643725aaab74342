//! Paragraph-aware document chunking with whole-paragraph overlap.
//!
//! Text is split on blank lines, paragraphs are packed greedily into chunks of at most
//! `max_chunk_size` characters, and oversized paragraphs fall back to sentence splitting.
//! Output is a pure function of the input, which keeps `"<file_path>:<chunk_index>"` keys
//! stable across re-ingestion.

use std::sync::LazyLock;

use regex::Regex;

use crate::records::Chunk;

/// Separator placed between paragraphs (and sentences) inside one chunk.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

static BLANK_LINE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line pattern"));
static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("sentence boundary pattern"));

/// Chunking knobs used by ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum characters per chunk before flushing.
    pub max_chunk_size: usize,
    /// Any non-zero value carries the last paragraph of a flushed chunk into the next one.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap: 200,
        }
    }
}

/// Splits `text` into ordered, overlapping chunks.
///
/// Sizes are measured in characters. `overlap > 0` seeds each new chunk with the last whole
/// paragraph of the previous one; it is not a character count.
pub fn chunk(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<String> {
    let normalized = BLANK_LINE_RUNS.replace_all(text, PARAGRAPH_SEPARATOR);
    let mut builder = ChunkBuilder::new(max_chunk_size);

    for paragraph in normalized.split(PARAGRAPH_SEPARATOR) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if char_len(paragraph) > max_chunk_size {
            builder.flush();
            for sentence in split_sentences(paragraph) {
                builder.push_sentence(sentence);
            }
        } else {
            builder.push_paragraph(paragraph, overlap > 0);
        }
    }

    builder.finish()
}

/// Chunks one document and tags every piece with its position.
pub fn chunk_document(file_path: &str, text: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let pieces = chunk(text, config.max_chunk_size, config.overlap);
    let total_chunks = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| Chunk {
            text,
            file_path: file_path.to_string(),
            chunk_index,
            total_chunks,
        })
        .collect()
}

struct ChunkBuilder<'a> {
    max_chunk_size: usize,
    pieces: Vec<&'a str>,
    // Running size including one separator per buffered piece.
    size: usize,
    chunks: Vec<String>,
}

impl<'a> ChunkBuilder<'a> {
    fn new(max_chunk_size: usize) -> Self {
        Self {
            max_chunk_size,
            pieces: Vec::new(),
            size: 0,
            chunks: Vec::new(),
        }
    }

    fn push_paragraph(&mut self, paragraph: &'a str, carry_overlap: bool) {
        let len = char_len(paragraph);
        if self.size + len > self.max_chunk_size && !self.pieces.is_empty() {
            self.emit();
            match self.pieces.last().copied().filter(|_| carry_overlap) {
                Some(previous) => {
                    self.size = char_len(previous) + len + PARAGRAPH_SEPARATOR.len();
                    self.pieces = vec![previous, paragraph];
                }
                None => {
                    self.size = len;
                    self.pieces = vec![paragraph];
                }
            }
        } else {
            self.pieces.push(paragraph);
            self.size += len + PARAGRAPH_SEPARATOR.len();
        }
    }

    fn push_sentence(&mut self, sentence: &'a str) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            return;
        }
        let len = char_len(sentence);
        if self.size + len > self.max_chunk_size {
            if !self.pieces.is_empty() {
                self.emit();
            }
            self.pieces = vec![sentence];
            self.size = len;
        } else {
            self.pieces.push(sentence);
            self.size += len + PARAGRAPH_SEPARATOR.len();
        }
    }

    fn flush(&mut self) {
        if !self.pieces.is_empty() {
            self.emit();
            self.pieces.clear();
            self.size = 0;
        }
    }

    // Leaves `pieces` in place so the caller can pick the overlap paragraph.
    fn emit(&mut self) {
        self.chunks.push(self.pieces.join(PARAGRAPH_SEPARATOR));
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

/// Splits a paragraph on runs of `.`, `!` or `?` followed by whitespace.
///
/// The whole boundary match is consumed, so inner sentences lose their terminal
/// punctuation; only the final sentence keeps it.
fn split_sentences(paragraph: &str) -> Vec<&str> {
    SENTENCE_BOUNDARY.split(paragraph).collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
