//! Prompt assembly under a character budget.
//!
//! Only the retrieved context is ever shortened. The personality, the instruction preamble and
//! the question always survive, and the truncation marker is appended even though it pushes the
//! prompt slightly past the budget.

use tracing::warn;

use crate::records::RetrievedContext;

/// Instructions placed between the personality and the context block.
pub const INSTRUCTION_PREAMBLE: &str = "\n\nUse the following context from the project documentation to answer the user's question.\nIf the context doesn't contain enough information, say so honestly.\n\nContext:\n";

/// Appended to a context block that was cut to fit.
pub const TRUNCATION_MARKER: &str = "\n\n[Context truncated due to length limits]";

/// Separator between formatted chunks in the context block.
pub const CHUNK_SEPARATOR: &str = "\n\n";

/// Characters assumed per token when converting token budgets.
pub const CHARS_PER_TOKEN: usize = 4;

/// Default input budget in tokens.
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 4096;

/// Converts a token budget into the character budget [`assemble`] expects.
pub fn max_input_chars_for_tokens(max_input_tokens: usize) -> usize {
    max_input_tokens.saturating_mul(CHARS_PER_TOKEN)
}

/// The three parts of a prompt before rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Mascot personality text.
    pub personality: String,
    /// Formatted retrieved chunks.
    pub context_block: String,
    /// User question.
    pub question: String,
}

impl Prompt {
    /// Collects the prompt parts for `chunks` in the order given.
    pub fn new(personality: &str, chunks: &[RetrievedContext], question: &str) -> Self {
        Self {
            personality: personality.to_string(),
            context_block: context_block(chunks),
            question: question.to_string(),
        }
    }

    fn head(&self) -> String {
        format!("{}{INSTRUCTION_PREAMBLE}", self.personality)
    }

    fn tail(&self) -> String {
        format!("\n\nQuestion: {}\n\nAnswer:", self.question)
    }

    /// Renders the prompt, cutting the context block from its end when over `max_input_chars`.
    pub fn render(&self, max_input_chars: usize) -> String {
        let head = self.head();
        let tail = self.tail();
        let full_len = char_len(&head) + char_len(&self.context_block) + char_len(&tail);
        if full_len <= max_input_chars {
            return format!("{head}{}{tail}", self.context_block);
        }

        let available = max_input_chars.saturating_sub(char_len(&head) + char_len(&tail));
        warn!(
            prompt_chars = full_len,
            max_input_chars, available, "prompt exceeds input budget; truncating context"
        );
        let kept: String = self.context_block.chars().take(available).collect();
        format!("{head}{kept}{TRUNCATION_MARKER}{tail}")
    }
}

/// Formats chunks as `"From {filename}:\n{text}"` blocks joined by blank lines.
pub fn context_block(chunks: &[RetrievedContext]) -> String {
    chunks
        .iter()
        .map(|chunk| format!("From {}:\n{}", chunk.filename, chunk.text))
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

/// Builds the full generation prompt within `max_input_chars` (plus the truncation marker).
pub fn assemble(
    personality: &str,
    chunks: &[RetrievedContext],
    question: &str,
    max_input_chars: usize,
) -> String {
    Prompt::new(personality, chunks, question).render(max_input_chars)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
