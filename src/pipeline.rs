//! Question → retrieval → prompt → generation → confidence.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::confidence;
use crate::error::{RagError, Result};
use crate::generation::GenerationProvider;
use crate::mascot::Mascot;
use crate::prompt::assemble;
use crate::records::RetrievedContext;
use crate::retriever::{RetrievalOutcome, Retriever, MAX_TOP_K};
use crate::vector_store::DistanceMetric;

/// Answer returned when retrieval finds nothing.
pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find relevant information in the knowledge base. Please try rephrasing your question.";

/// Longest accepted question, in characters, after trimming.
pub const MAX_QUESTION_CHARS: usize = 1000;

const PREVIEW_CHARS: usize = 200;

/// Final answer for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResult {
    /// Generated (or fallback) answer text.
    pub response: String,
    /// `file_path` of every retrieved chunk in rank order.
    pub sources: Vec<String>,
    /// Retrieval confidence in `[0, 1]`.
    pub confidence: f64,
    /// Metric the confidence was derived from.
    #[serde(skip)]
    pub metric: DistanceMetric,
}

/// Retrieval result and prompt for a question, before generation.
#[derive(Debug, Clone)]
pub struct PreparedAnswer {
    /// Trimmed question.
    pub question: String,
    /// Retrieved chunks in rank order.
    pub contexts: Vec<RetrievedContext>,
    /// Assembled prompt; `None` when nothing was retrieved.
    pub prompt: Option<String>,
}

/// Trims `question` and checks it is 1 to [`MAX_QUESTION_CHARS`] characters long.
pub fn normalize_question(question: &str) -> Result<&str> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Err(RagError::InvalidArgument("Question cannot be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_QUESTION_CHARS {
        return Err(RagError::InvalidArgument(format!(
            "Question cannot exceed {MAX_QUESTION_CHARS} characters"
        )));
    }
    Ok(trimmed)
}

/// Checks `top_k` lies in `1..=MAX_TOP_K`.
pub fn validate_top_k(top_k: usize) -> Result<usize> {
    if (1..=MAX_TOP_K).contains(&top_k) {
        Ok(top_k)
    } else {
        Err(RagError::InvalidArgument(format!(
            "top_k must be between 1 and {MAX_TOP_K}, got {top_k}"
        )))
    }
}

/// Answers questions against one knowledge base.
#[derive(Clone)]
pub struct AnswerPipeline {
    retriever: Retriever,
    generator: Arc<dyn GenerationProvider>,
    max_input_chars: usize,
}

impl AnswerPipeline {
    /// Wires a retriever to a generator with a prompt budget of `max_input_chars`.
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn GenerationProvider>,
        max_input_chars: usize,
    ) -> Self {
        Self {
            retriever,
            generator,
            max_input_chars,
        }
    }

    /// Retriever used for context lookup.
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Validates the request, retrieves context and assembles the prompt.
    ///
    /// Fails only on invalid arguments or when no embedding model can be resolved; every other
    /// retrieval failure yields an empty context set.
    pub fn prepare(&self, mascot: Mascot, question: &str, top_k: usize) -> Result<PreparedAnswer> {
        let question = normalize_question(question)?;
        let top_k = validate_top_k(top_k)?;

        let contexts = match self.retriever.retrieve_outcome(question, top_k) {
            RetrievalOutcome::Unavailable(err @ RagError::EmbeddingUnavailable(_)) => {
                return Err(err)
            }
            outcome => outcome.into_contexts(),
        };
        info!(%mascot, top_k, chunks = contexts.len(), "retrieved context");

        let prompt = (!contexts.is_empty())
            .then(|| assemble(mascot.personality(), &contexts, question, self.max_input_chars));
        Ok(PreparedAnswer {
            question: question.to_string(),
            contexts,
            prompt,
        })
    }

    /// Answers `question` in the voice of `mascot` using up to `top_k` chunks.
    pub fn answer(&self, mascot: Mascot, question: &str, top_k: usize) -> Result<AnswerResult> {
        let metric = self.retriever.metric();
        let prepared = self.prepare(mascot, question, top_k)?;
        let Some(prompt) = prepared.prompt else {
            info!(%mascot, question = %prepared.question, "no context found");
            return Ok(AnswerResult {
                response: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0.0,
                metric,
            });
        };

        let response = match self.generator.generate(&prompt) {
            Ok(text) => text,
            Err(err) => {
                let detail = format!("{err:#}");
                let failure = RagError::GenerationFailure(detail.clone());
                warn!(error = %failure, generator = self.generator.name(), "recovering with apology");
                apology(&detail)
            }
        };
        let sources = prepared
            .contexts
            .iter()
            .map(|context| context.file_path.clone())
            .collect();
        let confidence = confidence::score_for_metric(&prepared.contexts, metric)?;

        info!(
            %mascot,
            top_k,
            chunks = prepared.contexts.len(),
            confidence,
            preview = %preview(&response),
            "answered question"
        );
        Ok(AnswerResult {
            response,
            sources,
            confidence,
            metric,
        })
    }
}

/// Best-effort answer carrying the generation error detail.
pub fn apology(detail: &str) -> String {
    format!("I apologize, but I encountered an error: {detail}")
}

fn preview(response: &str) -> String {
    let flat = response.replace('\n', " ");
    let mut preview: String = flat.chars().take(PREVIEW_CHARS).collect();
    if flat.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn questions_are_trimmed_and_bounded() {
        assert_eq!(normalize_question("  hi  ").expect("valid"), "hi");
        assert!(normalize_question("   ").is_err());
        assert!(normalize_question(&"q".repeat(MAX_QUESTION_CHARS)).is_ok());
        assert!(normalize_question(&"q".repeat(MAX_QUESTION_CHARS + 1)).is_err());
    }

    #[test]
    fn top_k_bounds() {
        assert!(validate_top_k(0).is_err());
        assert_eq!(validate_top_k(1).expect("valid"), 1);
        assert_eq!(validate_top_k(MAX_TOP_K).expect("valid"), MAX_TOP_K);
        assert!(validate_top_k(MAX_TOP_K + 1).is_err());
    }

    #[test]
    fn preview_flattens_and_caps() {
        assert_eq!(preview("a\nb"), "a b");
        let long = "x".repeat(250);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn apology_carries_detail() {
        assert_eq!(
            apology("quota exceeded"),
            "I apologize, but I encountered an error: quota exceeded"
        );
    }
}
