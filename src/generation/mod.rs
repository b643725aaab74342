//! Generation provider contract plus the concrete chat/message API clients.

mod anthropic;
mod openai;

use std::sync::Arc;

use anyhow::Result;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Turns an assembled prompt into answer text.
pub trait GenerationProvider: Send + Sync {
    /// Label used in logs (usually the resolved model name).
    fn name(&self) -> &str;

    /// Generates a completion for `prompt`.
    fn generate(&self, prompt: &str) -> Result<String>;
}

impl<T: GenerationProvider + ?Sized> GenerationProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt)
    }
}

/// Sampling and length limits shared by every provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    /// Maximum tokens requested from the completion model.
    pub max_output_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Top-k sampling cutoff (ignored by APIs that lack it).
    pub top_k: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_output_tokens: 1024,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
        }
    }
}
