//! LLM-backed phrase analysis.
//!
//! [`LanguageModel`] is the seam to the text-generation backend
//! ([`GeminiClient`] in production, fakes in tests). [`PhraseExtractor`]
//! builds the extraction and merge prompts on top of it.

mod extractor;
mod gemini;
mod prompts;

use async_trait::async_trait;
use kbforge_shared::Result;

pub use extractor::PhraseExtractor;
pub use gemini::GeminiClient;

/// One text-generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Per-call credential (supplied by the uploader).
    pub api_key: String,
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Per-job generation parameters, without the prompt.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerationSettings {
    /// Pair these settings with a prompt.
    pub fn request(&self, prompt: String) -> GenerationRequest {
        GenerationRequest {
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            prompt,
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for `request.prompt`.
    ///
    /// Transport, quota, auth and empty-response failures are
    /// `KbForgeError::Analysis`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}
