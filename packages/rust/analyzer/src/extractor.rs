use std::sync::Arc;

use kbforge_shared::Result;
use tracing::{info, instrument};

use crate::{GenerationSettings, LanguageModel, prompts};

/// Extracts categorized phrases from document text and merges them into an
/// existing knowledge base.
#[derive(Clone)]
pub struct PhraseExtractor {
    model: Arc<dyn LanguageModel>,
    categories: Vec<String>,
}

impl PhraseExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, categories: Vec<String>) -> Self {
        Self { model, categories }
    }

    /// Analyze document text into Markdown grouped by category.
    #[instrument(skip_all, fields(model = %settings.model, chars = content.chars().count()))]
    pub async fn extract(&self, settings: &GenerationSettings, content: &str) -> Result<String> {
        let instruction = prompts::extract_phrases(&self.categories);
        let request = settings.request(prompts::with_document(&instruction, content));
        let phrases = self.model.generate(&request).await?;
        info!(output_chars = phrases.chars().count(), "phrase extraction complete");
        Ok(phrases)
    }

    /// Merge `new_content` into `existing` with duplicates removed.
    ///
    /// A blank `existing` returns `new_content` without calling the model.
    #[instrument(skip_all, fields(model = %settings.model))]
    pub async fn merge_with_existing(
        &self,
        settings: &GenerationSettings,
        existing: &str,
        new_content: &str,
    ) -> Result<String> {
        if existing.trim().is_empty() {
            return Ok(new_content.to_string());
        }

        let request = settings.request(prompts::merge_and_deduplicate(existing, new_content));
        let merged = self.model.generate(&request).await?;
        info!(
            existing_chars = existing.chars().count(),
            merged_chars = merged.chars().count(),
            "knowledge base merge complete"
        );
        Ok(merged)
    }
}

impl std::fmt::Debug for PhraseExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhraseExtractor")
            .field("categories", &self.categories.len())
            .finish_non_exhaustive()
    }
}
