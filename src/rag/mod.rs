// Retrieval-augmented answers
// Search the store for context, then ask a text generator to answer from it

pub mod generator;


use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::VaultError;
use crate::config::RagSettings;
use crate::store::{SearchOptions, SearchResult, VectorStore};

pub use generator::{
    GenerationError, OllamaGenerator, OpenAiGenerator, TextGenerator, create_generator,
};

/// Answer given when retrieval finds nothing above the score threshold
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant documents were found for this question, so no answer was generated.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    InvalidQuestion,
    /// Searching the local store failed
    Retrieval,
    Connection,
    Timeout,
    ModelNotFound,
    /// The generator answered with an error
    Generation,
}

/// A RAG failure phrased for the user, with a retry hint
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct RagFailure {
    pub category: FailureCategory,
    pub message: String,
    pub retryable: bool,
}

impl From<VaultError> for RagFailure {
    #[inline]
    fn from(err: VaultError) -> Self {
        let retryable = err.is_retryable();
        let (category, message) = match err {
            VaultError::Connection(detail) => (
                FailureCategory::Connection,
                format!(
                    "The text generation service could not be reached ({detail}). Check that it is running."
                ),
            ),
            VaultError::Timeout(seconds) => (
                FailureCategory::Timeout,
                format!(
                    "The text generation service did not answer within {seconds} seconds. Try again or choose a faster model."
                ),
            ),
            VaultError::ModelNotFound(model) => (
                FailureCategory::ModelNotFound,
                format!(
                    "The model '{model}' is not installed. Pull it or choose another model in the configuration."
                ),
            ),
            other => (
                FailureCategory::Retrieval,
                format!("Searching the document store failed: {other}"),
            ),
        };
        Self {
            category,
            message,
            retryable,
        }
    }
}

impl From<GenerationError> for RagFailure {
    #[inline]
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Provider(message) => Self {
                category: FailureCategory::Generation,
                message: format!("The text generator returned an error: {message}"),
                retryable: false,
            },
            other => Self::from(VaultError::from(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagAnswer {
    pub question: String,
    pub answer: String,
    /// Chunks the answer was grounded on, best match first
    pub sources: Vec<SearchResult>,
    /// Generator model, absent when no generation was needed
    pub model: Option<String>,
}

pub struct RagOrchestrator {
    store: Arc<VectorStore>,
    generator: Arc<dyn TextGenerator>,
    settings: RagSettings,
}

impl std::fmt::Debug for RagOrchestrator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagOrchestrator")
            .field("provider", &self.generator.provider())
            .field("model", &self.generator.model_name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RagOrchestrator {
    #[inline]
    pub fn new(
        store: Arc<VectorStore>,
        generator: Arc<dyn TextGenerator>,
        settings: RagSettings,
    ) -> Self {
        Self {
            store,
            generator,
            settings,
        }
    }

    #[inline]
    pub async fn ask(&self, question: &str) -> Result<RagAnswer, RagFailure> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagFailure {
                category: FailureCategory::InvalidQuestion,
                message: "The question is empty.".to_string(),
                retryable: false,
            });
        }

        let options = SearchOptions {
            limit: self.settings.max_context_chunks,
            min_score: self.settings.min_score,
            ..SearchOptions::default()
        };
        let sources = self.store.search(question, &options).await?;
        if sources.is_empty() {
            info!("No context above score {} for question", options.min_score);
            return Ok(RagAnswer {
                question: question.to_string(),
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources,
                model: None,
            });
        }

        let prompt = build_prompt(question, &sources);
        debug!(
            "Asking {} ({}) with {} context chunks",
            self.generator.provider(),
            self.generator.model_name(),
            sources.len()
        );
        let answer = self.generator.generate(&prompt).await.map_err(|e| {
            warn!("Generation with {} failed: {}", self.generator.provider(), e);
            RagFailure::from(e)
        })?;

        Ok(RagAnswer {
            question: question.to_string(),
            answer,
            sources,
            model: Some(self.generator.model_name().to_string()),
        })
    }
}

/// Prompt asking for an answer grounded in the numbered context chunks
#[inline]
pub fn build_prompt(question: &str, sources: &[SearchResult]) -> String {
    let mut prompt = String::from(
        "Answer the question using only the context below. \
         If the context does not contain the answer, say that you don't know.\n\nContext:\n",
    );
    for (position, source) in sources.iter().enumerate() {
        let document = &source.document;
        let label = document.title.as_deref().unwrap_or(&document.source);
        let _ = writeln!(
            prompt,
            "[{}] {} (score {:.2})\n{}\n",
            position + 1,
            label,
            source.score,
            document.content.trim()
        );
    }
    let _ = write!(prompt, "Question: {question}\nAnswer:");
    prompt
}
