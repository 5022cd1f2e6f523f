// Text generators
// Turn a prompt into text through an Ollama or OpenAI-compatible server

pub mod ollama;
pub mod openai;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::io::ErrorKind;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::config::GenerationConfig;

pub use ollama::OllamaGenerator;
pub use openai::OpenAiGenerator;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Cannot reach {endpoint}: {message}")]
    Connection { endpoint: String, message: String },
    #[error("No answer within {seconds} seconds")]
    Timeout { seconds: u64 },
    #[error("Model '{0}' is not available")]
    ModelNotFound(String),
    #[error("Generation failed: {0}")]
    Provider(String),
}

impl GenerationError {
    /// Unreachable or slow services may recover; a missing model or a rejected request will not
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            *self,
            GenerationError::Connection { .. } | GenerationError::Timeout { .. }
        )
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short provider label used in logs
    fn provider(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Build the generator selected by the configuration
#[inline]
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn TextGenerator>> {
    let generator: Arc<dyn TextGenerator> = match *config {
        GenerationConfig::Ollama(ref ollama) => Arc::new(OllamaGenerator::new(ollama)?),
        GenerationConfig::OpenAi(ref openai) => Arc::new(OpenAiGenerator::new(openai)?),
    };
    Ok(generator)
}

/// Sort a transport failure into the categories callers present differently
pub(crate) fn classify_error(
    error: ureq::Error,
    endpoint: &str,
    model: &str,
    timeout_secs: u64,
) -> GenerationError {
    match error {
        ureq::Error::Timeout(_) => GenerationError::Timeout {
            seconds: timeout_secs,
        },
        ureq::Error::Io(ref io) if io.kind() == ErrorKind::TimedOut => GenerationError::Timeout {
            seconds: timeout_secs,
        },
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound | ureq::Error::Io(_) => {
            GenerationError::Connection {
                endpoint: endpoint.to_string(),
                message: error.to_string(),
            }
        }
        ureq::Error::StatusCode(404) => GenerationError::ModelNotFound(model.to_string()),
        ureq::Error::StatusCode(status @ (401 | 403)) => {
            GenerationError::Provider(format!("Authentication rejected (HTTP {status})"))
        }
        ureq::Error::StatusCode(status) => {
            warn!("Generation request to {} failed with HTTP {}", endpoint, status);
            GenerationError::Provider(format!("HTTP {status}"))
        }
        other => GenerationError::Provider(other.to_string()),
    }
}

/// Run a blocking request on the blocking pool
pub(crate) async fn run_blocking<F>(request: F) -> Result<String, GenerationError>
where
    F: FnOnce() -> Result<String, GenerationError> + Send + 'static,
{
    tokio::task::spawn_blocking(request)
        .await
        .map_err(|e| GenerationError::Provider(format!("Generation task failed: {e}")))?
}
