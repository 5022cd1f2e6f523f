
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{GenerationError, TextGenerator, classify_error, run_blocking};
use crate::config::OllamaGenerationConfig;

/// Generator backed by an Ollama server's `/api/generate` endpoint
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    endpoint: Url,
    model: String,
    timeout_secs: u64,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(config: &OllamaGenerationConfig) -> Result<Self> {
        let endpoint = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?
            .join("/api/generate")
            .context("Failed to build generate URL")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
            agent,
        })
    }

    /// Blocking generation call
    #[inline]
    pub fn generate_text(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = serde_json::to_string(&GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        })
        .map_err(|e| GenerationError::Provider(format!("Failed to serialize request: {e}")))?;

        debug!(
            "Requesting completion from {} with model {}",
            self.endpoint, self.model
        );
        let body = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .send(&request)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| classify_error(e, self.endpoint.as_str(), &self.model, self.timeout_secs))?;

        let response: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::Provider(format!("Malformed response: {e}")))?;
        Ok(response.response.trim().to_string())
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    #[inline]
    fn provider(&self) -> &str {
        "ollama"
    }

    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }

    #[inline]
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let client = self.clone();
        let prompt = prompt.to_string();
        run_blocking(move || client.generate_text(&prompt)).await
    }
}
