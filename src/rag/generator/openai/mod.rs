#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{GenerationError, TextGenerator, classify_error, run_blocking};
use crate::config::OpenAiGenerationConfig;

/// Generator for servers speaking the OpenAI chat completions protocol
#[derive(Clone)]
pub struct OpenAiGenerator {
    endpoint: String,
    model: String,
    api_key: String,
    timeout_secs: u64,
    agent: ureq::Agent,
}

impl std::fmt::Debug for OpenAiGenerator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl OpenAiGenerator {
    /// Reads the API key from the configured environment variable
    #[inline]
    pub fn new(config: &OpenAiGenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("API key variable {} is not set", config.api_key_env))?;
        Ok(Self::with_api_key(config, api_key))
    }

    #[inline]
    pub fn with_api_key(config: &OpenAiGenerationConfig, api_key: String) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();

        Self {
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
            agent,
        }
    }

    /// Blocking generation call
    #[inline]
    pub fn generate_text(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = serde_json::to_string(&ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        })
        .map_err(|e| GenerationError::Provider(format!("Failed to serialize request: {e}")))?;

        debug!(
            "Requesting chat completion from {} with model {}",
            self.endpoint, self.model
        );
        let body = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send(&request)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| classify_error(e, &self.endpoint, &self.model, self.timeout_secs))?;

        let response: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::Provider(format!("Malformed response: {e}")))?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| GenerationError::Provider("Response contained no answer".to_string()))
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    #[inline]
    fn provider(&self) -> &str {
        "openai"
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
