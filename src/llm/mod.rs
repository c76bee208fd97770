pub mod models;
pub mod prompts;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use models::{CompletionRequest, GenerationParams, SafetySetting};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    Connection(String),
    #[error("LLM request timed out: {0}")]
    Timeout(String),
    #[error("LLM rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("LLM service unavailable: {0}")]
    Unavailable(String),
    #[error("LLM response error: {0}")]
    Response(String),
    #[error("LLM configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Rate limiting and temporary unavailability are the only failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimited(_) | LlmError::Unavailable(_))
    }
}

/// A hosted text-completion service.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// The single long-lived completion client shared by translation and insights.
pub struct LlmManager {
    provider: Arc<dyn CompletionProvider>,
    params: GenerationParams,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Arc<dyn CompletionProvider> = match config.backend.as_str() {
            "gemini" => Arc::new(providers::gemini::GeminiProvider::new(config)?),
            "remote" => Arc::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Arc::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::Config(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )));
            }
        };

        Ok(Self {
            provider,
            params: GenerationParams::from_config(config),
        })
    }

    pub fn with_provider(provider: Arc<dyn CompletionProvider>, params: GenerationParams) -> Self {
        Self { provider, params }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = self.params.request(prompt);
        debug!(
            "Sending {} character prompt to {}",
            prompt.len(),
            self.provider.name()
        );
        self.provider.complete(&request).await
    }
}
