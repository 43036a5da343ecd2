//! Provider abstractions for embeddings and answer generation
//!
//! Trait-based so the pipeline can switch between a local Ollama server, an
//! OpenAI-compatible endpoint, or the offline hashing embedder.

pub mod embedding;
pub mod hashing;
pub mod llm;
pub mod ollama;
pub mod openai;

pub use embedding::EmbeddingProvider;
pub use hashing::HashingEmbedder;
pub use llm::{CompletionRequest, LlmProvider};
pub use ollama::{OllamaClient, OllamaEmbedder, OllamaLlm};
pub use openai::{OpenAiChat, OpenAiClient, OpenAiEmbedder};

use reqwest::StatusCode;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{EmbeddingBackend, EmbeddingConfig, LlmBackend, LlmConfig};
use crate::error::Result;

/// Failure reported by an external provider call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// No response within the per-request timeout
    #[error("request timed out")]
    Timeout,
    /// Provider asked us to slow down
    #[error("rate limited by provider")]
    RateLimited,
    /// Connection failure or 5xx
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// Provider refused the request (4xx other than 429)
    #[error("request rejected: {0}")]
    Rejected(String),
    /// Response did not have the expected shape
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Whether a retry might succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout | ProviderError::RateLimited | ProviderError::Unavailable(_)
        )
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>());
        if status == StatusCode::TOO_MANY_REQUESTS {
            ProviderError::RateLimited
        } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            ProviderError::Timeout
        } else if status.is_server_error() {
            ProviderError::Unavailable(detail)
        } else {
            ProviderError::Rejected(detail)
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status, &err.to_string())
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

/// Build the embedding provider selected in config
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(config)?),
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbedder::new(config)?),
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(config.dimensions)),
    };
    Ok(provider)
}

/// Build the completion provider selected in config
pub fn build_llm(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider {
        LlmBackend::Ollama => Arc::new(OllamaLlm::new(config)?),
        LlmBackend::OpenAi => Arc::new(OpenAiChat::new(config)?),
    };
    Ok(provider)
}
