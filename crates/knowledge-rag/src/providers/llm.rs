//! LLM provider trait for answer generation

use async_trait::async_trait;

use super::ProviderError;
use crate::error::Result;

/// A single completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Instructions that frame the answer
    pub system: String,
    /// Question plus numbered sources
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Trait for text generation
///
/// Implementations:
/// - `OllamaLlm`: Local Ollama server
/// - `OpenAiChat`: OpenAI-compatible chat completions
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion; one upstream request per call
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ProviderError>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model name being used
    fn model(&self) -> &str;
}
