//! Embedding provider trait for generating text embeddings

use async_trait::async_trait;

use super::ProviderError;
use crate::error::Result;

/// Trait for generating text embeddings
///
/// Implementations:
/// - `OllamaEmbedder`: Local Ollama server (nomic-embed-text)
/// - `OpenAiEmbedder`: OpenAI-compatible `/v1/embeddings`
/// - `HashingEmbedder`: Offline feature hashing
///
/// A single call embeds one batch and makes exactly one upstream request.
/// Batching, concurrency, timeouts and retries belong to
/// [`EmbeddingClient`](crate::embeddings::EmbeddingClient).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order
    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;

    /// Get embedding dimensions (e.g., 768 for nomic-embed-text)
    fn dimensions(&self) -> usize;

    /// Largest batch the provider accepts in one request
    fn max_batch_size(&self) -> usize {
        256
    }

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
