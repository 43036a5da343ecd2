//! Ollama-backed providers for embeddings and generation

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::embedding::EmbeddingProvider;
use super::llm::{CompletionRequest, LlmProvider};
use super::ProviderError;
use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::{Error, Result};

/// Thin HTTP client for the Ollama API. Single attempt per call; retries are
/// applied by the caller.
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Embed a batch with `/api/embed`
    pub async fn embed(
        &self,
        model: &str,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest { model, input: texts })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("embedding response: {}", e)))?;

        Ok(parsed.embeddings)
    }

    /// Non-streaming generation with `/api/generate`
    pub async fn generate(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> std::result::Result<String, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            system: &request.system,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("generation response: {}", e)))?;

        Ok(parsed.response)
    }
}

/// Ollama embedding provider using nomic-embed-text or similar models
pub struct OllamaEmbedder {
    client: Arc<OllamaClient>,
    dimensions: usize,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: Arc::new(OllamaClient::new(&config.base_url, config.timeout())?),
            dimensions: config.dimensions,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        self.client.embed(&self.model, texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        64
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Ollama LLM provider for answer generation
pub struct OllamaLlm {
    client: Arc<OllamaClient>,
    model: String,
}

impl OllamaLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: Arc::new(OllamaClient::new(&config.base_url, config.timeout())?),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaLlm {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, ProviderError> {
        tracing::info!("Generating answer with model: {}", self.model);
        self.client.generate(&self.model, request).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
