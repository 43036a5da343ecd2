//! OpenAI-compatible providers (`/v1/embeddings`, `/v1/chat/completions`)

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

/// HTTP client for OpenAI-style APIs
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    pub async fn health_check(&self) -> Result<bool> {
        let mut request = self.client.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        match request.send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    pub async fn embeddings(
        &self,
        model: &str,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let response = self
            .post("/embeddings")
            .json(&EmbeddingsRequest { model, input: texts })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("embeddings response: {}", e)))?;

        order_by_index(parsed.data, texts.len())
    }

    pub async fn chat(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> std::result::Result<String, ProviderError> {
        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self.post("/chat/completions").json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("chat response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Malformed("response has no choices".into()))
    }
}

/// The API may return items out of order; restore input order by `index`.
fn order_by_index(
    mut data: Vec<EmbeddingData>,
    expected: usize,
) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
    data.sort_by_key(|item| item.index);
    if data.len() != expected || data.iter().enumerate().any(|(i, item)| item.index != i) {
        return Err(ProviderError::Malformed(format!(
            "expected {} embeddings with contiguous indices, got {}",
            expected,
            data.len()
        )));
    }
    Ok(data.into_iter().map(|item| item.embedding).collect())
}

/// OpenAI-compatible embedding provider
pub struct OpenAiEmbedder {
    client: Arc<OpenAiClient>,
    dimensions: usize,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: Arc::new(OpenAiClient::new(
                &config.base_url,
                config.api_key(),
                config.timeout(),
            )?),
            dimensions: config.dimensions,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        self.client.embeddings(&self.model, texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        2048
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// OpenAI-compatible chat completion provider
pub struct OpenAiChat {
    client: Arc<OpenAiClient>,
    model: String,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: Arc::new(OpenAiClient::new(
                &config.base_url,
                config.api_key(),
                config.timeout(),
            )?),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiChat {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, ProviderError> {
        self.client.chat(&self.model, request).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_index_restores_input_order() {
        let data: Vec<EmbeddingData> = serde_json::from_str(
            r#"[{"index": 1, "embedding": [2.0]}, {"index": 0, "embedding": [1.0]}]"#,
        )
        .unwrap();
        let vectors = order_by_index(data, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_order_by_index_rejects_short_response() {
        let data: Vec<EmbeddingData> =
            serde_json::from_str(r#"[{"index": 0, "embedding": [1.0]}]"#).unwrap();
        assert!(matches!(order_by_index(data, 2), Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn test_chat_response_without_content() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
