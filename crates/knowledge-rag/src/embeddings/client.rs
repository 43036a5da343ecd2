//! Batched, retrying embedding client
//!
//! Wraps an [`EmbeddingProvider`] with the policies the pipeline relies on:
//! inputs are split into provider-sized batches, a bounded number of batches
//! run concurrently, each request has its own timeout, and transient failures
//! are retried with exponential backoff. Output order always matches input
//! order.

use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::providers::{EmbeddingProvider, ProviderError};
use crate::retry::RetryPolicy;

pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_concurrent_batches: usize,
    timeout: Duration,
    retry: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self::with_settings(
            provider,
            config.batch_size,
            config.max_concurrent_batches,
            config.timeout(),
            config.retry_policy(),
        )
    }

    pub fn with_settings(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        max_concurrent_batches: usize,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let batch_size = batch_size.min(provider.max_batch_size()).max(1);
        Self {
            provider,
            batch_size,
            max_concurrent_batches: max_concurrent_batches.max(1),
            timeout,
            retry,
        }
    }

    /// Vector length produced by the underlying provider
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Effective batch size after the provider's limit is applied
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed all texts; the i-th vector corresponds to the i-th text.
    ///
    /// Fails with `EmbeddingUnavailable` if any batch still fails after retries.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<Vec<String>> = texts.chunks(self.batch_size).map(<[String]>::to_vec).collect();
        let total = batches.len();
        tracing::debug!(
            "Embedding {} texts in {} batches via {}",
            texts.len(),
            total,
            self.provider.name()
        );

        let results: Vec<Vec<Vec<f32>>> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| async move { self.embed_batch(index, total, &batch).await })
            .buffered(self.max_concurrent_batches)
            .try_collect()
            .await?;

        Ok(results.into_iter().flatten().collect())
    }

    /// Embed a single query string
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("provider returned no vector".into()))
    }

    async fn embed_batch(&self, index: usize, total: usize, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let label = format!("Embedding batch {}/{}", index + 1, total);
        self.retry
            .run(&label, ProviderError::is_transient, || async {
                let vectors = tokio::time::timeout(self.timeout, self.provider.embed_batch(batch))
                    .await
                    .map_err(|_| ProviderError::Timeout)??;

                if vectors.len() != batch.len() {
                    return Err(ProviderError::Malformed(format!(
                        "expected {} vectors, got {}",
                        batch.len(),
                        vectors.len()
                    )));
                }
                Ok(vectors)
            })
            .await
            .map_err(|e| {
                tracing::error!("{} failed: {}", label, e);
                Error::EmbeddingUnavailable(e.to_string())
            })
    }
}
