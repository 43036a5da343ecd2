//! Answer synthesis from retrieved chunks

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::providers::{CompletionRequest, LlmProvider, ProviderError};
use crate::retry::RetryPolicy;
use crate::types::{Answer, QueryResult};

use super::citation::extract_citations;
use super::prompt::PromptBuilder;

pub struct AnswerSynthesizer {
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    timeout: Duration,
    temperature: f32,
    max_tokens: u32,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &LlmConfig) -> Self {
        Self {
            llm,
            retry: config.retry_policy(),
            timeout: config.timeout(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    /// Answer `question` from `sources`, citing them by tag.
    ///
    /// With no sources the fixed insufficient-information answer is returned
    /// and the model is not called.
    pub async fn synthesize(&self, question: &str, sources: &QueryResult) -> Result<Answer> {
        let start = Instant::now();
        if sources.is_empty() {
            return Ok(Answer::insufficient_information());
        }

        let request = CompletionRequest {
            system: PromptBuilder::system_prompt().to_string(),
            prompt: PromptBuilder::build_rag_prompt(question, sources),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(
            "Generating answer from {} sources with {} ({})",
            sources.len(),
            self.llm.name(),
            self.llm.model()
        );

        let raw = self
            .retry
            .run("Answer generation", ProviderError::is_transient, || async {
                tokio::time::timeout(self.timeout, self.llm.complete(&request))
                    .await
                    .map_err(|_| ProviderError::Timeout)?
            })
            .await
            .map_err(|e| {
                tracing::error!("Answer generation failed: {}", e);
                Error::SynthesisUnavailable(e.to_string())
            })?;

        let (answer, citations) = extract_citations(&raw, sources);
        tracing::info!(
            "Generated answer with {} citations from {} sources",
            citations.len(),
            sources.len()
        );

        Ok(Answer {
            answer,
            citations,
            insufficient_information: false,
            chunks_retrieved: sources.len(),
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}
