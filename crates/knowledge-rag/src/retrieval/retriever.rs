//! Query embedding, index lookup and chunk resolution

use std::sync::Arc;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingClient;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::retry::RetryPolicy;
use crate::storage::DocumentDb;
use crate::types::{QueryResult, ScoredChunk};

/// Finds the chunks of one owner's ready documents most similar to a query
pub struct Retriever {
    db: DocumentDb,
    embedder: Arc<EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    index_retry: RetryPolicy,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        db: DocumentDb,
        embedder: Arc<EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            index,
            index_retry: RetryPolicy::none(),
            config,
        }
    }

    /// Retry transient index failures on lookup
    pub fn with_index_retry(mut self, policy: RetryPolicy) -> Self {
        self.index_retry = policy;
        self
    }

    /// Requested `top_k` clamped to `[1, max_top_k]`
    pub fn effective_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_top_k)
            .clamp(1, self.config.max_top_k.max(1))
    }

    /// Retrieve up to `top_k` chunks for `query`, best first.
    ///
    /// Chunks of documents that are not ready, are being deleted, or belong to
    /// another owner are never returned. An owner with nothing indexed gets an
    /// empty result.
    pub async fn retrieve(&self, query: &str, owner_id: &str, top_k: Option<usize>) -> Result<QueryResult> {
        self.retrieve_within(query, owner_id, &[], top_k).await
    }

    /// Like [`Retriever::retrieve`], limited to the given documents of the
    /// owner. An empty `document_ids` searches all of them.
    pub async fn retrieve_within(
        &self,
        query: &str,
        owner_id: &str,
        document_ids: &[Uuid],
        top_k: Option<usize>,
    ) -> Result<QueryResult> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::invalid_input("query must not be empty"));
        }

        let top_k = self.effective_top_k(top_k);
        let vector = self.embedder.embed_query(query).await?;
        if vector.len() != self.index.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: self.index.dimensions(),
                actual: vector.len(),
            });
        }

        // Over-fetch so chunks hidden by document state don't starve the result
        let fetch = top_k.saturating_mul(self.config.overfetch_factor.max(1));
        let hits = self
            .index_retry
            .run("Index query", Error::is_transient, || {
                self.index.query_within(&vector, owner_id, document_ids, fetch)
            })
            .await?;
        if hits.is_empty() {
            tracing::debug!("No index entries for owner '{}'", owner_id);
            return Ok(QueryResult::default());
        }

        let ids: Vec<_> = hits.iter().map(|h| h.chunk_id).collect();
        let mut visible = self.db.get_visible_chunks(&ids, owner_id)?;

        let chunks: Vec<ScoredChunk> = hits
            .iter()
            .filter_map(|hit| {
                visible.remove(&hit.chunk_id).map(|(chunk, filename)| ScoredChunk {
                    chunk,
                    filename,
                    score: hit.score,
                })
            })
            .take(top_k)
            .collect();

        tracing::debug!(
            "Retrieved {} of {} candidate chunks for owner '{}'",
            chunks.len(),
            hits.len(),
            owner_id
        );
        Ok(QueryResult::new(chunks))
    }
}
