//! Owner-scoped vector index
//!
//! Two implementations share the [`VectorIndex`] contract: an in-process map
//! for development and tests, and a SQLite-backed index that survives
//! restarts. Both score by cosine similarity with a brute-force scan over the
//! querying owner's entries.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryVectorIndex;
pub use sqlite::SqliteVectorIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::Chunk;

/// Characters of chunk text kept alongside each vector
pub const EXCERPT_CHARS: usize = 1000;

/// A vector plus the metadata needed to filter and resolve it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub owner_id: String,
    /// Leading slice of the chunk text
    pub excerpt: String,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            owner_id: chunk.owner_id.clone(),
            excerpt: chunk.content.chars().take(EXCERPT_CHARS).collect(),
            vector,
        }
    }
}

/// One query match
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub score: f32,
}

/// Trait for vector index backends
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries by chunk id; all-or-nothing on dimension errors
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Top `top_k` entries of `owner_id`, best first, ties by chunk id ascending
    async fn query(&self, vector: &[f32], owner_id: &str, top_k: usize) -> Result<Vec<IndexHit>> {
        self.query_within(vector, owner_id, &[], top_k).await
    }

    /// Like [`VectorIndex::query`], limited to entries of `document_ids`.
    /// An empty slice means every document of the owner.
    async fn query_within(
        &self,
        vector: &[f32],
        owner_id: &str,
        document_ids: &[Uuid],
        top_k: usize,
    ) -> Result<Vec<IndexHit>>;

    /// Remove every entry of a document; returns how many were removed
    async fn delete_document(&self, document_id: Uuid) -> Result<usize>;

    /// Entries stored for a document
    async fn count_for_document(&self, document_id: Uuid) -> Result<usize>;

    /// Total entries across all owners
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Fixed vector dimensionality
    fn dimensions(&self) -> usize;

    /// Check if the index is usable
    async fn health_check(&self) -> Result<bool>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Cosine similarity; zero when either vector has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub(crate) fn check_dimensions(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Sort best-first with a deterministic tiebreak and keep `top_k`.
/// NaN scores sort after every real score.
pub(crate) fn rank(mut hits: Vec<IndexHit>, top_k: usize) -> Vec<IndexHit> {
    fn key(score: f32) -> f32 {
        if score.is_nan() {
            f32::NEG_INFINITY
        } else {
            score
        }
    }
    hits.sort_by(|a, b| {
        key(b.score)
            .total_cmp(&key(a.score))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(top_k);
    hits
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share

    use super::*;

    pub fn entry(owner: &str, document_id: Uuid, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk_id: Uuid::new_v4(),
            document_id,
            owner_id: owner.to_string(),
            excerpt: "excerpt".to_string(),
            vector,
        }
    }

    pub async fn owner_isolation(index: &dyn VectorIndex) {
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        index
            .upsert(&[
                entry("alice", doc_a, vec![1.0, 0.0, 0.0]),
                entry("bob", doc_b, vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0, 0.0], "alice", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, doc_a);
        assert!(index.query(&[1.0, 0.0, 0.0], "carol", 10).await.unwrap().is_empty());
    }

    pub async fn ranking_and_ties(index: &dyn VectorIndex) {
        let doc = Uuid::new_v4();
        let best = entry("alice", doc, vec![1.0, 0.0, 0.0]);
        let tie_a = entry("alice", doc, vec![0.0, 1.0, 0.0]);
        let tie_b = entry("alice", doc, vec![0.0, 1.0, 0.0]);
        index.upsert(&[tie_a.clone(), best.clone(), tie_b.clone()]).await.unwrap();

        let hits = index.query(&[0.9, 0.1, 0.0], "alice", 3).await.unwrap();
        assert_eq!(hits[0].chunk_id, best.chunk_id);
        let expected_tie_order = if tie_a.chunk_id < tie_b.chunk_id {
            [tie_a.chunk_id, tie_b.chunk_id]
        } else {
            [tie_b.chunk_id, tie_a.chunk_id]
        };
        assert_eq!([hits[1].chunk_id, hits[2].chunk_id], expected_tie_order);

        let top1 = index.query(&[0.9, 0.1, 0.0], "alice", 1).await.unwrap();
        assert_eq!(top1.len(), 1);
    }

    pub async fn document_scoping(index: &dyn VectorIndex) {
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let doc_bob = Uuid::new_v4();
        index
            .upsert(&[
                entry("alice", doc_a, vec![1.0, 0.0, 0.0]),
                entry("alice", doc_b, vec![0.9, 0.1, 0.0]),
                entry("alice", doc_b, vec![0.0, 1.0, 0.0]),
                entry("bob", doc_bob, vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index
            .query_within(&[1.0, 0.0, 0.0], "alice", &[doc_b], 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.document_id == doc_b));

        let all = index.query_within(&[1.0, 0.0, 0.0], "alice", &[], 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].document_id, doc_a);

        // Scoping to another owner's document never crosses the owner boundary
        assert!(index
            .query_within(&[1.0, 0.0, 0.0], "alice", &[doc_bob], 10)
            .await
            .unwrap()
            .is_empty());
        assert!(index
            .query_within(&[1.0, 0.0, 0.0], "alice", &[Uuid::new_v4()], 10)
            .await
            .unwrap()
            .is_empty());
    }

    pub async fn idempotent_upsert_and_delete(index: &dyn VectorIndex) {
        let doc = Uuid::new_v4();
        let mut e = entry("alice", doc, vec![1.0, 0.0, 0.0]);
        index.upsert(&[e.clone()]).await.unwrap();
        e.vector = vec![0.0, 1.0, 0.0];
        index.upsert(&[e.clone()]).await.unwrap();

        assert_eq!(index.count_for_document(doc).await.unwrap(), 1);
        let hits = index.query(&[0.0, 1.0, 0.0], "alice", 5).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        assert_eq!(index.delete_document(doc).await.unwrap(), 1);
        assert_eq!(index.delete_document(doc).await.unwrap(), 0);
        assert_eq!(index.count_for_document(doc).await.unwrap(), 0);
        assert!(index.is_empty().await.unwrap());
    }

    pub async fn dimension_checks(index: &dyn VectorIndex) {
        let doc = Uuid::new_v4();
        let result = index
            .upsert(&[
                entry("alice", doc, vec![1.0, 0.0, 0.0]),
                entry("alice", doc, vec![1.0, 0.0]),
            ])
            .await;
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert_eq!(index.count_for_document(doc).await.unwrap(), 0);

        assert!(matches!(
            index.query(&[1.0], "alice", 1).await,
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
