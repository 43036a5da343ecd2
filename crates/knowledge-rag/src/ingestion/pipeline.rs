//! Per-document ingestion state machine
//!
//! `pending → processing → ready | failed`. Nothing becomes retrievable until
//! every chunk has an embedding: index entries are written in one upsert after
//! embedding finishes, and the document row flips to `ready` last. A deletion
//! that lands while a document is being processed wins; the work is rolled
//! back instead of committed.

use std::sync::Arc;

use crate::config::EmptyDocumentPolicy;
use crate::embeddings::EmbeddingClient;
use crate::error::{Error, Result};
use crate::index::{IndexEntry, VectorIndex};
use crate::processing::DocumentLocks;
use crate::retry::RetryPolicy;
use crate::storage::{BlobStore, DocumentDb};
use crate::types::{Chunk, DeletionState, Document, DocumentStatus};

use super::{Extractor, TextChunker};

/// How an ingestion attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Document is ready with this many chunks
    Ready { chunks: usize },
    /// Document was marked failed
    Failed { code: String, reason: String },
    /// Document was gone, being deleted, or not pending; nothing was written
    Discarded,
}

pub struct IngestionPipeline {
    db: DocumentDb,
    blobs: Arc<BlobStore>,
    extractor: Extractor,
    chunker: TextChunker,
    embedder: Arc<EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    locks: DocumentLocks,
    index_retry: RetryPolicy,
    empty_policy: EmptyDocumentPolicy,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DocumentDb,
        blobs: Arc<BlobStore>,
        extractor: Extractor,
        chunker: TextChunker,
        embedder: Arc<EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        locks: DocumentLocks,
        index_retry: RetryPolicy,
        empty_policy: EmptyDocumentPolicy,
    ) -> Self {
        Self {
            db,
            blobs,
            extractor,
            chunker,
            embedder,
            index,
            locks,
            index_retry,
            empty_policy,
        }
    }

    /// Run one document through extraction, chunking, embedding and indexing.
    ///
    /// Per-document failures end up in the returned outcome; `Err` is only
    /// returned when the document row cannot be read or claimed.
    pub async fn ingest(&self, document_id: uuid::Uuid) -> Result<IngestOutcome> {
        let Some(doc) = self.db.get_document(document_id)? else {
            tracing::debug!("Document {} no longer exists, skipping", document_id);
            return Ok(IngestOutcome::Discarded);
        };
        if doc.deletion_state != DeletionState::None {
            tracing::debug!("[{}] Being deleted, skipping", doc.filename);
            return Ok(IngestOutcome::Discarded);
        }
        if !self
            .db
            .transition_status(doc.id, DocumentStatus::Pending, DocumentStatus::Processing)?
        {
            tracing::debug!("[{}] Not pending ({}), skipping", doc.filename, doc.status.as_str());
            return Ok(IngestOutcome::Discarded);
        }

        tracing::info!("[{}] Ingesting {} ({} bytes)", doc.filename, doc.id, doc.size_bytes);
        let start = std::time::Instant::now();

        let outcome = match self.prepare(&doc).await {
            Ok((chunks, vectors)) => self.commit(&doc, chunks, vectors).await?,
            Err(e) => {
                let _guard = self.locks.lock(doc.id).await;
                self.fail(&doc, e).await?
            }
        };

        if let IngestOutcome::Ready { chunks } = outcome {
            tracing::info!(
                "[{}] COMPLETE: {} chunks indexed in {:.1}s",
                doc.filename,
                chunks,
                start.elapsed().as_secs_f64()
            );
        }
        Ok(outcome)
    }

    /// Fail a document whose ingestion was cut short from outside, such as by
    /// the worker's timeout
    pub async fn abandon(&self, document_id: uuid::Uuid, error: Error) -> Result<IngestOutcome> {
        let _guard = self.locks.lock(document_id).await;
        match self.db.get_document(document_id)? {
            Some(doc) if doc.status == DocumentStatus::Processing => self.fail(&doc, error).await,
            _ => Ok(IngestOutcome::Discarded),
        }
    }

    /// Everything up to (not including) the first write
    async fn prepare(&self, doc: &Document) -> Result<(Vec<Chunk>, Vec<Vec<f32>>)> {
        let data = self.blobs.get(&doc.storage_location).await?;

        tracing::debug!("[{}] Extracting text", doc.filename);
        let extractor = self.extractor.clone();
        let media_type = doc.media_type;
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&data, media_type))
            .await
            .map_err(|e| Error::extraction(format!("extraction task failed: {}", e)))??;

        let chunks = match self.chunker.chunk_document(doc, &extracted) {
            Ok(chunks) => chunks,
            Err(Error::EmptyDocument) if self.empty_policy == EmptyDocumentPolicy::Ready => {
                tracing::info!("[{}] No text found, marking ready with zero chunks", doc.filename);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        tracing::info!("[{}] Created {} chunks, generating embeddings...", doc.filename, chunks.len());
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let expected = self.index.dimensions();
        for vector in &vectors {
            if vector.len() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        Ok((chunks, vectors))
    }

    /// Store chunk rows and index entries, then flip the row to `ready`
    async fn commit(
        &self,
        doc: &Document,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<IngestOutcome> {
        let _guard = self.locks.lock(doc.id).await;

        if !self.still_processing(doc.id)? {
            tracing::info!("[{}] Deleted during ingestion, discarding results", doc.filename);
            self.rollback(doc).await;
            return Ok(IngestOutcome::Discarded);
        }

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, vector))
            .collect();

        tracing::info!("[{}] Storing {} chunks in vector index...", doc.filename, chunks.len());
        if let Err(e) = self.store(doc, &chunks, &entries).await {
            return self.fail(doc, e).await;
        }

        match self.db.mark_ready(doc.id, chunks.len() as u32) {
            Ok(true) => Ok(IngestOutcome::Ready {
                chunks: chunks.len(),
            }),
            Ok(false) => {
                self.rollback(doc).await;
                Ok(IngestOutcome::Discarded)
            }
            Err(e) => self.fail(doc, e).await,
        }
    }

    async fn store(&self, doc: &Document, chunks: &[Chunk], entries: &[IndexEntry]) -> Result<()> {
        self.db.replace_chunks(doc.id, chunks)?;
        if entries.is_empty() {
            return Ok(());
        }
        let label = format!("[{}] Index upsert", doc.filename);
        self.index_retry
            .run(&label, Error::is_transient, || self.index.upsert(entries))
            .await
    }

    fn still_processing(&self, document_id: uuid::Uuid) -> Result<bool> {
        Ok(matches!(
            self.db.get_document(document_id)?,
            Some(current) if current.status == DocumentStatus::Processing
                && current.deletion_state == DeletionState::None
        ))
    }

    /// Roll back and record the failure; caller holds the document lock
    async fn fail(&self, doc: &Document, error: Error) -> Result<IngestOutcome> {
        tracing::error!("[{}] FAILED: {}", doc.filename, error);
        self.rollback(doc).await;

        let code = error.code().to_string();
        let reason = error.to_string();
        match self.db.mark_failed(doc.id, &code, &reason) {
            Ok(false) => Ok(IngestOutcome::Discarded),
            Ok(true) => Ok(IngestOutcome::Failed { code, reason }),
            Err(e) => {
                // Row stays `processing`; startup recovery puts it back to pending
                tracing::error!("[{}] Could not record failure: {}", doc.filename, e);
                Ok(IngestOutcome::Failed { code, reason })
            }
        }
    }

    /// Best effort: remove whatever this attempt may have written
    async fn rollback(&self, doc: &Document) {
        if let Err(e) = self.index.delete_document(doc.id).await {
            tracing::warn!("[{}] Rollback could not clear index entries: {}", doc.filename, e);
        }
        if let Err(e) = self.db.delete_chunks(doc.id) {
            tracing::warn!("[{}] Rollback could not remove chunk rows: {}", doc.filename, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryVectorIndex;
    use crate::providers::{EmbeddingProvider, HashingEmbedder, ProviderError};
    use async_trait::async_trait;
    use std::time::Duration;

    const DIMS: usize = 32;

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingProvider for DownEmbedder {
        async fn embed_batch(
            &self,
            _texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            Err(ProviderError::Unavailable("connection refused".into()))
        }

        fn dimensions(&self) -> usize {
            DIMS
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(false)
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        db: DocumentDb,
        blobs: Arc<BlobStore>,
        index: Arc<MemoryVectorIndex>,
        pipeline: IngestionPipeline,
    }

    fn harness(provider: Arc<dyn EmbeddingProvider>, policy: EmptyDocumentPolicy) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = DocumentDb::in_memory().unwrap();
        let blobs = Arc::new(BlobStore::new(dir.path()).unwrap());
        let index = Arc::new(MemoryVectorIndex::new(DIMS));
        let embedder = Arc::new(EmbeddingClient::with_settings(
            provider,
            8,
            2,
            Duration::from_secs(5),
            RetryPolicy::none(),
        ));
        let pipeline = IngestionPipeline::new(
            db.clone(),
            blobs.clone(),
            Extractor::new(1024 * 1024),
            TextChunker::new(60, 10).unwrap(),
            embedder,
            index.clone(),
            DocumentLocks::new(),
            RetryPolicy::none(),
            policy,
        );
        Harness {
            _dir: dir,
            db,
            blobs,
            index,
            pipeline,
        }
    }

    async fn upload(h: &Harness, text: &str) -> Document {
        let mut doc = Document::new(
            "alice",
            "notes.txt",
            crate::types::MediaType::PlainText,
            text.len() as u64,
            "hash".into(),
        );
        doc.storage_location = h.blobs.put(doc.id, text.as_bytes()).await.unwrap();
        h.db.insert_document(&doc).unwrap();
        doc
    }

    fn hashing() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashingEmbedder::new(DIMS))
    }

    #[tokio::test]
    async fn test_ingest_to_ready() {
        let h = harness(hashing(), EmptyDocumentPolicy::Fail);
        let doc = upload(
            &h,
            "Rust has ownership. Borrowing is checked at compile time.\n\nTokio runs async tasks on a work-stealing scheduler.",
        )
        .await;

        let outcome = h.pipeline.ingest(doc.id).await.unwrap();
        let IngestOutcome::Ready { chunks } = outcome.clone() else {
            panic!("expected ready, got {:?}", outcome);
        };
        assert!(chunks > 1);

        let stored = h.db.get_document(doc.id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Ready);
        assert_eq!(stored.chunk_count as usize, chunks);
        assert_eq!(h.db.get_chunks(doc.id).unwrap().len(), chunks);
        assert_eq!(h.index.count_for_document(doc.id).await.unwrap(), chunks);
    }

    #[tokio::test]
    async fn test_second_ingest_is_discarded() {
        let h = harness(hashing(), EmptyDocumentPolicy::Fail);
        let doc = upload(&h, "Some text worth indexing.").await;

        h.pipeline.ingest(doc.id).await.unwrap();
        assert_eq!(h.pipeline.ingest(doc.id).await.unwrap(), IngestOutcome::Discarded);
        assert_eq!(
            h.pipeline.ingest(uuid::Uuid::new_v4()).await.unwrap(),
            IngestOutcome::Discarded
        );
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_no_entries() {
        let h = harness(Arc::new(DownEmbedder), EmptyDocumentPolicy::Fail);
        let doc = upload(&h, "Text that will never be embedded.").await;

        let outcome = h.pipeline.ingest(doc.id).await.unwrap();
        assert!(matches!(
            outcome,
            IngestOutcome::Failed { ref code, .. } if code == "embedding_unavailable"
        ));

        let stored = h.db.get_document(doc.id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(stored.failure_reason.is_some());
        assert_eq!(h.index.count_for_document(doc.id).await.unwrap(), 0);
        assert!(h.db.get_chunks(doc.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_document_policy() {
        let h = harness(hashing(), EmptyDocumentPolicy::Fail);
        let doc = upload(&h, "   \n\t  ").await;
        assert!(matches!(
            h.pipeline.ingest(doc.id).await.unwrap(),
            IngestOutcome::Failed { ref code, .. } if code == "empty_document"
        ));

        let h = harness(hashing(), EmptyDocumentPolicy::Ready);
        let doc = upload(&h, "   \n\t  ").await;
        assert_eq!(
            h.pipeline.ingest(doc.id).await.unwrap(),
            IngestOutcome::Ready { chunks: 0 }
        );
        assert_eq!(h.db.get_document(doc.id).unwrap().unwrap().chunk_count, 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails() {
        let h = harness(Arc::new(HashingEmbedder::new(DIMS + 1)), EmptyDocumentPolicy::Fail);
        let doc = upload(&h, "Vectors of the wrong length.").await;

        assert!(matches!(
            h.pipeline.ingest(doc.id).await.unwrap(),
            IngestOutcome::Failed { ref code, .. } if code == "dimension_mismatch"
        ));
        assert!(h.index.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_deleting_document_is_skipped() {
        let h = harness(hashing(), EmptyDocumentPolicy::Fail);
        let doc = upload(&h, "Soon to be deleted.").await;
        h.db.set_deletion_state(doc.id, DeletionState::Deleting).unwrap();

        assert_eq!(h.pipeline.ingest(doc.id).await.unwrap(), IngestOutcome::Discarded);
        assert!(h.index.is_empty().await.unwrap());
    }

    /// Make any status change to `status` abort inside SQLite
    fn reject_status(h: &Harness, status: &str) {
        h.db.execute_batch(&format!(
            "CREATE TRIGGER reject_{status} BEFORE UPDATE OF status ON documents
             WHEN NEW.status = '{status}'
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;"
        ))
        .unwrap();
    }

    #[tokio::test]
    async fn test_ready_write_failure_rolls_back() {
        let h = harness(hashing(), EmptyDocumentPolicy::Fail);
        let doc = upload(&h, "Rust has ownership.\n\nTokio runs async tasks.").await;
        reject_status(&h, "ready");

        let outcome = h.pipeline.ingest(doc.id).await.unwrap();
        assert!(matches!(
            outcome,
            IngestOutcome::Failed { ref code, .. } if code == "database_error"
        ));

        let stored = h.db.get_document(doc.id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert_eq!(stored.failure_code.as_deref(), Some("database_error"));
        assert_eq!(h.index.count_for_document(doc.id).await.unwrap(), 0);
        assert!(h.db.get_chunks(doc.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unrecordable_failure_still_rolls_back() {
        let h = harness(hashing(), EmptyDocumentPolicy::Fail);
        let doc = upload(&h, "Rust has ownership.\n\nTokio runs async tasks.").await;
        reject_status(&h, "ready");
        reject_status(&h, "failed");

        let outcome = h.pipeline.ingest(doc.id).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Failed { .. }));
        assert_eq!(h.index.count_for_document(doc.id).await.unwrap(), 0);
        assert!(h.db.get_chunks(doc.id).unwrap().is_empty());

        // Left for startup recovery
        assert_eq!(
            h.db.get_document(doc.id).unwrap().unwrap().status,
            DocumentStatus::Processing
        );
        assert_eq!(h.db.reset_interrupted().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_abandon_marks_failed() {
        let h = harness(hashing(), EmptyDocumentPolicy::Fail);
        let doc = upload(&h, "Interrupted mid-flight.").await;
        h.db.transition_status(doc.id, DocumentStatus::Pending, DocumentStatus::Processing)
            .unwrap();

        let outcome = h
            .pipeline
            .abandon(doc.id, Error::internal("timed out"))
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Failed { .. }));
        assert_eq!(
            h.db.get_document(doc.id).unwrap().unwrap().status,
            DocumentStatus::Failed
        );
    }
}
