//! The knowledge base service: every user-facing operation in one place
//!
//! Routes and tests talk to [`KnowledgeBase`]; it owns the stores, the
//! providers, and the background ingestion worker.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::config::{IndexBackend, RagConfig};
use crate::embeddings::EmbeddingClient;
use crate::error::{Error, Result};
use crate::generation::AnswerSynthesizer;
use crate::index::{IndexEntry, MemoryVectorIndex, SqliteVectorIndex, VectorIndex};
use crate::ingestion::{Extractor, IngestionPipeline, TextChunker};
use crate::processing::{DocumentLocks, IngestQueue, IngestionWorker, QueueStats};
use crate::providers::{self, EmbeddingProvider, LlmProvider};
use crate::retrieval::Retriever;
use crate::retry::RetryPolicy;
use crate::storage::{BlobStore, DocumentDb, DocumentDbStats};
use crate::types::{
    Answer, Chunk, DeletionState, Document, DocumentStatus, DocumentView, MediaType, SearchHit,
    SearchResponse, UploadReceipt,
};

/// Stores and providers the service is assembled from
pub struct Components {
    pub db: DocumentDb,
    pub blobs: Arc<BlobStore>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LlmProvider>,
}

impl Components {
    /// Open the stores and build the providers selected in `config`
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.storage.data_dir)?;

        let db = DocumentDb::new(config.storage.database_path())?;
        let blobs = Arc::new(BlobStore::new(config.storage.uploads_path())?);

        let dimensions = config.embeddings.dimensions;
        let index: Arc<dyn VectorIndex> = match config.vector_db.backend {
            IndexBackend::Sqlite => Arc::new(SqliteVectorIndex::open(
                config.storage.data_dir.join(&config.vector_db.index_file),
                dimensions,
            )?),
            IndexBackend::Memory => Arc::new(MemoryVectorIndex::new(dimensions)),
        };

        Ok(Self {
            db,
            blobs,
            index,
            embedder: providers::build_embedder(&config.embeddings)?,
            llm: providers::build_llm(&config.llm)?,
        })
    }
}

/// What startup recovery did
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ResumeReport {
    /// Documents found mid-ingestion and put back to pending
    pub interrupted: usize,
    /// Pending documents handed to the worker
    pub requeued: usize,
    /// Unfinished deletions completed
    pub deletions_finished: usize,
    /// Unfinished deletions that failed again
    pub deletions_incomplete: usize,
}

/// Dependency health, as reported by `/ready`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub database: bool,
    pub index: bool,
    pub embeddings: bool,
    pub llm: bool,
    pub documents: DocumentDbStats,
    pub indexed_chunks: usize,
    pub queue: QueueStats,
}

pub struct KnowledgeBase {
    config: RagConfig,
    db: DocumentDb,
    blobs: Arc<BlobStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<EmbeddingClient>,
    llm: Arc<dyn LlmProvider>,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    queue: IngestQueue,
    locks: DocumentLocks,
    index_retry: RetryPolicy,
}

impl KnowledgeBase {
    /// Build the service from config alone
    pub async fn from_config(config: RagConfig) -> Result<Arc<Self>> {
        let components = Components::from_config(&config)?;
        Self::start(config, components).await
    }

    /// Assemble the service, start the ingestion worker, and recover any
    /// work left over from a previous run
    pub async fn start(config: RagConfig, components: Components) -> Result<Arc<Self>> {
        config.validate()?;

        let Components {
            db,
            blobs,
            index,
            embedder,
            llm,
        } = components;

        if embedder.dimensions() != index.dimensions() {
            return Err(Error::Config(format!(
                "embedding provider '{}' produces {} dimensions but the index holds {}",
                embedder.name(),
                embedder.dimensions(),
                index.dimensions()
            )));
        }

        let embedder = Arc::new(EmbeddingClient::new(embedder, &config.embeddings));
        let chunker = TextChunker::new(config.chunking.max_chunk_size, config.chunking.overlap_size)?;
        let locks = DocumentLocks::new();
        let index_retry = config.vector_db.retry_policy();

        let pipeline = Arc::new(IngestionPipeline::new(
            db.clone(),
            blobs.clone(),
            Extractor::new(config.server.max_upload_size),
            chunker,
            embedder.clone(),
            index.clone(),
            locks.clone(),
            index_retry,
            config.chunking.empty_document_policy,
        ));

        let (queue, receiver) = IngestQueue::new(config.processing.queue_capacity);
        let worker = IngestionWorker::new(
            pipeline,
            queue.clone(),
            config.processing.effective_parallelism(),
            config.processing.document_timeout(),
        );
        tokio::spawn(worker.run(receiver));

        let retriever = Retriever::new(
            db.clone(),
            embedder.clone(),
            index.clone(),
            config.retrieval.clone(),
        )
        .with_index_retry(index_retry);
        let synthesizer = AnswerSynthesizer::new(llm.clone(), &config.llm);

        let kb = Arc::new(Self {
            config,
            db,
            blobs,
            index,
            embedder,
            llm,
            retriever,
            synthesizer,
            queue,
            locks,
            index_retry,
        });

        if kb.index.is_empty().await? {
            // On failure the index stays empty until `rebuild_index` succeeds
            match kb.rebuild_index().await {
                Ok(0) => {}
                Ok(rebuilt) => {
                    tracing::info!("Rebuilt {} index entries from stored chunks", rebuilt)
                }
                Err(e) => tracing::warn!(
                    "Index rebuild failed, starting with an empty index: {}",
                    e
                ),
            }
        }

        if kb.config.processing.resume_on_startup {
            let report = kb.resume().await?;
            tracing::info!(
                "Startup recovery: {} interrupted, {} requeued, {} deletions finished, {} still incomplete",
                report.interrupted,
                report.requeued,
                report.deletions_finished,
                report.deletions_incomplete
            );
        }

        tracing::info!(
            "Knowledge base ready (index: {}, embeddings: {}, llm: {})",
            kb.index.name(),
            kb.embedder.provider().name(),
            kb.llm.name()
        );
        Ok(kb)
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    // ==================== Documents ====================

    /// Accept an upload: store the bytes, record a pending document, and
    /// queue it for ingestion. Returns before any extraction happens.
    ///
    /// A full ingestion queue rejects the upload with `QueueFull` and keeps
    /// nothing of it.
    pub async fn upload(
        &self,
        owner_id: &str,
        filename: &str,
        declared_type: Option<&str>,
        data: &[u8],
    ) -> Result<UploadReceipt> {
        let owner_id = require_owner(owner_id)?;
        let filename = clean_filename(filename)?;

        let limit = self.config.server.max_upload_size;
        if data.len() > limit {
            return Err(Error::PayloadTooLarge { limit });
        }
        let media_type = MediaType::resolve(declared_type, &filename)?;

        let content_hash = hex::encode(Sha256::digest(data));
        let mut doc = Document::new(owner_id, filename, media_type, data.len() as u64, content_hash);
        doc.storage_location = self.blobs.put(doc.id, data).await?;

        if let Err(e) = self.db.insert_document(&doc) {
            self.discard_upload(&doc).await;
            return Err(e);
        }

        if let Err(e) = self.queue.try_enqueue(doc.id) {
            if let Err(cleanup) = self.db.delete_document_rows(doc.id) {
                tracing::warn!("Could not remove unqueued document {}: {}", doc.id, cleanup);
            }
            self.discard_upload(&doc).await;
            return Err(e);
        }
        tracing::info!(
            "Accepted '{}' ({}, {} bytes) as {}",
            doc.filename,
            media_type,
            doc.size_bytes,
            doc.id
        );

        Ok(UploadReceipt {
            document_id: doc.id,
            filename: doc.filename,
            media_type,
            size_bytes: doc.size_bytes,
            status: doc.status,
        })
    }

    async fn discard_upload(&self, doc: &Document) {
        if let Err(e) = self.blobs.delete(&doc.storage_location).await {
            tracing::warn!("Could not remove orphaned upload {}: {}", doc.id, e);
        }
    }

    pub fn status(&self, owner_id: &str, document_id: Uuid) -> Result<DocumentView> {
        let doc = self.visible_document(owner_id, document_id)?;
        Ok(DocumentView::from(&doc))
    }

    pub fn list(&self, owner_id: &str) -> Result<Vec<DocumentView>> {
        let owner_id = require_owner(owner_id)?;
        Ok(self
            .db
            .list_documents(owner_id)?
            .iter()
            .filter(|doc| doc.deletion_state == DeletionState::None)
            .map(DocumentView::from)
            .collect())
    }

    /// Stored chunks of a document, in order
    pub fn chunks(&self, owner_id: &str, document_id: Uuid) -> Result<Vec<Chunk>> {
        let doc = self.visible_document(owner_id, document_id)?;
        self.db.get_chunks(doc.id)
    }

    /// Send a failed document through ingestion again
    pub async fn retry(&self, owner_id: &str, document_id: Uuid) -> Result<DocumentView> {
        let doc = self.visible_document(owner_id, document_id)?;
        if doc.status != DocumentStatus::Failed {
            return Err(Error::Conflict(format!(
                "document {} is {}, only failed documents can be retried",
                doc.id,
                doc.status.as_str()
            )));
        }
        if !self.db.reset_for_retry(doc.id)? {
            return Err(Error::Conflict(format!("document {} changed state", doc.id)));
        }

        if let Err(e) = self.queue.try_enqueue(doc.id) {
            // Put the previous failure back so the retry can be asked for again
            let code = doc.failure_code.as_deref().unwrap_or("internal_error");
            let reason = doc.failure_reason.as_deref().unwrap_or_default();
            if let Err(restore) = self.db.mark_failed(doc.id, code, reason) {
                tracing::warn!("[{}] Could not restore failed status: {}", doc.filename, restore);
            }
            return Err(e);
        }
        tracing::info!("[{}] Retrying ingestion of {}", doc.filename, doc.id);
        self.status(owner_id, document_id)
    }

    /// Delete a document with its chunks, index entries and stored bytes.
    ///
    /// The document disappears from queries immediately. If its index entries
    /// cannot be removed the call fails with `DeletionIncomplete`; calling
    /// delete again, or restarting, finishes the job.
    pub async fn delete(&self, owner_id: &str, document_id: Uuid) -> Result<()> {
        let owner_id = require_owner(owner_id)?;
        let doc = self.db.get_owned_document(document_id, owner_id)?;
        self.finish_deletion(&doc).await
    }

    async fn finish_deletion(&self, doc: &Document) -> Result<()> {
        self.db.set_deletion_state(doc.id, DeletionState::Deleting)?;

        let guard = self.locks.lock(doc.id).await;

        let label = format!("[{}] Index delete", doc.filename);
        let removed = match self
            .index_retry
            .run(&label, Error::is_transient, || self.index.delete_document(doc.id))
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!("[{}] Deletion incomplete: {}", doc.filename, e);
                self.db.set_deletion_state(doc.id, DeletionState::Incomplete)?;
                return Err(Error::DeletionIncomplete(doc.id));
            }
        };

        self.db.delete_document_rows(doc.id)?;
        drop(guard);
        self.locks.forget(doc.id);

        if let Err(e) = self.blobs.delete(&doc.storage_location).await {
            tracing::warn!("[{}] Could not remove stored bytes: {}", doc.filename, e);
        }

        tracing::info!(
            "[{}] Deleted document {} ({} index entries)",
            doc.filename,
            doc.id,
            removed
        );
        Ok(())
    }

    fn visible_document(&self, owner_id: &str, document_id: Uuid) -> Result<Document> {
        let owner_id = require_owner(owner_id)?;
        let doc = self.db.get_owned_document(document_id, owner_id)?;
        if doc.deletion_state != DeletionState::None {
            return Err(Error::not_found(format!("document {}", document_id)));
        }
        Ok(doc)
    }

    // ==================== Queries ====================

    /// Semantic search over the owner's ready documents
    pub async fn search(&self, owner_id: &str, query: &str, top_k: Option<usize>) -> Result<SearchResponse> {
        self.search_within(owner_id, query, top_k, &[]).await
    }

    /// Search limited to some of the owner's documents; empty means all
    pub async fn search_within(
        &self,
        owner_id: &str,
        query: &str,
        top_k: Option<usize>,
        document_ids: &[Uuid],
    ) -> Result<SearchResponse> {
        let start = Instant::now();
        let owner_id = require_owner(owner_id)?;

        let result = self
            .retriever
            .retrieve_within(query, owner_id, document_ids, top_k)
            .await?;
        tracing::info!("Search \"{}\" returned {} results", query.trim(), result.len());

        Ok(SearchResponse {
            query: query.trim().to_string(),
            results: result.iter().map(SearchHit::from).collect(),
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Answer a question from the owner's documents, with citations
    pub async fn ask(&self, owner_id: &str, question: &str, top_k: Option<usize>) -> Result<Answer> {
        self.ask_within(owner_id, question, top_k, &[]).await
    }

    /// Answer from some of the owner's documents; empty means all
    pub async fn ask_within(
        &self,
        owner_id: &str,
        question: &str,
        top_k: Option<usize>,
        document_ids: &[Uuid],
    ) -> Result<Answer> {
        let start = Instant::now();
        let owner_id = require_owner(owner_id)?;

        tracing::info!(
            "Question: \"{}\" ({} documents in scope)",
            question.trim(),
            if document_ids.is_empty() {
                "all".to_string()
            } else {
                document_ids.len().to_string()
            }
        );
        let sources = self
            .retriever
            .retrieve_within(question, owner_id, document_ids, top_k)
            .await?;
        let mut answer = self.synthesizer.synthesize(question, &sources).await?;
        answer.processing_time_ms = start.elapsed().as_millis() as u64;
        Ok(answer)
    }

    // ==================== Maintenance ====================

    /// Recover from an unclean shutdown: finish pending deletions, put
    /// interrupted documents back to pending, and queue every pending one
    pub async fn resume(&self) -> Result<ResumeReport> {
        let mut report = ResumeReport::default();

        for doc in self.db.documents_pending_deletion()? {
            match self.finish_deletion(&doc).await {
                Ok(()) => report.deletions_finished += 1,
                Err(e) => {
                    tracing::warn!("[{}] Deletion still incomplete: {}", doc.filename, e);
                    report.deletions_incomplete += 1;
                }
            }
        }

        report.interrupted = self.db.reset_interrupted()?;
        for doc in self.db.documents_with_status(DocumentStatus::Pending)? {
            self.queue.enqueue(doc.id).await?;
            report.requeued += 1;
        }
        Ok(report)
    }

    /// Re-embed stored chunks of ready documents into the index; used when
    /// the index starts out empty, as the in-memory one always does
    pub async fn rebuild_index(&self) -> Result<usize> {
        let chunks = self.db.ready_chunks()?;
        if chunks.is_empty() {
            return Ok(0);
        }

        tracing::info!("Rebuilding index from {} stored chunks", chunks.len());
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, vector))
            .collect();
        self.index_retry
            .run("Index rebuild", Error::is_transient, || self.index.upsert(&entries))
            .await?;
        Ok(entries.len())
    }

    /// Check every dependency
    pub async fn health(&self) -> HealthReport {
        let documents = self.db.get_stats();
        let index = self.index.health_check().await.unwrap_or(false);
        let embeddings = self
            .embedder
            .provider()
            .health_check()
            .await
            .unwrap_or(false);
        let llm = self.llm.health_check().await.unwrap_or(false);
        let indexed_chunks = self.index.len().await.unwrap_or(0);

        let database = documents.is_ok();
        HealthReport {
            healthy: database && index && embeddings && llm,
            database,
            index,
            embeddings,
            llm,
            documents: documents.unwrap_or_default(),
            indexed_chunks,
            queue: self.queue.stats(),
        }
    }
}

fn require_owner(owner_id: &str) -> Result<&str> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(Error::Unauthorized("missing owner identity".into()));
    }
    Ok(owner_id)
}

/// Keep only the final path component of a client-supplied filename
fn clean_filename(filename: &str) -> Result<String> {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::invalid_input("filename must not be empty"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_filename() {
        assert_eq!(clean_filename("notes.md").unwrap(), "notes.md");
        assert_eq!(clean_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(clean_filename("C:\\docs\\report.pdf").unwrap(), "report.pdf");
        assert!(clean_filename("  ").is_err());
        assert!(clean_filename("dir/").is_err());
    }

    #[test]
    fn test_require_owner() {
        assert_eq!(require_owner(" alice ").unwrap(), "alice");
        assert!(matches!(require_owner(""), Err(Error::Unauthorized(_))));
    }
}
