//! Shared harness for integration tests: a knowledge base over in-memory
//! metadata, a temp upload dir, the in-process index and scripted providers.

#![allow(dead_code)]

use async_trait::async_trait;
use knowledge_rag::config::{EmbeddingBackend, IndexBackend};
use knowledge_rag::index::{MemoryVectorIndex, VectorIndex};
use knowledge_rag::providers::{
    CompletionRequest, EmbeddingProvider, HashingEmbedder, LlmProvider, ProviderError,
};
use knowledge_rag::storage::{BlobStore, DocumentDb};
use knowledge_rag::{Components, DocumentView, KnowledgeBase, RagConfig, Result};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use uuid::Uuid;

pub const DIMS: usize = 64;

pub const EIFFEL: &str = "The Eiffel Tower is a wrought iron lattice tower in Paris. It was designed by the engineering company of Gustave Eiffel and finished in 1889 for the fair.";

pub const PHOTOSYNTHESIS: &str = "Photosynthesis is how green plants convert sunlight into chemical energy. Chlorophyll in the leaves absorbs light and stores the energy as sugar.";

/// Two paragraphs that chunk into exactly two chunks under [`test_config`]
pub fn two_paragraphs() -> String {
    format!("{}\n\n{}", EIFFEL, PHOTOSYNTHESIS)
}

pub fn test_config(data_dir: &Path) -> RagConfig {
    let mut config = RagConfig::default();
    config.storage.data_dir = data_dir.to_path_buf();
    config.embeddings.provider = EmbeddingBackend::Hashing;
    config.embeddings.dimensions = DIMS;
    config.embeddings.max_retries = 0;
    config.embeddings.retry_base_delay_ms = 1;
    config.llm.max_retries = 0;
    config.llm.retry_base_delay_ms = 1;
    config.vector_db.backend = IndexBackend::Memory;
    config.vector_db.retry_base_delay_ms = 1;
    config.chunking.max_chunk_size = 200;
    config.chunking.overlap_size = 20;
    config.processing.parallel_documents = Some(2);
    config
}

/// Completion provider that always cites the first source
#[derive(Default)]
pub struct CitingLlm {
    prompts: Mutex<Vec<String>>,
}

impl CitingLlm {
    pub const REPLY: &'static str = "Plants convert sunlight into chemical energy [S1].";

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().last().cloned()
    }
}

#[async_trait]
impl LlmProvider for CitingLlm {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, ProviderError> {
        self.prompts.lock().push(request.prompt.clone());
        Ok(Self::REPLY.to_string())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "citing"
    }

    fn model(&self) -> &str {
        "test"
    }
}

/// Hashing embedder that can be switched off
pub struct SwitchableEmbedder {
    inner: HashingEmbedder,
    down: AtomicBool,
}

impl SwitchableEmbedder {
    pub fn new(down: bool) -> Self {
        Self {
            inner: HashingEmbedder::new(DIMS),
            down: AtomicBool::new(down),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for SwitchableEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("embedding service offline".into()));
        }
        Ok(texts.iter().map(|t| self.inner.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.down.load(Ordering::SeqCst))
    }

    fn name(&self) -> &str {
        "switchable"
    }
}

/// Hashing embedder that blocks every batch until the test opens the gate
pub struct GatedEmbedder {
    inner: HashingEmbedder,
    gate: Semaphore,
}

impl GatedEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingEmbedder::new(DIMS),
            gate: Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl EmbeddingProvider for GatedEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ProviderError::Unavailable("gate closed".into()))?;
        Ok(texts.iter().map(|t| self.inner.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "gated"
    }
}

pub struct Harness {
    pub kb: Arc<KnowledgeBase>,
    pub db: DocumentDb,
    pub index: Arc<dyn VectorIndex>,
    pub llm: Arc<CitingLlm>,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_embedder(Arc::new(HashingEmbedder::new(DIMS))).await
    }

    pub async fn with_embedder(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = DocumentDb::in_memory().unwrap();
        Self::start(dir, db, embedder).await
    }

    /// Start a service over existing metadata and uploads
    pub async fn start(dir: TempDir, db: DocumentDb, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let config = test_config(dir.path());
        Self::start_with_config(dir, db, embedder, config).await
    }

    pub async fn start_with_config(
        dir: TempDir,
        db: DocumentDb,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RagConfig,
    ) -> Self {
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(DIMS));
        let llm = Arc::new(CitingLlm::default());

        let components = Components {
            db: db.clone(),
            blobs: Arc::new(BlobStore::new(config.storage.uploads_path()).unwrap()),
            index: index.clone(),
            embedder,
            llm: llm.clone(),
        };
        let kb = KnowledgeBase::start(config, components).await.unwrap();

        Self {
            kb,
            db,
            index,
            llm,
            dir,
        }
    }

    /// Simulate a process restart: fresh service and index, same metadata and uploads
    pub async fn restart(self) -> Self {
        self.restart_with(Arc::new(HashingEmbedder::new(DIMS))).await
    }

    pub async fn restart_with(self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let Harness { db, dir, .. } = self;
        Self::start(dir, db, embedder).await
    }

    pub async fn upload_text(&self, owner: &str, filename: &str, text: &str) -> Uuid {
        self.kb
            .upload(owner, filename, Some("text/plain"), text.as_bytes())
            .await
            .unwrap()
            .document_id
    }

    /// Poll until the document is ready or failed
    pub async fn wait_for_terminal(&self, owner: &str, id: Uuid) -> DocumentView {
        for _ in 0..500 {
            let view = self.kb.status(owner, id).unwrap();
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("document {} never reached a terminal status", id);
    }

    /// Poll until the ingestion queue has nothing waiting or running
    pub async fn wait_until_idle(&self) {
        for _ in 0..500 {
            let stats = self.kb.queue_stats();
            if stats.queued == 0 && stats.active == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("ingestion queue never drained");
    }
}
