//! Response types for uploads, searches and answers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::{Chunk, DeletionState, Document, DocumentStatus, MediaType};

/// Returned immediately when an upload is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub document_id: Uuid,
    pub filename: String,
    pub media_type: MediaType,
    pub size_bytes: u64,
    pub status: DocumentStatus,
}

/// Client-facing view of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentView {
    pub id: Uuid,
    pub filename: String,
    pub media_type: MediaType,
    pub size_bytes: u64,
    pub content_hash: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub chunk_count: u32,
    pub deletion_state: DeletionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Document> for DocumentView {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename.clone(),
            media_type: doc.media_type,
            size_bytes: doc.size_bytes,
            content_hash: doc.content_hash.clone(),
            status: doc.status,
            failure_code: doc.failure_code.clone(),
            failure_reason: doc.failure_reason.clone(),
            chunk_count: doc.chunk_count,
            deletion_state: doc.deletion_state,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

/// A retrieved chunk with its relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Filename of the parent document
    pub filename: String,
    /// Cosine similarity
    pub score: f32,
}

/// Ordered retrieval output, best first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub chunks: Vec<ScoredChunk>,
}

impl QueryResult {
    pub fn new(chunks: Vec<ScoredChunk>) -> Self {
        Self { chunks }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredChunk> {
        self.chunks.iter()
    }
}

/// One semantic search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub filename: String,
    pub ordinal: u32,
    pub char_start: usize,
    pub char_end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub content: String,
    pub score: f32,
}

impl From<&ScoredChunk> for SearchHit {
    fn from(scored: &ScoredChunk) -> Self {
        Self {
            chunk_id: scored.chunk.id,
            document_id: scored.chunk.document_id,
            filename: scored.filename.clone(),
            ordinal: scored.chunk.ordinal,
            char_start: scored.chunk.char_start,
            char_end: scored.chunk.char_end,
            page_number: scored.chunk.page_number,
            content: scored.chunk.content.clone(),
            score: scored.score,
        }
    }
}

/// Semantic search response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
    pub processing_time_ms: u64,
}

/// Citation from a source document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// Tag as it appears in the answer, e.g. `S2`
    pub tag: String,
    /// Document ID
    pub document_id: Uuid,
    /// Chunk ID
    pub chunk_id: Uuid,
    /// Source filename
    pub filename: String,
    /// Character range of the chunk in the extracted text
    pub char_start: usize,
    pub char_end: usize,
    /// Page number (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// Similarity score of the cited chunk
    pub score: f32,
    /// Snippet from the source
    pub excerpt: String,
}

impl Citation {
    /// Format citation for display in text
    pub fn format_inline(&self) -> String {
        match self.page_number {
            Some(page) => format!("[{}: {}, Page {}]", self.tag, self.filename, page),
            None => format!("[{}: {}]", self.tag, self.filename),
        }
    }
}

/// Grounded answer with citations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Generated answer text
    pub answer: String,
    /// Citations in order of first reference
    pub citations: Vec<Citation>,
    /// True when no source material was available
    pub insufficient_information: bool,
    /// Chunks supplied to the model
    pub chunks_retrieved: usize,
    /// Processing time in milliseconds
    pub processing_time_ms: u64,
}

impl Answer {
    /// Fixed answer used when retrieval found nothing
    pub const INSUFFICIENT_INFORMATION: &'static str =
        "I couldn't find any relevant information in your documents to answer this question.";

    pub fn insufficient_information() -> Self {
        Self {
            answer: Self::INSUFFICIENT_INFORMATION.to_string(),
            citations: Vec::new(),
            insufficient_information: true,
            chunks_retrieved: 0,
            processing_time_ms: 0,
        }
    }
}
