//! knowledge-rag: a personal knowledge base with grounded, cited answers
//!
//! Users upload documents (PDF, HTML, Markdown, plain text). Each upload is
//! extracted, chunked, embedded and indexed in the background. Semantic search
//! and question answering only ever see the asking owner's ready documents,
//! and every answer carries citations back to the chunks it was built from.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod index;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod retrieval;
pub mod retry;
pub mod server;
pub mod service;
pub mod storage;
pub mod types;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use server::RagServer;
pub use service::{Components, HealthReport, KnowledgeBase, ResumeReport};
pub use types::{
    document::{Chunk, DeletionState, Document, DocumentStatus, MediaType},
    query::{AskRequest, SearchRequest},
    response::{Answer, Citation, DocumentView, SearchHit, SearchResponse, UploadReceipt},
};
