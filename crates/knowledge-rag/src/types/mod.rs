//! Core types for the knowledge base

pub mod document;
pub mod query;
pub mod response;

pub use document::{
    Chunk, DeletionState, Document, DocumentStatus, ExtractedText, MediaType, PageMarker, TextSpan,
};
pub use query::{AskRequest, SearchRequest};
pub use response::{
    Answer, Citation, DocumentView, QueryResult, ScoredChunk, SearchHit, SearchResponse,
    UploadReceipt,
};
