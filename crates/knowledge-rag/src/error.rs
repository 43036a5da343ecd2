//! Error types for the knowledge base

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for knowledge base operations
pub type Result<T> = std::result::Result<T, Error>;

/// Knowledge base errors
#[derive(Debug, Error)]
pub enum Error {
    /// Declared or detected media type is not one we can extract
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Upload exceeds the configured size limit
    #[error("Payload too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Content is corrupt, encrypted, or not decodable
    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    /// Extraction succeeded but produced only whitespace
    #[error("Document contains no extractable text")]
    EmptyDocument,

    /// Embedding provider failed after all retries
    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Completion provider failed after all retries
    #[error("Answer synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    /// Vector index operation failed
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// Vector length does not match the index
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Ingestion queue has no room; the upload was not accepted
    #[error("Ingestion queue is full ({capacity} documents waiting), try again later")]
    QueueFull { capacity: usize },

    /// Document missing or owned by someone else
    #[error("Not found: {0}")]
    NotFound(String),

    /// Index entries could not be removed; the document stays hidden
    #[error("Deletion of document {0} is incomplete and will be retried")]
    DeletionIncomplete(Uuid),

    /// Request failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No owner identity on the request
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Operation not allowed in the document's current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metadata store error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an extraction failure
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::ExtractionFailure(message.into())
    }

    /// Create an index error
    pub fn index(message: impl Into<String>) -> Self {
        Self::IndexUnavailable(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable machine-readable code, also recorded as a document's failure code
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnsupportedMediaType(_) => "unsupported_media_type",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::ExtractionFailure(_) => "extraction_failure",
            Error::EmptyDocument => "empty_document",
            Error::EmbeddingUnavailable(_) => "embedding_unavailable",
            Error::SynthesisUnavailable(_) => "synthesis_unavailable",
            Error::IndexUnavailable(_) => "index_unavailable",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::QueueFull { .. } => "queue_full",
            Error::NotFound(_) => "not_found",
            Error::DeletionIncomplete(_) => "deletion_incomplete",
            Error::InvalidInput(_) => "invalid_input",
            Error::Unauthorized(_) => "unauthorized",
            Error::Conflict(_) => "conflict",
            Error::Config(_) => "config_error",
            Error::Database(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether repeating the failed storage or index call might succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::IndexUnavailable(_) | Error::Database(_) | Error::Io(_)
        )
    }

    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::ExtractionFailure(_) | Error::EmptyDocument => StatusCode::UNPROCESSABLE_ENTITY,
            Error::EmbeddingUnavailable(_)
            | Error::SynthesisUnavailable(_)
            | Error::IndexUnavailable(_)
            | Error::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::DimensionMismatch { .. }
            | Error::DeletionIncomplete(_)
            | Error::Config(_)
            | Error::Database(_)
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "error": {
                "type": self.code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
