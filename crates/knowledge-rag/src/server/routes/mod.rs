//! API routes for the knowledge base server

pub mod documents;
pub mod query;

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, State},
    http::request::Parts,
    routing::{get, post},
    Json, Router,
};

use crate::error::Error;
use crate::server::state::AppState;

/// Header carrying the owner identity asserted by the upstream auth layer
pub const OWNER_HEADER: &str = "x-owner-id";

/// Room for multipart boundaries and headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Owner of the request, from [`OWNER_HEADER`]
#[derive(Debug, Clone)]
pub struct Owner(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Owner(value.to_string()))
            .ok_or_else(|| Error::Unauthorized(format!("missing {} header", OWNER_HEADER)))
    }
}

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/documents",
            get(documents::list_documents).post(documents::upload_document).layer(
                DefaultBodyLimit::max(max_upload_size.saturating_add(MULTIPART_OVERHEAD)),
            ),
        )
        .route(
            "/documents/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/documents/:id/chunks", get(documents::get_chunks))
        .route("/documents/:id/retry", post(documents::retry_document))
        .route("/search", post(query::search))
        .route("/ask", post(query::ask))
        .route("/info", get(info))
}

/// API info endpoint
async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.config();
    Json(serde_json::json!({
        "name": "knowledge-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Personal knowledge base with grounded, cited answers",
        "uptime_secs": state.uptime_secs(),
        "limits": {
            "max_upload_bytes": config.server.max_upload_size,
            "max_top_k": config.retrieval.max_top_k,
        },
        "endpoints": {
            "POST /api/documents": "Upload a document (multipart field 'file')",
            "GET /api/documents": "List your documents",
            "GET /api/documents/:id": "Document status",
            "GET /api/documents/:id/chunks": "Stored chunks of a document",
            "POST /api/documents/:id/retry": "Retry a failed document",
            "DELETE /api/documents/:id": "Delete a document",
            "POST /api/search": "Semantic search",
            "POST /api/ask": "Ask a question, answered with citations"
        }
    }))
}
