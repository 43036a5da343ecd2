//! Search and question-answering endpoints

use axum::{extract::State, Json};

use super::Owner;
use crate::error::Result;
use crate::server::state::AppState;
use crate::types::{Answer, AskRequest, SearchRequest, SearchResponse};

/// POST /api/search
pub async fn search(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let response = state
        .knowledge_base()
        .search_within(&owner, &request.query, request.top_k, &request.document_ids)
        .await?;
    Ok(Json(response))
}

/// POST /api/ask
pub async fn ask(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<AskRequest>,
) -> Result<Json<Answer>> {
    let answer = state
        .knowledge_base()
        .ask_within(&owner, &request.question, request.top_k, &request.document_ids)
        .await?;
    Ok(Json(answer))
}
