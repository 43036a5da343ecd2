//! Document upload and management endpoints

use axum::{
    extract::{multipart::Field, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use bytes::BytesMut;
use serde::Serialize;
use uuid::Uuid;

use super::Owner;
use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{Chunk, DocumentView, UploadReceipt};

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentView>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ChunkListResponse {
    pub document_id: Uuid,
    pub chunks: Vec<Chunk>,
}

/// POST /api/documents - accept a file for ingestion
///
/// Multipart fields: `file` (required) and `media_type` (optional, overrides
/// the part's own content type).
pub async fn upload_document(
    State(state): State<AppState>,
    Owner(owner): Owner,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadReceipt>)> {
    let limit = state.config().server.max_upload_size;
    let mut declared_type: Option<String> = None;
    let mut file: Option<(String, Option<String>, BytesMut)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "media_type" => {
                let value = field.text().await.map_err(|e| multipart_error(e, limit))?;
                let value = value.trim();
                if !value.is_empty() {
                    declared_type = Some(value.to_string());
                }
            }
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| Error::invalid_input("file part has no filename"))?;
                let content_type = field.content_type().map(str::to_string);
                let data = read_capped(field, limit).await?;
                file = Some((filename, content_type, data));
            }
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
    }

    let (filename, content_type, data) =
        file.ok_or_else(|| Error::invalid_input("multipart field 'file' is required"))?;
    let declared = declared_type.or(content_type);

    let receipt = state
        .knowledge_base()
        .upload(&owner, &filename, declared.as_deref(), &data)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// Read a multipart field, failing as soon as it grows past `limit`
async fn read_capped(mut field: Field<'_>, limit: usize) -> Result<BytesMut> {
    let mut data = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
        if data.len() + chunk.len() > limit {
            return Err(Error::PayloadTooLarge { limit });
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

fn multipart_error(err: axum::extract::multipart::MultipartError, limit: usize) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { limit }
    } else {
        Error::invalid_input(format!("Failed to read multipart body: {}", err.body_text()))
    }
}

/// GET /api/documents
pub async fn list_documents(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<DocumentListResponse>> {
    let documents = state.knowledge_base().list(&owner)?;
    Ok(Json(DocumentListResponse {
        total: documents.len(),
        documents,
    }))
}

/// GET /api/documents/:id
pub async fn get_document(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentView>> {
    Ok(Json(state.knowledge_base().status(&owner, id)?))
}

/// GET /api/documents/:id/chunks
pub async fn get_chunks(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<Json<ChunkListResponse>> {
    let chunks = state.knowledge_base().chunks(&owner, id)?;
    Ok(Json(ChunkListResponse {
        document_id: id,
        chunks,
    }))
}

/// POST /api/documents/:id/retry
pub async fn retry_document(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<DocumentView>)> {
    let view = state.knowledge_base().retry(&owner, id).await?;
    Ok((StatusCode::ACCEPTED, Json(view)))
}

/// DELETE /api/documents/:id
pub async fn delete_document(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.knowledge_base().delete(&owner, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
