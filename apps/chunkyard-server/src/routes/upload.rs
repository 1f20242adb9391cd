//! Upload Routes
//!
//! Endpoints:
//! - POST /upload - Receive one file as multipart form data
//!
//! The optional `uploadId` query parameter names the progress topic the
//! client already subscribed to; without it a fresh id is generated and
//! returned in the response.

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::QueryRejection, DefaultBodyLimit, Multipart,
        Query, State,
    },
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TransferMode;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::transfer::{TransferError, UploadRequest};

/// Room for multipart boundaries and headers on top of the payload limit
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    pub upload_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub upload_id: Uuid,
    pub file_name: String,
    pub size: u64,
    pub chunks: u64,
}

/// Create the upload router
pub fn router(max_upload_size: u64) -> Router<AppState> {
    let limit = max_upload_size
        .saturating_add(MULTIPART_OVERHEAD)
        .try_into()
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/upload", post(upload_file))
        .layer(DefaultBodyLimit::max(limit))
}

/// POST /upload
///
/// The first field carrying a file name is the upload; other fields are
/// ignored.
async fn upload_file(
    State(state): State<AppState>,
    query: std::result::Result<Query<UploadQuery>, QueryRejection>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let Query(query) = query.map_err(|e| {
        tracing::warn!("Rejected upload query: {}", e);
        AppError::Validation(e.body_text())
    })?;
    let mut multipart = multipart.map_err(|e| {
        tracing::warn!("Rejected upload body: {}", e);
        AppError::Validation(e.body_text())
    })?;

    let mut received = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!("Failed to read multipart field: {}", e);
        AppError::Validation(format!("Failed to read upload: {}", e.body_text()))
    })? {
        let Some(file_name) = field.file_name().filter(|n| !n.is_empty()).map(str::to_string)
        else {
            tracing::debug!(field = ?field.name(), "Skipping non-file field");
            continue;
        };

        let data = field.bytes().await.map_err(|e| {
            tracing::warn!(file_name = %file_name, "Failed to read file data: {}", e);
            AppError::Validation(format!("Failed to read file data: {}", e.body_text()))
        })?;

        received = Some((file_name, data));
        break;
    }

    let (file_name, data) = received
        .ok_or_else(|| AppError::transfer("Failed to process file", TransferError::NoFile))?;

    let mut request = UploadRequest::new(file_name, data);
    if let Some(upload_id) = query.upload_id {
        request = request.with_upload_id(upload_id);
    }

    tracing::debug!(
        upload_id = %request.upload_id,
        file_name = %request.file_name,
        bytes = request.total_size(),
        "Upload received"
    );

    let receipt = state
        .coordinator()
        .upload(request)
        .await
        .map_err(|e| AppError::transfer("Failed to process file", e))?;

    let message = match receipt.mode {
        TransferMode::Chunked => "File uploaded and chunked successfully!",
        TransferMode::Merged => "File uploaded and merged successfully!",
    };

    Ok(Json(UploadResponse {
        message: message.to_string(),
        upload_id: receipt.upload_id,
        file_name: receipt.file_name,
        size: receipt.size,
        chunks: receipt.chunks,
    }))
}
