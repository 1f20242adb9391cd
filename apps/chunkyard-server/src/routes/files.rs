//! File routes
//!
//! Lists the storage directory and streams stored files back out.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the files router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/files", get(list_files))
        .route("/download/:filename", get(download_file))
}

/// GET /files
///
/// Names of everything in the storage directory, chunk files included.
async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    let names = state
        .coordinator()
        .list()
        .await
        .map_err(|e| AppError::transfer("Failed to read files", e))?;

    Ok(Json(names))
}

/// GET /download/:filename
///
/// Streams a finished file, or the chunk set of `filename` concatenated in
/// order.
async fn download_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response> {
    let download = state
        .coordinator()
        .download(&filename)
        .await
        .map_err(|e| AppError::transfer("Failed to download file", e))?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&download.file_name),
        );
    if let Some(len) = download.content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    builder
        .body(Body::from_stream(download.body))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// `attachment` disposition with an ASCII fallback and the exact name in
/// `filename*`
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    )
}
