//! Error types for the Chunkyard server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::transfer::TransferError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// The request itself is unusable
    #[error("{0}")]
    Validation(String),

    #[error("{message}: {cause}")]
    NotFound { message: String, cause: String },

    /// Server-side failure while handling an operation
    #[error("{context}: {source}")]
    Transfer {
        context: &'static str,
        #[source]
        source: TransferError,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Classify a transfer failure; `context` becomes the response message
    /// of server-side errors
    pub fn transfer(context: &'static str, err: TransferError) -> Self {
        match err {
            e if e.is_validation() => AppError::Validation(e.to_string()),
            e @ TransferError::NotFound(_) => AppError::NotFound {
                message: "File not found".to_string(),
                cause: e.to_string(),
            },
            source => AppError::Transfer { context, source },
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    message,
                    error: None,
                },
            ),
            AppError::NotFound { message, cause } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    message,
                    error: Some(cause),
                },
            ),
            AppError::Transfer { context, source } => {
                tracing::error!(error = %source, "{}", context);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        message: context.to_string(),
                        error: Some(source.to_string()),
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        message: "Internal server error".to_string(),
                        error: Some(msg),
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;
    use std::io;

    #[test]
    fn test_transfer_classification() {
        assert!(matches!(
            AppError::transfer("Failed to process file", TransferError::NoFile),
            AppError::Validation(msg) if msg == "No file uploaded!"
        ));
        assert!(matches!(
            AppError::transfer("Failed to download file", TransferError::NotFound("a.txt".into())),
            AppError::NotFound { .. }
        ));

        let io_err = TransferError::Storage(StorageError::io(
            "read",
            "/tmp/x",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        ));
        assert!(matches!(
            AppError::transfer("Failed to read files", io_err),
            AppError::Transfer { context: "Failed to read files", .. }
        ));
    }

    #[test]
    fn test_status_codes() {
        let response = AppError::Validation("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::transfer("x", TransferError::NotFound("a".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::transfer("Failed to merge", TransferError::ZeroChunkSize).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
