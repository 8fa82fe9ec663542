//! Error handling module for the list sync engine.
//!
//! Feed and cache errors are recovered locally (retry or resync); only the
//! inspection API turns them into response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Cursor;

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";
    pub const CURSOR_GONE: &str = "CURSOR_GONE";
    pub const DECODE_ERROR: &str = "DECODE_ERROR";
    pub const UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
    pub const CANCELLED: &str = "CANCELLED";
    pub const NOT_READY: &str = "NOT_READY";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
}

/// Crate error type.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network-level failure talking to the document service
    #[error("transport error: {0}")]
    Transport(String),
    /// Requested change cursor is outside retained history
    #[error("change cursor {cursor:?} is no longer retained")]
    CursorGone { cursor: Option<Cursor> },
    /// Payload could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
    /// Document service answered with an unexpected status
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
    /// Resource not found
    #[error("{0}")]
    NotFound(String),
    /// Local settings store failure
    #[error("storage error: {0}")]
    Storage(String),
    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Operation stopped by teardown
    #[error("operation cancelled")]
    Cancelled,
    /// No list session is active yet
    #[error("{0}")]
    NotReady(String),
    /// Rejected request input
    #[error("validation error: {0}")]
    Validation(String),
}

impl SyncError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Transport(_) => codes::TRANSPORT_ERROR,
            SyncError::CursorGone { .. } => codes::CURSOR_GONE,
            SyncError::Decode(_) => codes::DECODE_ERROR,
            SyncError::Upstream { .. } => codes::UPSTREAM_ERROR,
            SyncError::NotFound(_) => codes::NOT_FOUND,
            SyncError::Storage(_) => codes::STORAGE_ERROR,
            SyncError::Config(_) => codes::CONFIG_ERROR,
            SyncError::Cancelled => codes::CANCELLED,
            SyncError::NotReady(_) => codes::NOT_READY,
            SyncError::Validation(_) => codes::VALIDATION_ERROR,
        }
    }

    /// Get the HTTP status code used by the inspection API.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::NotReady(_) | SyncError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Transport(_)
            | SyncError::CursorGone { .. }
            | SyncError::Decode(_)
            | SyncError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            SyncError::Storage(_) | SyncError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a stream failing with this error should be reopened after backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) | SyncError::Decode(_) => true,
            SyncError::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_cursor_gone(&self) -> bool {
        matches!(self, SyncError::CursorGone { .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Settings store error: {:?}", err);
        SyncError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<tokio_util::codec::LinesCodecError> for SyncError {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        match err {
            tokio_util::codec::LinesCodecError::Io(io) => SyncError::Transport(io.to_string()),
            other => SyncError::Decode(other.to_string()),
        }
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
    pub cursor: Option<Cursor>,
}

impl ErrorResponse {
    pub fn new(error: &SyncError, cursor: Option<Cursor>) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.to_string(),
            },
            cursor,
        }
    }
}

/// Wrapper type for errors that carry the cache cursor as context.
pub struct SyncErrorWithCursor {
    pub error: SyncError,
    pub cursor: Option<Cursor>,
}

impl IntoResponse for SyncErrorWithCursor {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = ErrorResponse::new(&self.error, self.cursor);
        (status, Json(body)).into_response()
    }
}
