//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use stowage_metadata::MetadataError;
use stowage_storage::StorageError;
use thiserror::Error;

/// API error type covering every handler failure mode. Each variant
/// carries a stable machine-readable code so clients can branch without
/// parsing messages.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid total size: {0}")]
    InvalidTotalSize(u64),

    #[error("too many chunks: {requested} (limit {max})")]
    TooManyChunks { requested: u64, max: u64 },

    #[error("upload of {requested} bytes exceeds the limit of {max}")]
    TooLarge { requested: u64, max: u64 },

    #[error("quota exceeded: requested {requested} bytes, headroom {headroom}")]
    QuotaExceeded { requested: u64, headroom: u64 },

    #[error("no quota account for user")]
    QuotaNotFound,

    #[error("used amount cannot go negative: crediting {amount} against used {used}")]
    UsedCannotBeNegative { amount: u64, used: u64 },

    #[error("invalid chunk index: {index} (session has {total} chunks)")]
    InvalidChunkIndex { index: u64, total: u64 },

    #[error("content length {actual} does not match expected chunk length {expected}")]
    InvalidContentLength { expected: u64, actual: u64 },

    #[error("chunk hash mismatch: expected {expected}, got {actual}")]
    ChunkHashMismatch { expected: String, actual: String },

    #[error("chunk hash does not match the previously stored chunk")]
    InvalidChunkHash,

    #[error("upload incomplete: {missing} of {total} chunks missing")]
    UploadIncomplete { missing: u64, total: u64 },

    #[error("file hash mismatch: expected {expected}, got {actual}")]
    FileHashMismatch { expected: String, actual: String },

    #[error("upload session has expired")]
    SessionExpired,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("hash worker error: {0}")]
    HashWorker(String),
}

impl ApiError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTotalSize(_) => "invalid_total_size",
            Self::TooManyChunks { .. } => "too_many_chunks",
            Self::TooLarge { .. } => "too_large",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::QuotaNotFound => "quota_not_found",
            Self::UsedCannotBeNegative { .. } => "used_cannot_be_negative",
            Self::InvalidChunkIndex { .. } => "invalid_chunk_index",
            Self::InvalidContentLength { .. } => "invalid_content_length",
            Self::ChunkHashMismatch { .. } => "chunk_hash_mismatch",
            Self::InvalidChunkHash => "invalid_chunk_hash",
            Self::UploadIncomplete { .. } => "upload_incomplete",
            Self::FileHashMismatch { .. } => "file_hash_mismatch",
            Self::SessionExpired => "session_expired",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::HashWorker(_) => "hash_worker_error",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidTotalSize(_)
            | Self::TooManyChunks { .. }
            | Self::InvalidChunkIndex { .. }
            | Self::InvalidContentLength { .. }
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::TooLarge { .. } | Self::QuotaExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::QuotaNotFound | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UsedCannotBeNegative { .. }
            | Self::InvalidChunkHash
            | Self::UploadIncomplete { .. }
            | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ChunkHashMismatch { .. } | Self::FileHashMismatch { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::SessionExpired => StatusCode::GONE,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_)
            | Self::Storage(_)
            | Self::Metadata(_)
            | Self::HashWorker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MetadataError> for ApiError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::NotFound(what) => Self::NotFound(what),
            MetadataError::AlreadyExists(what) => Self::Conflict(format!("{what} already exists")),
            MetadataError::QuotaExceeded {
                requested,
                headroom,
            } => Self::QuotaExceeded {
                requested,
                headroom,
            },
            MetadataError::QuotaNotFound(_) => Self::QuotaNotFound,
            MetadataError::UsedCannotBeNegative { amount, used } => {
                Self::UsedCannotBeNegative { amount, used }
            }
            other => Self::Metadata(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => Self::NotFound(key),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<stowage_core::Error> for ApiError {
    fn from(e: stowage_core::Error) -> Self {
        use stowage_core::Error;
        match e {
            Error::InvalidTotalSize(size) => Self::InvalidTotalSize(size),
            Error::TooManyChunks { requested, max } => Self::TooManyChunks { requested, max },
            Error::InvalidChunkIndex { index, total } => Self::InvalidChunkIndex { index, total },
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<crate::hasher::HashError> for ApiError {
    fn from(e: crate::hasher::HashError) -> Self {
        Self::HashWorker(e.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(format!("I/O error: {e}"))
    }
}

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
