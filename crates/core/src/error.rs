//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid total size: {0}")]
    InvalidTotalSize(u64),

    #[error("invalid chunk size: {size} (must be between {min} and {max})")]
    InvalidChunkSize { size: u64, min: u64, max: u64 },

    #[error("too many chunks: {requested} (limit {max})")]
    TooManyChunks { requested: u64, max: u64 },

    #[error("invalid chunk index: {index} (session has {total} chunks)")]
    InvalidChunkIndex { index: u64, total: u64 },

    #[error("upload session error: {0}")]
    UploadSession(String),

    #[error("unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("quota violation: {0}")]
    QuotaViolation(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
