//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("quota exceeded: requested {requested} bytes, headroom {headroom}")]
    QuotaExceeded { requested: u64, headroom: u64 },

    #[error("quota account not found for user {0}")]
    QuotaNotFound(uuid::Uuid),

    #[error("used amount cannot go negative: crediting {amount} against used {used}")]
    UsedCannotBeNegative { amount: u64, used: u64 },

    #[error("quota invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<stowage_core::Error> for MetadataError {
    fn from(e: stowage_core::Error) -> Self {
        // Core parse failures on persisted values mean the row itself is bad.
        MetadataError::CorruptRow(e.to_string())
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
