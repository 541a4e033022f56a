//! Upload session types, lifecycle, and chunk arithmetic.

use crate::hash::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::UploadSession(format!("invalid upload ID: {e}")))
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted upload session state.
///
/// Expiry is never stored: it is derived from `expires_at` at read time
/// (see [`UploadSession::effective_status`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Session is open and accepting chunks.
    Uploading,
    /// All chunks received and the whole-file hash verified.
    Completed,
    /// Session was explicitly aborted.
    Aborted,
}

impl UploadState {
    /// Check if the session can still receive chunks (ignoring expiry).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Uploading)
    }

    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Canonical string form, as stored in metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }

    /// Parse from the canonical string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "uploading" => Ok(Self::Uploading),
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            other => Err(crate::Error::UnknownVariant {
                kind: "upload state",
                value: other.to_string(),
            }),
        }
    }
}

/// Session status as reported to clients: the persisted state plus the
/// derived expired case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveStatus {
    Uploading,
    Completed,
    Aborted,
    Expired,
}

/// An upload session tracking resumable upload state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session identifier.
    pub id: UploadId,
    /// User that owns this session.
    pub creator_id: Uuid,
    /// Target file name.
    pub file_name: String,
    /// Expected total size in bytes.
    pub total_size: u64,
    /// Chunk size for this upload.
    pub chunk_size: u64,
    /// Total number of chunks (derived from size at creation).
    pub total_chunks: u64,
    /// Algorithm for the whole-file hash.
    pub hash_algorithm: HashAlgorithm,
    /// Expected whole-file hash (hex), if declared at creation.
    pub file_hash: Option<String>,
    /// Sniffed MIME type, set at completion.
    pub mime_type: Option<String>,
    /// Local backing file for chunk data.
    pub spool_path: String,
    /// Current persisted state.
    pub state: UploadState,
    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the session was last updated.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// When the session expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl UploadSession {
    /// Check if the session has passed its soft deadline.
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }

    /// Status as reported to clients: uploading sessions past their
    /// deadline read as expired, terminal states are reported as-is.
    pub fn effective_status(&self) -> EffectiveStatus {
        match self.state {
            UploadState::Completed => EffectiveStatus::Completed,
            UploadState::Aborted => EffectiveStatus::Aborted,
            UploadState::Uploading if self.is_expired() => EffectiveStatus::Expired,
            UploadState::Uploading => EffectiveStatus::Uploading,
        }
    }

    /// Byte offset of a chunk within the file.
    pub fn chunk_offset(&self, index: u64) -> u64 {
        index * self.chunk_size
    }

    /// Expected byte length of a chunk. The final chunk may be short.
    pub fn chunk_len(&self, index: u64) -> u64 {
        chunk_len(self.total_size, self.chunk_size, index)
    }
}

/// Number of chunks needed to cover `total_size` bytes.
pub fn total_chunks(total_size: u64, chunk_size: u64) -> u64 {
    total_size.div_ceil(chunk_size)
}

/// Expected byte length of the chunk at `index`; the last chunk covers
/// only the remainder.
pub fn chunk_len(total_size: u64, chunk_size: u64, index: u64) -> u64 {
    let start = index * chunk_size;
    chunk_size.min(total_size.saturating_sub(start))
}

/// Request to create an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateUploadRequest {
    /// Target file name.
    pub file_name: String,
    /// Total file size in bytes.
    pub total_size: u64,
    /// Chunk size (optional, uses server default if not specified).
    pub chunk_size: Option<u64>,
    /// Whole-file hash algorithm (default sha256).
    #[serde(default)]
    pub hash_algorithm: Option<HashAlgorithm>,
    /// Expected whole-file hash (hex). May instead be supplied at
    /// completion.
    #[serde(default)]
    pub file_hash: Option<String>,
}

/// Response from creating an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateUploadResponse {
    /// The upload session ID.
    pub upload_session_id: String,
    /// Chunk size the server settled on.
    pub chunk_size: u64,
    /// Total number of chunks expected.
    pub total_chunks: u64,
    /// Session deadline (RFC 3339).
    pub expires_at: String,
}

/// Acknowledgement for a stored or replayed chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkAck {
    pub ok: bool,
    pub chunk_index: u64,
}

/// Response from querying session status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub upload_session_id: String,
    pub status: EffectiveStatus,
    /// Indices received so far, ascending.
    pub uploaded_chunks: Vec<u64>,
    pub total_chunks: u64,
    pub chunk_size: u64,
    pub total_size: u64,
    pub expires_at: String,
}

/// Request to complete an upload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    /// Expected whole-file hash (hex). Required unless declared at
    /// session creation.
    #[serde(default)]
    pub file_hash: Option<String>,
}

/// Response from completing an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    pub ok: bool,
    /// Identifier of the file record created for the verified upload.
    pub file_id: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    /// Durable storage key the file is promoted to once vetted.
    pub path: String,
}
