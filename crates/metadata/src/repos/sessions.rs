//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::UploadSessionRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for upload session operations.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Create a new upload session.
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()>;

    /// Get an upload session by ID.
    async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>>;

    /// Sessions in the uploading state owned by a user, newest first.
    /// Sessions past their deadline are excluded.
    async fn list_active_sessions(
        &self,
        creator_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Update session state. Rows are never deleted; terminal sessions
    /// stay behind as an audit trail.
    async fn update_state(
        &self,
        upload_id: Uuid,
        state: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Mark a session completed and record the sniffed MIME type.
    async fn complete_session(
        &self,
        upload_id: Uuid,
        mime_type: Option<&str>,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Record a received chunk index. Recording the same index twice is
    /// a no-op (replay).
    async fn record_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: u64,
        received_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Whether a chunk index has been received.
    async fn has_chunk(&self, upload_id: Uuid, chunk_index: u64) -> MetadataResult<bool>;

    /// Received chunk indices, ascending.
    async fn received_chunks(&self, upload_id: Uuid) -> MetadataResult<Vec<u64>>;

    /// Number of chunks received so far.
    async fn count_received_chunks(&self, upload_id: Uuid) -> MetadataResult<u64>;

    /// When the user last completed an upload, if ever. Feeds the
    /// dynamic top-up activity gate.
    async fn last_completed_at(&self, creator_id: Uuid)
        -> MetadataResult<Option<OffsetDateTime>>;

    /// The user's most recent session activity of any kind. Feeds the
    /// dynamic reduction idleness gate.
    async fn last_session_activity(
        &self,
        creator_id: Uuid,
    ) -> MetadataResult<Option<OffsetDateTime>>;

    /// Uploading sessions past their deadline, oldest first. Used by the
    /// expiry sweep to release quota reservations.
    async fn expired_sessions(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>>;
}
