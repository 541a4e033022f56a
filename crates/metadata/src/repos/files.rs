//! File record, history, and scan case repository.

use crate::error::MetadataResult;
use crate::models::{FileHistoryRow, FileRecordRow, ScanCaseRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for vetted-file bookkeeping.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Create a file record for a verified upload.
    async fn create_file(&self, file: &FileRecordRow) -> MetadataResult<()>;

    /// Get a file record by ID.
    async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRecordRow>>;

    /// Get the file record created for an upload session, if any.
    async fn get_file_by_upload(&self, upload_id: Uuid)
        -> MetadataResult<Option<FileRecordRow>>;

    /// Record the vetting verdict.
    async fn update_check_status(
        &self,
        file_id: Uuid,
        check_status: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Mark a file promoted under the given storage key.
    async fn mark_promoted(
        &self,
        file_id: Uuid,
        storage_key: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Fill the file's latest open history entry (NULL storage_key) with
    /// the storage key, or create a filled entry when none is open.
    async fn fill_history(
        &self,
        file_id: Uuid,
        storage_key: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// History entries for a file, newest first.
    async fn list_history(&self, file_id: Uuid) -> MetadataResult<Vec<FileHistoryRow>>;

    /// Unpromoted files still awaiting vetting or promotion, oldest
    /// first. Used at startup to re-enqueue work lost to a restart.
    async fn list_pending_files(&self, limit: u32) -> MetadataResult<Vec<FileRecordRow>>;

    /// Open a quarantine case for an infected file.
    async fn create_scan_case(&self, case: &ScanCaseRow) -> MetadataResult<()>;

    /// Open quarantine cases, oldest first.
    async fn list_open_scan_cases(&self, limit: u32) -> MetadataResult<Vec<ScanCaseRow>>;

    /// Bump the owner's suspicious upload counter and return the new value.
    async fn increment_suspicious(&self, user_id: Uuid) -> MetadataResult<u64>;

    /// Reset the owner's suspicious upload counter.
    async fn reset_suspicious(&self, user_id: Uuid) -> MetadataResult<()>;

    /// Current suspicious upload counter for a user.
    async fn suspicious_count(&self, user_id: Uuid) -> MetadataResult<u64>;
}
