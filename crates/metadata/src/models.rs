//! Database models mapping to the metadata schema.

use crate::error::MetadataResult;
use sqlx::FromRow;
use stowage_core::check::{CheckStatus, Role};
use stowage_core::hash::HashAlgorithm;
use stowage_core::quota::{QuotaAccount, QuotaAction, QuotaField, QuotaReason, QuotaRecord};
use stowage_core::session::{UploadId, UploadSession, UploadState};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Users and tokens
// =============================================================================

/// User record.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub user_name: String,
    pub role: String,
    pub created_at: OffsetDateTime,
}

impl UserRow {
    /// Parse the persisted role string.
    pub fn role(&self) -> MetadataResult<Role> {
        Ok(Role::parse(&self.role)?)
    }
}

/// Bearer token record. Only the SHA-256 hash of the token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
}

// =============================================================================
// Upload sessions
// =============================================================================

/// Upload session record.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub upload_id: Uuid,
    pub creator_id: Uuid,
    pub file_name: String,
    pub total_size: i64,
    pub chunk_size: i64,
    pub total_chunks: i64,
    pub hash_algorithm: String,
    pub file_hash: Option<String>,
    pub mime_type: Option<String>,
    pub spool_path: String,
    pub state: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl UploadSessionRow {
    /// Convert from the domain type.
    pub fn from_session(session: &UploadSession) -> Self {
        Self {
            upload_id: *session.id.as_uuid(),
            creator_id: session.creator_id,
            file_name: session.file_name.clone(),
            total_size: session.total_size as i64,
            chunk_size: session.chunk_size as i64,
            total_chunks: session.total_chunks as i64,
            hash_algorithm: session.hash_algorithm.as_str().to_string(),
            file_hash: session.file_hash.clone(),
            mime_type: session.mime_type.clone(),
            spool_path: session.spool_path.clone(),
            state: session.state.as_str().to_string(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            expires_at: session.expires_at,
        }
    }

    /// Convert to the domain type, validating persisted enum strings.
    pub fn into_session(self) -> MetadataResult<UploadSession> {
        Ok(UploadSession {
            id: UploadId::from_uuid(self.upload_id),
            creator_id: self.creator_id,
            file_name: self.file_name,
            total_size: self.total_size as u64,
            chunk_size: self.chunk_size as u64,
            total_chunks: self.total_chunks as u64,
            hash_algorithm: HashAlgorithm::parse(&self.hash_algorithm)?,
            file_hash: self.file_hash,
            mime_type: self.mime_type,
            spool_path: self.spool_path,
            state: UploadState::parse(&self.state)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        })
    }
}

/// A received chunk index for an upload session.
#[derive(Debug, Clone, FromRow)]
pub struct UploadChunkRow {
    pub upload_id: Uuid,
    pub chunk_index: i64,
    pub received_at: OffsetDateTime,
}

// =============================================================================
// Quota accounts and ledger
// =============================================================================

/// Quota account record.
#[derive(Debug, Clone, FromRow)]
pub struct QuotaAccountRow {
    pub user_id: Uuid,
    pub size_bytes: i64,
    pub used_bytes: i64,
    pub is_first_grant: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl QuotaAccountRow {
    /// Convert to the domain type.
    pub fn into_account(self) -> QuotaAccount {
        QuotaAccount {
            user_id: self.user_id,
            size: self.size_bytes as u64,
            used: self.used_bytes as u64,
            is_first_grant: self.is_first_grant,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Append-only quota ledger record.
#[derive(Debug, Clone, FromRow)]
pub struct QuotaRecordRow {
    pub record_id: Uuid,
    pub user_id: Uuid,
    pub field: String,
    pub action: String,
    pub amount: i64,
    pub reason: String,
    pub upload_session_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

impl QuotaRecordRow {
    /// Convert to the domain type, validating persisted enum strings.
    pub fn into_record(self) -> MetadataResult<QuotaRecord> {
        Ok(QuotaRecord {
            record_id: self.record_id,
            user_id: self.user_id,
            field: QuotaField::parse(&self.field)?,
            action: QuotaAction::parse(&self.action)?,
            amount: self.amount as u64,
            reason: QuotaReason::parse(&self.reason)?,
            upload_session_id: self.upload_session_id,
            created_at: self.created_at,
        })
    }
}

// =============================================================================
// File records, history, scan cases
// =============================================================================

/// A verified upload awaiting or past vetting and promotion.
#[derive(Debug, Clone, FromRow)]
pub struct FileRecordRow {
    pub file_id: Uuid,
    pub upload_id: Uuid,
    pub owner_id: Uuid,
    pub file_name: String,
    pub size_bytes: i64,
    pub file_hash: String,
    pub hash_algorithm: String,
    pub mime_type: Option<String>,
    /// Spool path while the file is local; cleared only on disk, the
    /// column keeps the last known location for diagnostics.
    pub local_path: String,
    pub check_status: String,
    pub promoted: bool,
    pub storage_key: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl FileRecordRow {
    /// Parse the persisted check status string.
    pub fn check_status(&self) -> MetadataResult<CheckStatus> {
        Ok(CheckStatus::parse(&self.check_status)?)
    }
}

/// File history entry. `storage_key` is NULL while the entry is open;
/// promotion fills it.
#[derive(Debug, Clone, FromRow)]
pub struct FileHistoryRow {
    pub history_id: Uuid,
    pub file_id: Uuid,
    pub storage_key: Option<String>,
    pub opened_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Quarantine case opened for an infected file.
#[derive(Debug, Clone, FromRow)]
pub struct ScanCaseRow {
    pub case_id: Uuid,
    pub file_id: Uuid,
    pub owner_id: Uuid,
    /// JSON array of signature names reported by the scanner.
    pub signatures: String,
    pub state: String,
    pub opened_at: OffsetDateTime,
}

impl ScanCaseRow {
    /// Decode the signature list.
    pub fn signature_list(&self) -> MetadataResult<Vec<String>> {
        serde_json::from_str(&self.signatures)
            .map_err(|e| crate::MetadataError::CorruptRow(format!("scan case signatures: {e}")))
    }
}

/// Per-user moderation counters.
#[derive(Debug, Clone, FromRow)]
pub struct UserFlagsRow {
    pub user_id: Uuid,
    pub suspicious_upload_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::session::total_chunks;

    #[test]
    fn test_session_row_roundtrip() {
        let now = OffsetDateTime::now_utc();
        let session = UploadSession {
            id: UploadId::new(),
            creator_id: Uuid::new_v4(),
            file_name: "archive.zip".to_string(),
            total_size: 10,
            chunk_size: 4,
            total_chunks: total_chunks(10, 4),
            hash_algorithm: HashAlgorithm::Sha256,
            file_hash: Some("ab".repeat(32)),
            mime_type: None,
            spool_path: "/tmp/spool/a.part".to_string(),
            state: UploadState::Uploading,
            created_at: now,
            updated_at: now,
            expires_at: now + time::Duration::hours(1),
        };

        let row = UploadSessionRow::from_session(&session);
        assert_eq!(row.state, "uploading");
        assert_eq!(row.total_chunks, 3);

        let back = row.into_session().unwrap();
        assert_eq!(back.id, session.id);
        assert_eq!(back.state, UploadState::Uploading);
        assert_eq!(back.total_size, 10);
    }

    #[test]
    fn test_session_row_rejects_unknown_state() {
        let now = OffsetDateTime::now_utc();
        let row = UploadSessionRow {
            upload_id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            file_name: "x".to_string(),
            total_size: 1,
            chunk_size: 1,
            total_chunks: 1,
            hash_algorithm: "sha256".to_string(),
            file_hash: None,
            mime_type: None,
            spool_path: "/tmp/x".to_string(),
            state: "frozen".to_string(),
            created_at: now,
            updated_at: now,
            expires_at: now,
        };
        assert!(row.into_session().is_err());
    }

    #[test]
    fn test_scan_case_signature_list() {
        let row = ScanCaseRow {
            case_id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            signatures: r#"["Eicar-Test-Signature"]"#.to_string(),
            state: "open".to_string(),
            opened_at: OffsetDateTime::now_utc(),
        };
        assert_eq!(row.signature_list().unwrap(), vec!["Eicar-Test-Signature"]);
    }
}
