//! Quota account and ledger repository.
//!
//! Every mutator runs as one transaction: read the account, check the
//! `0 <= used <= size` invariant against the proposed change, write the
//! account, and append exactly one ledger record. A failed check rolls
//! the whole unit back.

use crate::error::MetadataResult;
use crate::models::{QuotaAccountRow, QuotaRecordRow};
use async_trait::async_trait;
use stowage_core::quota::{QuotaAction, QuotaReason};
use uuid::Uuid;

/// Repository for quota operations.
#[async_trait]
pub trait QuotaRepo: Send + Sync {
    /// Create an empty account (size 0, used 0) awaiting its initial
    /// grant.
    async fn create_account(&self, user_id: Uuid) -> MetadataResult<()>;

    /// Get a quota account.
    async fn get_account(&self, user_id: Uuid) -> MetadataResult<Option<QuotaAccountRow>>;

    /// Reserve capacity for an upload session: `used += amount`, with a
    /// ledger record tagged with the session. Fails with
    /// [`crate::MetadataError::QuotaExceeded`] when the reservation does
    /// not fit and [`crate::MetadataError::QuotaNotFound`] when the user
    /// has no account.
    async fn reserve(
        &self,
        user_id: Uuid,
        amount: u64,
        upload_session_id: Uuid,
    ) -> MetadataResult<()>;

    /// Return a session's reservation: finds the most recent ledger
    /// record tagged with the session and credits its amount back.
    /// No-ops (returning `false`) when the session never reserved or the
    /// reservation was already returned, so repeated withdraws are safe.
    async fn withdraw(
        &self,
        user_id: Uuid,
        upload_session_id: Uuid,
        reason: QuotaReason,
    ) -> MetadataResult<bool>;

    /// Adjust the `used` field directly. `Use` and `Add` consume
    /// capacity and are rejected past the ceiling; `Sub` credits
    /// capacity back and is rejected below zero.
    async fn adjust_used(
        &self,
        user_id: Uuid,
        action: QuotaAction,
        amount: u64,
        reason: QuotaReason,
        upload_session_id: Option<Uuid>,
    ) -> MetadataResult<()>;

    /// Adjust the `size` field. `Add` grows capacity; `Sub` shrinks it
    /// and is rejected if it would fall below the current `used`. An
    /// `InitialGrant` also clears the account's first-grant flag.
    async fn adjust_size(
        &self,
        user_id: Uuid,
        action: QuotaAction,
        amount: u64,
        reason: QuotaReason,
    ) -> MetadataResult<()>;

    /// Ledger records for a user, newest first.
    async fn list_records(&self, user_id: Uuid, limit: u32)
        -> MetadataResult<Vec<QuotaRecordRow>>;

    /// Accounts whose size exceeds the given floor, least recently
    /// touched first. Used by the dynamic reduction sweep.
    async fn accounts_over_size(
        &self,
        size_bytes: u64,
        limit: u32,
    ) -> MetadataResult<Vec<QuotaAccountRow>>;
}
