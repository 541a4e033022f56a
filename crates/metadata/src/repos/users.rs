//! User and token repository.

use crate::error::MetadataResult;
use crate::models::{TokenRow, UserRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for principals and bearer tokens.
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Create a user.
    async fn create_user(&self, user: &UserRow) -> MetadataResult<()>;

    /// Get a user by ID.
    async fn get_user(&self, user_id: Uuid) -> MetadataResult<Option<UserRow>>;

    /// Get a user by name.
    async fn get_user_by_name(&self, user_name: &str) -> MetadataResult<Option<UserRow>>;

    /// Create a token.
    async fn create_token(&self, token: &TokenRow) -> MetadataResult<()>;

    /// Get a token by its SHA-256 hash.
    async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>>;

    /// Revoke a token.
    async fn revoke_token(&self, token_id: Uuid, revoked_at: OffsetDateTime)
        -> MetadataResult<()>;

    /// Token recorded by the admin bootstrap, if any.
    async fn bootstrap_token_id(&self) -> MetadataResult<Option<Uuid>>;

    /// Record the admin bootstrap token.
    async fn set_bootstrap_token_id(&self, token_id: Uuid) -> MetadataResult<()>;
}
