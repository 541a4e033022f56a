//! Admin user and token initialization.
//!
//! The configured admin token hash provides initial access: the first
//! startup creates the `admin` user, its quota account, and a token row
//! for the hash. A changed hash on a later startup revokes the previous
//! bootstrap token and records the new one, so rotating the admin token
//! is a config change plus a restart.

use crate::quota_policy;
use anyhow::{Result, bail};
use stowage_core::check::Role;
use stowage_core::config::{AdminConfig, QuotaConfig};
use stowage_metadata::MetadataStore;
use stowage_metadata::models::{TokenRow, UserRow};
use time::OffsetDateTime;
use uuid::Uuid;

pub const ADMIN_USER_NAME: &str = "admin";

/// Accept `sha256:`-prefixed and mixed-case hashes, reject anything
/// that is not a 64-character hex digest.
fn normalize_token_hash(raw: &str) -> Result<String> {
    let hash = raw.strip_prefix("sha256:").unwrap_or(raw).to_lowercase();
    if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("admin.token_hash must be a 64-character SHA-256 hex digest");
    }
    Ok(hash)
}

/// Ensure the admin user, its quota account, and the bootstrap token
/// exist and match the configured hash. Returns the admin user id.
pub async fn ensure_admin(
    metadata: &dyn MetadataStore,
    admin: &AdminConfig,
    quota: &QuotaConfig,
) -> Result<Uuid> {
    let hash = normalize_token_hash(&admin.token_hash)?;
    let now = OffsetDateTime::now_utc();

    let admin_user = match metadata.get_user_by_name(ADMIN_USER_NAME).await? {
        Some(user) => user,
        None => {
            let user = UserRow {
                user_id: Uuid::new_v4(),
                user_name: ADMIN_USER_NAME.to_string(),
                role: Role::Admin.as_str().to_string(),
                created_at: now,
            };
            metadata.create_user(&user).await?;
            tracing::info!(user_id = %user.user_id, "created admin user");
            user
        }
    };
    quota_policy::ensure_account_with_grant(metadata, admin_user.user_id, quota).await?;

    if let Some(existing) = metadata.get_token_by_hash(&hash).await? {
        if existing.revoked_at.is_some() {
            bail!("configured admin token hash matches a revoked token; rotate the token");
        }
        if existing.user_id != admin_user.user_id {
            bail!("configured admin token hash belongs to another user");
        }
        return Ok(admin_user.user_id);
    }

    if let Some(previous) = metadata.bootstrap_token_id().await? {
        metadata.revoke_token(previous, now).await?;
        tracing::info!(token_id = %previous, "revoked previous admin bootstrap token");
    }

    let token = TokenRow {
        token_id: Uuid::new_v4(),
        user_id: admin_user.user_id,
        token_hash: hash,
        description: admin
            .token_description
            .clone()
            .or_else(|| Some("admin bootstrap token".to_string())),
        created_at: now,
        revoked_at: None,
    };
    metadata.create_token(&token).await?;
    metadata.set_bootstrap_token_id(token.token_id).await?;
    tracing::info!(token_id = %token.token_id, "recorded admin bootstrap token");

    Ok(admin_user.user_id)
}
