//! Admin user provisioning.

use crate::auth::{hash_token, require_auth, require_role};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::read_json;
use crate::quota_policy;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use stowage_core::check::Role;
use stowage_metadata::models::{TokenRow, UserRow};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub user_name: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// The plaintext token appears here once and is never retrievable
/// again; only its hash is stored.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUserResponse {
    pub user_id: String,
    pub user_name: String,
    pub role: String,
    pub token: String,
}

/// Generate a fresh bearer token. 256 bits of UUIDv4 randomness behind
/// a recognizable prefix.
pub fn generate_token() -> String {
    format!(
        "stw_{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// POST /v1/admin/users — create a user with a quota account, an
/// initial grant, and a first token.
pub async fn create_user(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateUserResponse>)> {
    let auth = require_auth(&req)?;
    require_role(&auth, Role::Admin)?;
    let body: CreateUserRequest = read_json(req).await?;

    let user_name = body.user_name.trim();
    if user_name.is_empty() {
        return Err(ApiError::BadRequest(
            "user_name must not be empty".to_string(),
        ));
    }
    let role = match &body.role {
        Some(raw) => Role::parse(raw)?,
        None => Role::User,
    };

    let now = OffsetDateTime::now_utc();
    let user = UserRow {
        user_id: Uuid::new_v4(),
        user_name: user_name.to_string(),
        role: role.as_str().to_string(),
        created_at: now,
    };
    state.metadata.create_user(&user).await?;
    quota_policy::ensure_account_with_grant(
        state.metadata.as_ref(),
        user.user_id,
        &state.config.quota,
    )
    .await?;

    let raw_token = generate_token();
    let token = TokenRow {
        token_id: Uuid::new_v4(),
        user_id: user.user_id,
        token_hash: hash_token(&raw_token),
        description: Some(format!("initial token for {user_name}")),
        created_at: now,
        revoked_at: None,
    };
    state.metadata.create_token(&token).await?;

    tracing::info!(
        user_id = %user.user_id,
        user_name,
        role = %role,
        admin = %auth.user_name,
        "user created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            user_id: user.user_id.to_string(),
            user_name: user.user_name,
            role: role.as_str().to_string(),
            token: raw_token,
        }),
    ))
}
