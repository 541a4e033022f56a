//! Authentication and authorization middleware.
//!
//! Every protected route passes through [`auth_middleware`], which
//! resolves the bearer token to a user and stores an
//! [`AuthenticatedUser`] request extension. Only the SHA-256 hash of a
//! token ever touches the database.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use stowage_core::check::Role;
use stowage_core::hash::ContentHash;
use uuid::Uuid;

/// The authenticated principal for a request.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub user_name: String,
    pub role: Role,
    pub token_id: Uuid,
}

/// Extract the bearer token from the Authorization header. The scheme
/// comparison is case-insensitive per RFC 6750.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// SHA-256 hex digest of a raw token, the only form that is stored or
/// compared.
pub fn hash_token(token: &str) -> String {
    ContentHash::compute(token.as_bytes()).to_hex()
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> ApiResult<AuthenticatedUser> {
    let token = extract_bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    let hash = hash_token(token);

    let token_row = state
        .metadata
        .get_token_by_hash(&hash)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("unknown token".to_string()))?;
    if token_row.revoked_at.is_some() {
        return Err(ApiError::Unauthorized("token has been revoked".to_string()));
    }

    let user = state
        .metadata
        .get_user(token_row.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("token user no longer exists".to_string()))?;
    let role = user.role()?;

    Ok(AuthenticatedUser {
        user_id: user.user_id,
        user_name: user.user_name,
        role,
        token_id: token_row.token_id,
    })
}

/// Middleware resolving bearer tokens for protected routes.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    match authenticate(&state, req.headers()).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// Get the authenticated user from request extensions.
pub fn require_auth(req: &Request) -> ApiResult<AuthenticatedUser> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("request is not authenticated".to_string()))
}

/// Reject callers below the required role.
pub fn require_role(user: &AuthenticatedUser, role: Role) -> ApiResult<()> {
    if user.role >= role {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!("requires the {role} role")))
    }
}
