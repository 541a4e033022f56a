//! Authentication-related endpoints.

use crate::auth::require_auth;
use crate::error::ApiResult;
use axum::extract::Request;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct WhoamiResponse {
    pub user_id: String,
    pub user_name: String,
    pub role: String,
}

/// GET /v1/auth/whoami — identify the calling token's principal.
pub async fn whoami(req: Request) -> ApiResult<Json<WhoamiResponse>> {
    let auth = require_auth(&req)?;
    Ok(Json(WhoamiResponse {
        user_id: auth.user_id.to_string(),
        user_name: auth.user_name,
        role: auth.role.as_str().to_string(),
    }))
}
