//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use serde::de::DeserializeOwned;
use serde_json::json;

/// Upper bound for JSON request bodies. Chunk bodies have their own
/// exact-length cap.
pub const MAX_JSON_BODY: usize = 64 * 1024;

/// Read and deserialize a JSON request body.
pub async fn read_json<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_JSON_BODY)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

/// Like [`read_json`], but an empty body yields the default.
pub async fn read_json_or_default<T: DeserializeOwned + Default>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_JSON_BODY)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {e}")))?;
    if bytes.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

/// Health endpoint: verifies metadata and storage connectivity.
pub async fn health_handler(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.metadata.health_check().await?;
    state.storage.health_check().await?;
    Ok(Json(json!({ "status": "ok" })))
}
