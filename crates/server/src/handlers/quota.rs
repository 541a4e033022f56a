//! Quota handlers: self-service account view plus admin adjustments.

use crate::auth::{require_auth, require_role};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::read_json;
use crate::state::AppState;
use axum::extract::{Path, Query, Request, State};
use axum::Json;
use serde::Deserialize;
use stowage_core::check::Role;
use stowage_core::quota::{QuotaAccount, QuotaAction, QuotaReason, QuotaRecord};
use uuid::Uuid;

const DEFAULT_RECORD_LIMIT: u32 = 100;
const MAX_RECORD_LIMIT: u32 = 1000;

fn parse_user_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| ApiError::BadRequest(format!("invalid user ID: {e}")))
}

/// GET /v1/quota — the caller's own account.
pub async fn get_quota(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<QuotaAccount>> {
    let auth = require_auth(&req)?;
    let row = state
        .metadata
        .get_account(auth.user_id)
        .await?
        .ok_or(ApiError::QuotaNotFound)?;
    Ok(Json(row.into_account()))
}

/// Admin adjustment request. `reason` is optional: additions default to
/// an admin grant, subtractions to a penalty.
#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub action: String,
    pub amount: u64,
    #[serde(default)]
    pub reason: Option<String>,
}

impl AdjustRequest {
    fn action(&self) -> ApiResult<QuotaAction> {
        Ok(QuotaAction::parse(&self.action)?)
    }

    fn reason(&self, action: QuotaAction) -> ApiResult<QuotaReason> {
        match &self.reason {
            Some(raw) => Ok(QuotaReason::parse(raw)?),
            None => Ok(match action {
                QuotaAction::Sub => QuotaReason::Penalty,
                QuotaAction::Add | QuotaAction::Use => QuotaReason::AdminGrant,
            }),
        }
    }
}

async fn account_after(state: &AppState, user_id: Uuid) -> ApiResult<Json<QuotaAccount>> {
    let row = state
        .metadata
        .get_account(user_id)
        .await?
        .ok_or(ApiError::QuotaNotFound)?;
    Ok(Json(row.into_account()))
}

/// POST /v1/admin/quota/{user_id}/used
pub async fn adjust_used(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    req: Request,
) -> ApiResult<Json<QuotaAccount>> {
    let auth = require_auth(&req)?;
    require_role(&auth, Role::Admin)?;
    let user_id = parse_user_id(&user_id)?;
    let body: AdjustRequest = read_json(req).await?;
    let action = body.action()?;
    let reason = body.reason(action)?;

    state
        .metadata
        .adjust_used(user_id, action, body.amount, reason, None)
        .await?;
    tracing::info!(
        %user_id,
        admin = %auth.user_name,
        %action,
        amount = body.amount,
        %reason,
        "admin adjusted used"
    );
    account_after(&state, user_id).await
}

/// POST /v1/admin/quota/{user_id}/size
pub async fn adjust_size(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    req: Request,
) -> ApiResult<Json<QuotaAccount>> {
    let auth = require_auth(&req)?;
    require_role(&auth, Role::Admin)?;
    let user_id = parse_user_id(&user_id)?;
    let body: AdjustRequest = read_json(req).await?;
    let action = body.action()?;
    let reason = body.reason(action)?;

    state
        .metadata
        .adjust_size(user_id, action, body.amount, reason)
        .await?;
    tracing::info!(
        %user_id,
        admin = %auth.user_name,
        %action,
        amount = body.amount,
        %reason,
        "admin adjusted size"
    );
    account_after(&state, user_id).await
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

/// GET /v1/admin/quota/{user_id}/records — ledger, newest first.
pub async fn list_records(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<RecordsQuery>,
    req: Request,
) -> ApiResult<Json<Vec<QuotaRecord>>> {
    let auth = require_auth(&req)?;
    require_role(&auth, Role::Admin)?;
    let user_id = parse_user_id(&user_id)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECORD_LIMIT)
        .min(MAX_RECORD_LIMIT);

    let rows = state.metadata.list_records(user_id, limit).await?;
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(row.into_record()?);
    }
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_reason_defaults() {
        let add = AdjustRequest {
            action: "add".to_string(),
            amount: 10,
            reason: None,
        };
        assert_eq!(add.reason(add.action().unwrap()).unwrap(), QuotaReason::AdminGrant);

        let sub = AdjustRequest {
            action: "sub".to_string(),
            amount: 10,
            reason: None,
        };
        assert_eq!(sub.reason(sub.action().unwrap()).unwrap(), QuotaReason::Penalty);

        let explicit = AdjustRequest {
            action: "add".to_string(),
            amount: 10,
            reason: Some("dynamic_topup".to_string()),
        };
        assert_eq!(
            explicit.reason(explicit.action().unwrap()).unwrap(),
            QuotaReason::DynamicTopup
        );
    }

    #[test]
    fn test_adjust_rejects_unknown_vocabulary() {
        let bad_action = AdjustRequest {
            action: "mul".to_string(),
            amount: 1,
            reason: None,
        };
        assert!(bad_action.action().is_err());

        let bad_reason = AdjustRequest {
            action: "add".to_string(),
            amount: 1,
            reason: Some("bonus".to_string()),
        };
        assert!(bad_reason.reason(QuotaAction::Add).is_err());
    }
}
