//! Dynamic quota policy: initial grants, activity top-ups, idle
//! reductions.
//!
//! The contract: `base_grant ≤ size ≤ cap` for every account the policy
//! touches, and `size` never drops below `used`. Decisions are pure
//! functions over the account; the async wrappers apply them through
//! the ledger.

use crate::metrics::{QUOTA_REDUCTIONS, QUOTA_TOPUPS};
use stowage_core::config::QuotaConfig;
use stowage_core::quota::{QuotaAccount, QuotaAction, QuotaReason};
use stowage_metadata::{MetadataError, MetadataResult, MetadataStore};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

const REDUCE_SWEEP_BATCH: u32 = 500;

/// Create the user's quota account and apply the initial capacity
/// grant. Safe to call for existing accounts.
pub async fn ensure_account_with_grant(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    quota: &QuotaConfig,
) -> MetadataResult<()> {
    match metadata.create_account(user_id).await {
        Ok(()) => {}
        Err(MetadataError::AlreadyExists(_)) => return Ok(()),
        Err(e) => return Err(e),
    }
    metadata
        .adjust_size(
            user_id,
            QuotaAction::Add,
            quota.base_grant_bytes,
            QuotaReason::InitialGrant,
        )
        .await
}

/// Whether an account qualifies for a dynamic top-up: the initial grant
/// already happened, headroom has fallen below the configured fraction
/// of size, there is room under the cap, and the account completed an
/// upload recently enough to count as active.
pub fn should_topup(
    account: &QuotaAccount,
    last_completed: Option<OffsetDateTime>,
    quota: &QuotaConfig,
    now: OffsetDateTime,
) -> bool {
    if account.is_first_grant {
        return false;
    }
    let threshold = (account.size as f64 * quota.topup_headroom_fraction) as u64;
    if account.headroom() >= threshold {
        return false;
    }
    if account.size >= quota.cap_bytes {
        return false;
    }
    let Some(completed) = last_completed else {
        return false;
    };
    now - completed <= Duration::seconds(quota.topup_recent_window_secs as i64)
}

/// Apply a top-up if the account qualifies. Returns whether capacity
/// was granted.
pub async fn maybe_topup(
    metadata: &dyn MetadataStore,
    user_id: Uuid,
    quota: &QuotaConfig,
) -> MetadataResult<bool> {
    let Some(row) = metadata.get_account(user_id).await? else {
        return Ok(false);
    };
    let account = row.into_account();
    let last_completed = metadata.last_completed_at(user_id).await?;
    if !should_topup(&account, last_completed, quota, OffsetDateTime::now_utc()) {
        return Ok(false);
    }

    let amount = quota
        .topup_step_bytes
        .min(quota.cap_bytes.saturating_sub(account.size));
    if amount == 0 {
        return Ok(false);
    }
    metadata
        .adjust_size(user_id, QuotaAction::Add, amount, QuotaReason::DynamicTopup)
        .await?;
    QUOTA_TOPUPS.inc();
    tracing::info!(%user_id, amount, "quota topped up");
    Ok(true)
}

/// Capacity to remove from an idle account: one step, floored at the
/// base grant and at the account's current usage.
pub fn reduce_amount(account: &QuotaAccount, quota: &QuotaConfig) -> u64 {
    let over_base = account.size.saturating_sub(quota.base_grant_bytes);
    quota
        .reduce_step_bytes
        .min(over_base)
        .min(account.headroom())
}

/// Whether the account has been idle long enough to shrink. Accounts
/// with no sessions at all fall back to their creation time.
pub fn is_idle(
    last_activity: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    quota: &QuotaConfig,
    now: OffsetDateTime,
) -> bool {
    let reference = last_activity.unwrap_or(created_at);
    now - reference > Duration::days(quota.reduce_after_days as i64)
}

/// One pass of the reduction sweep. Returns the number of accounts
/// shrunk.
pub async fn run_reduce_sweep(
    metadata: &dyn MetadataStore,
    quota: &QuotaConfig,
) -> MetadataResult<u32> {
    let accounts = metadata
        .accounts_over_size(quota.base_grant_bytes, REDUCE_SWEEP_BATCH)
        .await?;
    let now = OffsetDateTime::now_utc();
    let mut reduced = 0;

    for row in accounts {
        let account = row.into_account();
        let last = metadata.last_session_activity(account.user_id).await?;
        if !is_idle(last, account.created_at, quota, now) {
            continue;
        }
        let amount = reduce_amount(&account, quota);
        if amount == 0 {
            continue;
        }
        metadata
            .adjust_size(
                account.user_id,
                QuotaAction::Sub,
                amount,
                QuotaReason::DynamicReduce,
            )
            .await?;
        QUOTA_REDUCTIONS.inc();
        reduced += 1;
        tracing::debug!(user_id = %account.user_id, amount, "idle quota reduced");
    }
    Ok(reduced)
}
