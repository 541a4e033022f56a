//! Periodic background sweeps.

use crate::metrics::UPLOAD_SESSIONS_EXPIRED;
use crate::quota_policy;
use crate::state::AppState;
use std::path::Path;
use std::time::Duration;
use stowage_core::quota::QuotaReason;
use stowage_metadata::MetadataResult;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const EXPIRY_SWEEP_BATCH: u32 = 200;

/// Spawn all periodic sweeps.
pub fn spawn_sweeps(state: AppState) -> Vec<JoinHandle<()>> {
    vec![spawn_expiry_sweep(state.clone()), spawn_reduce_sweep(state)]
}

/// Reclaim expired upload sessions: return the quota reservation and
/// drop the spool file. Session rows stay in place (expiry is derived,
/// never stored) and the withdraw marks them done for future sweeps.
pub fn spawn_expiry_sweep(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match run_expiry_sweep(&state).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "expired upload sessions reclaimed"),
                Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
            }
        }
    })
}

/// One pass of the expiry sweep. Returns the number of sessions
/// reclaimed.
pub async fn run_expiry_sweep(state: &AppState) -> MetadataResult<u32> {
    let rows = state
        .metadata
        .expired_sessions(OffsetDateTime::now_utc(), EXPIRY_SWEEP_BATCH)
        .await?;

    let mut reclaimed = 0;
    for row in rows {
        let withdrawn = state
            .metadata
            .withdraw(row.creator_id, row.upload_id, QuotaReason::UploadWithdraw)
            .await?;
        if let Err(e) = state.spool.remove(Path::new(&row.spool_path)).await {
            tracing::warn!(
                upload_id = %row.upload_id,
                error = %e,
                "failed to remove expired spool file"
            );
        }
        state.release_session_lock(row.upload_id);
        UPLOAD_SESSIONS_EXPIRED.inc();
        reclaimed += 1;
        tracing::debug!(upload_id = %row.upload_id, withdrawn, "expired session reclaimed");
    }
    Ok(reclaimed)
}

/// Shrink idle over-base quota accounts on the configured interval.
pub fn spawn_reduce_sweep(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(
            state.config.quota.sweep_interval_secs,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match quota_policy::run_reduce_sweep(state.metadata.as_ref(), &state.config.quota)
                .await
            {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "idle quota accounts reduced"),
                Err(e) => tracing::error!(error = %e, "quota reduction sweep failed"),
            }
        }
    })
}
