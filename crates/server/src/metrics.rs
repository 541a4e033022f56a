//! Prometheus metrics for the stowage server.

use prometheus::{
    Encoder, IntCounter, IntCounterVec, TextEncoder, register_int_counter,
    register_int_counter_vec,
};
use std::sync::{LazyLock, Once};

pub static UPLOAD_SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "stowage_upload_sessions_created_total",
        "Upload sessions created"
    )
    .unwrap()
});

pub static UPLOAD_SESSIONS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "stowage_upload_sessions_completed_total",
        "Upload sessions completed with a verified whole-file hash"
    )
    .unwrap()
});

pub static UPLOAD_SESSIONS_ABORTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "stowage_upload_sessions_aborted_total",
        "Upload sessions explicitly aborted"
    )
    .unwrap()
});

pub static UPLOAD_SESSIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "stowage_upload_sessions_expired_total",
        "Expired upload sessions cleaned up by the sweep"
    )
    .unwrap()
});

pub static UPLOAD_CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "stowage_upload_chunks_received_total",
        "Chunks accepted and written to the spool"
    )
    .unwrap()
});

pub static UPLOAD_BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "stowage_upload_bytes_received_total",
        "Verified chunk bytes written to the spool"
    )
    .unwrap()
});

pub static CHUNK_HASH_MISMATCHES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "stowage_chunk_hash_mismatches_total",
        "Chunk bodies rejected for not matching their declared hash"
    )
    .unwrap()
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "stowage_upload_errors_total",
        "Upload API errors by code",
        &["code"]
    )
    .unwrap()
});

pub static UPLOADS_VETTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "stowage_uploads_vetted_total",
        "Vetting verdicts by check status",
        &["verdict"]
    )
    .unwrap()
});

pub static FILES_PROMOTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "stowage_files_promoted_total",
        "Files promoted to durable storage"
    )
    .unwrap()
});

pub static SCAN_INFECTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "stowage_scan_infections_total",
        "Uploads quarantined by the malware scanner"
    )
    .unwrap()
});

pub static QUOTA_TOPUPS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "stowage_quota_topups_total",
        "Dynamic quota capacity increases"
    )
    .unwrap()
});

pub static QUOTA_REDUCTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "stowage_quota_reductions_total",
        "Dynamic quota capacity decreases"
    )
    .unwrap()
});

pub static HASH_WORKER_FAULTS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "stowage_hash_worker_faults_total",
        "Digest thread faults (panics) in the hash worker"
    )
    .unwrap()
});

pub static JOB_RETRIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "stowage_job_retries_total",
        "Background job retries by job name",
        &["job"]
    )
    .unwrap()
});

static REGISTER_ONCE: Once = Once::new();

/// Force registration of all metrics.
///
/// LazyLock statics register on first use; calling this at startup makes
/// every series visible on /metrics from the first scrape.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        LazyLock::force(&UPLOAD_SESSIONS_CREATED);
        LazyLock::force(&UPLOAD_SESSIONS_COMPLETED);
        LazyLock::force(&UPLOAD_SESSIONS_ABORTED);
        LazyLock::force(&UPLOAD_SESSIONS_EXPIRED);
        LazyLock::force(&UPLOAD_CHUNKS_RECEIVED);
        LazyLock::force(&UPLOAD_BYTES_RECEIVED);
        LazyLock::force(&CHUNK_HASH_MISMATCHES);
        LazyLock::force(&UPLOAD_ERRORS);
        LazyLock::force(&UPLOADS_VETTED);
        LazyLock::force(&FILES_PROMOTED);
        LazyLock::force(&SCAN_INFECTIONS);
        LazyLock::force(&QUOTA_TOPUPS);
        LazyLock::force(&QUOTA_REDUCTIONS);
        LazyLock::force(&HASH_WORKER_FAULTS);
        LazyLock::force(&JOB_RETRIES);
    });
}

/// Record an upload API error by code.
pub fn record_upload_error(code: &str) {
    UPLOAD_ERRORS.with_label_values(&[code]).inc();
}

/// Render all registered metrics in the Prometheus text format.
pub async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!("failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
