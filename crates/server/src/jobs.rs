//! In-process background job queue.
//!
//! Completion enqueues vetting work; vetting enqueues promotion. A
//! single runner task drains the queue and retries failed attempts with
//! exponential backoff. The queue is process-local: jobs lost to a
//! restart are re-enqueued at startup from unpromoted file records.

use crate::hasher::HashError;
use crate::metrics::JOB_RETRIES;
use crate::promote;
use crate::state::AppState;
use std::time::Duration;
use stowage_metadata::MetadataError;
use stowage_storage::StorageError;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Background job failure. All variants are retryable by the runner.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// The closed set of background jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Inspect and scan a completed upload.
    VetUpload { file_id: Uuid },
    /// Stream a vetted upload into durable storage.
    PromoteUpload { file_id: Uuid },
}

impl Job {
    /// Job name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::VetUpload { .. } => "vet_upload",
            Self::PromoteUpload { .. } => "promote_upload",
        }
    }
}

/// Sending half of the job queue, held by [`AppState`].
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    /// Create the queue. The receiver goes to [`spawn_runner`].
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a job. A closed queue (shutdown in progress) drops the
    /// job with an error log; startup re-enqueue recovers it later.
    pub fn enqueue(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::error!("job queue is closed; dropping job");
        }
    }
}

/// Spawn the runner task draining the queue.
pub fn spawn_runner(
    state: AppState,
    mut rx: mpsc::UnboundedReceiver<Job>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            run_with_retries(&state, job).await;
        }
        tracing::debug!("job runner stopped");
    })
}

async fn run_with_retries(state: &AppState, job: Job) {
    let vetting = &state.config.vetting;
    let attempts = vetting.job_attempts.max(1);
    let max_delay = Duration::from_millis(vetting.job_backoff_max_ms);
    let mut delay = Duration::from_millis(vetting.job_backoff_base_ms).min(max_delay);

    for attempt in 1..=attempts {
        match run_job(state, &job).await {
            Ok(()) => return,
            Err(e) if attempt == attempts => {
                tracing::error!(job = job.name(), error = %e, attempts, "job failed permanently");
            }
            Err(e) => {
                tracing::warn!(job = job.name(), error = %e, attempt, "job attempt failed; retrying");
                JOB_RETRIES.with_label_values(&[job.name()]).inc();
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, max_delay);
            }
        }
    }
}

fn next_delay(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

async fn run_job(state: &AppState, job: &Job) -> Result<(), JobError> {
    match job {
        Job::VetUpload { file_id } => promote::vet_upload(state, *file_id).await,
        Job::PromoteUpload { file_id } => promote::promote_upload(state, *file_id).await,
    }
}
