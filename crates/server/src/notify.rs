//! Uploader notification seam.
//!
//! Promotion fires a notification once a file lands in durable storage.
//! Delivery is fire-and-forget: a failed or missing notification never
//! fails the promotion.

use async_trait::async_trait;
use stowage_metadata::models::FileRecordRow;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn file_promoted(&self, file: &FileRecordRow);
}

/// Default notifier: a structured log line.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn file_promoted(&self, file: &FileRecordRow) {
        tracing::info!(
            file_id = %file.file_id,
            owner_id = %file.owner_id,
            file_name = %file.file_name,
            "file promoted to durable storage"
        );
    }
}
