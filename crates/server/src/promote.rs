//! Vetting pipeline and promotion processor.
//!
//! `vet_upload` runs a completed upload through the archive inspector
//! and the malware scan gate; clean files continue to `promote_upload`,
//! which streams the spool file into durable storage and finalizes the
//! file record. Both jobs are idempotent against replays and restarts.

use crate::inspect::{inspect_archive, is_archive_mime};
use crate::jobs::{Job, JobError};
use crate::metrics::{FILES_PROMOTED, SCAN_INFECTIONS, UPLOADS_VETTED};
use crate::state::AppState;
use bytes::Bytes;
use std::path::Path;
use stowage_core::check::CheckStatus;
use stowage_core::quota::QuotaReason;
use stowage_metadata::models::{FileRecordRow, ScanCaseRow};
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

const STREAM_BUF: usize = 64 * 1024;

/// Inspect and scan a completed upload, then hand clean files to the
/// promotion job.
#[tracing::instrument(skip(state))]
pub async fn vet_upload(state: &AppState, file_id: Uuid) -> Result<(), JobError> {
    let Some(file) = state.metadata.get_file(file_id).await? else {
        tracing::warn!(%file_id, "vet job for unknown file record; skipping");
        return Ok(());
    };
    if file.promoted {
        return Ok(());
    }

    let recorded = file.check_status()?;
    let status = match recorded {
        CheckStatus::Pending => {
            let verdict = run_inspection(state, &file).await?;
            state
                .metadata
                .update_check_status(file_id, verdict.as_str(), OffsetDateTime::now_utc())
                .await?;
            verdict
        }
        already => already,
    };

    if !status.is_promotable() {
        UPLOADS_VETTED.with_label_values(&[status.as_str()]).inc();
        tracing::info!(%file_id, verdict = %status, "upload failed inspection; not promoting");
        return Ok(());
    }

    if state.config.vetting.scan_enabled {
        let verdict = state.scanner.scan(Path::new(&file.local_path)).await?;
        if verdict.infected {
            quarantine(state, &file, &verdict.signatures).await?;
            UPLOADS_VETTED
                .with_label_values(&[CheckStatus::Infected.as_str()])
                .inc();
            return Ok(());
        }
    }

    UPLOADS_VETTED
        .with_label_values(&[CheckStatus::Ok.as_str()])
        .inc();
    state.jobs.enqueue(Job::PromoteUpload { file_id });
    Ok(())
}

/// Run the archive inspector when it applies. Non-archives and disabled
/// inspection pass through as `Ok`.
async fn run_inspection(state: &AppState, file: &FileRecordRow) -> Result<CheckStatus, JobError> {
    if !state.config.vetting.inspect_enabled {
        return Ok(CheckStatus::Ok);
    }
    let is_archive = file.mime_type.as_deref().is_some_and(is_archive_mime);
    if !is_archive {
        return Ok(CheckStatus::Ok);
    }
    Ok(inspect_archive(state.inspector.as_ref(), Path::new(&file.local_path)).await?)
}

/// Quarantine an infected upload: open a scan case, mark the record,
/// bump the owner's suspicious counter, drop the spool file, and return
/// the session's quota reservation.
async fn quarantine(
    state: &AppState,
    file: &FileRecordRow,
    signatures: &[String],
) -> Result<(), JobError> {
    let now = OffsetDateTime::now_utc();
    let case = ScanCaseRow {
        case_id: Uuid::new_v4(),
        file_id: file.file_id,
        owner_id: file.owner_id,
        signatures: serde_json::to_string(signatures)
            .map_err(|e| JobError::Failed(format!("encoding scan signatures: {e}")))?,
        state: "open".to_string(),
        opened_at: now,
    };
    state.metadata.create_scan_case(&case).await?;
    state
        .metadata
        .update_check_status(file.file_id, CheckStatus::Infected.as_str(), now)
        .await?;
    let suspicious = state.metadata.increment_suspicious(file.owner_id).await?;
    state.spool.remove(Path::new(&file.local_path)).await?;
    let withdrawn = state
        .metadata
        .withdraw(file.owner_id, file.upload_id, QuotaReason::ScanRejected)
        .await?;

    SCAN_INFECTIONS.inc();
    tracing::warn!(
        file_id = %file.file_id,
        owner_id = %file.owner_id,
        ?signatures,
        suspicious,
        withdrawn,
        "upload quarantined by malware scan"
    );
    Ok(())
}

/// Stream a vetted upload into durable storage and finalize its record.
#[tracing::instrument(skip(state))]
pub async fn promote_upload(state: &AppState, file_id: Uuid) -> Result<(), JobError> {
    let Some(file) = state.metadata.get_file(file_id).await? else {
        tracing::warn!(%file_id, "promote job for unknown file record; skipping");
        return Ok(());
    };
    if file.promoted {
        tracing::debug!(%file_id, "file already promoted; skipping");
        return Ok(());
    }
    let status = file.check_status()?;
    if !status.is_promotable() {
        return Err(JobError::Failed(format!(
            "file {file_id} is not promotable: check status is {status}"
        )));
    }

    let spool_path = Path::new(&file.local_path);
    let key = storage_key(file_id);
    let written = stream_to_storage(state, spool_path, &key).await?;
    if written != file.size_bytes as u64 {
        return Err(JobError::Failed(format!(
            "promoted object is {written} bytes, expected {}",
            file.size_bytes
        )));
    }

    let now = OffsetDateTime::now_utc();
    state.metadata.fill_history(file_id, &key, now).await?;
    state.metadata.mark_promoted(file_id, &key, now).await?;
    state.notifier.file_promoted(&file).await;
    state.metadata.reset_suspicious(file.owner_id).await?;

    // The spool copy is redundant now; a failed removal only leaks disk.
    if let Err(e) = state.spool.remove(spool_path).await {
        tracing::warn!(%file_id, error = %e, "failed to remove promoted spool file");
    }

    FILES_PROMOTED.inc();
    tracing::info!(%file_id, key, size = written, "file promoted");
    Ok(())
}

/// Durable storage key with hash fanout: `files/{aa}/{bb}/{file_id}`.
pub fn storage_key(file_id: Uuid) -> String {
    let hex = file_id.simple().to_string();
    format!("files/{}/{}/{hex}", &hex[0..2], &hex[2..4])
}

async fn stream_to_storage(
    state: &AppState,
    spool_path: &Path,
    key: &str,
) -> Result<u64, JobError> {
    let mut upload = state.storage.put_stream(key).await?;
    let mut src = match tokio::fs::File::open(spool_path).await {
        Ok(f) => f,
        Err(e) => {
            let _ = upload.abort().await;
            return Err(e.into());
        }
    };

    let mut buf = vec![0u8; STREAM_BUF];
    loop {
        let n = match src.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                let _ = upload.abort().await;
                return Err(e.into());
            }
        };
        if n == 0 {
            break;
        }
        if let Err(e) = upload.write(Bytes::copy_from_slice(&buf[..n])).await {
            let _ = upload.abort().await;
            return Err(e.into());
        }
    }
    Ok(upload.finish().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_fanout() {
        let id = Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap();
        let key = storage_key(id);
        assert_eq!(key, "files/a1/b2/a1b2c3d4000000000000000000000000");
    }

    #[test]
    fn test_storage_key_is_stable() {
        let id = Uuid::new_v4();
        assert_eq!(storage_key(id), storage_key(id));
    }
}
