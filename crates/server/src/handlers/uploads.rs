//! Upload session handlers: create, chunk write, status, complete,
//! abort, list.
//!
//! Chunk writes are hash-then-write: the body digest is checked against
//! the declared `x-chunk-hash` before any spool mutation, so the spool
//! never holds unverified bytes. Replays of an already-stored index
//! verify against the spool contents and never mutate anything.

use crate::auth::require_auth;
use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{read_json, read_json_or_default};
use crate::hasher::HashInput;
use crate::jobs::Job;
use crate::metrics::{
    record_upload_error, CHUNK_HASH_MISMATCHES, UPLOAD_BYTES_RECEIVED, UPLOAD_CHUNKS_RECEIVED,
    UPLOAD_SESSIONS_ABORTED, UPLOAD_SESSIONS_COMPLETED, UPLOAD_SESSIONS_CREATED,
};
use crate::state::AppState;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::Json;
use serde::Serialize;
use std::path::PathBuf;
use stowage_core::check::{CheckStatus, Role};
use stowage_core::hash::HashAlgorithm;
use stowage_core::quota::QuotaReason;
use stowage_core::session::{
    self, ChunkAck, CompleteUploadRequest, CompleteUploadResponse, CreateUploadRequest,
    CreateUploadResponse, EffectiveStatus, UploadId, UploadSession, UploadState,
    UploadStatusResponse,
};
use stowage_metadata::models::{FileRecordRow, UploadSessionRow};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Header carrying the SHA-256 hex digest of a chunk body.
pub const CHUNK_HASH_HEADER: &str = "x-chunk-hash";

/// How much of the file head feeds MIME sniffing at completion.
const SNIFF_LEN: u64 = 8192;

fn rfc3339(t: OffsetDateTime) -> ApiResult<String> {
    t.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("timestamp formatting: {e}")))
}

/// Validate a hex digest against the algorithm's expected length.
fn validate_hex_digest(hash: &str, algorithm: HashAlgorithm) -> ApiResult<()> {
    if hash.len() != algorithm.hex_len() || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ApiError::BadRequest(format!(
            "expected a {algorithm} hex digest of {} characters",
            algorithm.hex_len()
        )));
    }
    Ok(())
}

/// Load a session and enforce ownership. Other users' sessions read as
/// not found so the ID space leaks nothing; admins see everything.
async fn load_owned_session(
    state: &AppState,
    auth: &AuthenticatedUser,
    upload_id: &str,
) -> ApiResult<UploadSession> {
    let id = UploadId::parse(upload_id)?;
    let row = state
        .metadata
        .get_session(*id.as_uuid())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("upload session {id}")))?;
    let session = row.into_session()?;
    if session.creator_id != auth.user_id && auth.role < Role::Admin {
        return Err(ApiError::NotFound(format!("upload session {id}")));
    }
    Ok(session)
}

// =============================================================================
// POST /v1/uploads
// =============================================================================

pub async fn create_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateUploadResponse>)> {
    match create_upload_inner(state, req).await {
        Ok(resp) => Ok(resp),
        Err(e) => {
            record_upload_error(e.code());
            Err(e)
        }
    }
}

async fn create_upload_inner(
    state: AppState,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateUploadResponse>)> {
    let auth = require_auth(&req)?;
    let body: CreateUploadRequest = read_json(req).await?;
    let limits = &state.config.upload;

    let file_name = body.file_name.trim();
    if file_name.is_empty() {
        return Err(ApiError::BadRequest(
            "file_name must not be empty".to_string(),
        ));
    }
    if body.total_size == 0 {
        return Err(ApiError::InvalidTotalSize(0));
    }
    if body.total_size > limits.max_total_size && !auth.role.exempt_from_size_limit() {
        return Err(ApiError::TooLarge {
            requested: body.total_size,
            max: limits.max_total_size,
        });
    }

    let chunk_size = body.chunk_size.unwrap_or(limits.default_chunk_size);
    if chunk_size < limits.min_chunk_size || chunk_size > limits.max_chunk_size {
        return Err(ApiError::BadRequest(format!(
            "chunk_size {chunk_size} outside the allowed range [{}, {}]",
            limits.min_chunk_size, limits.max_chunk_size
        )));
    }

    let total_chunks = session::total_chunks(body.total_size, chunk_size);
    if total_chunks > limits.max_chunks && !auth.role.exempt_from_chunk_limit() {
        return Err(ApiError::TooManyChunks {
            requested: total_chunks,
            max: limits.max_chunks,
        });
    }

    let hash_algorithm = body.hash_algorithm.unwrap_or_default();
    let file_hash = match body.file_hash {
        Some(hash) => {
            let hash = hash.to_ascii_lowercase();
            validate_hex_digest(&hash, hash_algorithm)?;
            Some(hash)
        }
        None => None,
    };

    // Active accounts get their dynamic top-up before the reservation
    // is attempted, so the top-up can absorb this upload.
    maybe_topup(&state, auth.user_id).await;

    let id = UploadId::new();
    state
        .metadata
        .reserve(auth.user_id, body.total_size, *id.as_uuid())
        .await?;

    let spool_path = state.spool.path_for(&id);
    let now = OffsetDateTime::now_utc();
    let new_session = UploadSession {
        id,
        creator_id: auth.user_id,
        file_name: file_name.to_string(),
        total_size: body.total_size,
        chunk_size,
        total_chunks,
        hash_algorithm,
        file_hash,
        mime_type: None,
        spool_path: spool_path.display().to_string(),
        state: UploadState::Uploading,
        created_at: now,
        updated_at: now,
        expires_at: now + limits.session_ttl(),
    };

    if let Err(e) = setup_session(&state, &new_session).await {
        // Roll the reservation back before surfacing the failure.
        if let Err(werr) = state
            .metadata
            .withdraw(auth.user_id, *id.as_uuid(), QuotaReason::UploadWithdraw)
            .await
        {
            tracing::error!(upload_id = %id, error = %werr, "failed to roll back reservation");
        }
        if let Err(rerr) = state.spool.remove(&spool_path).await {
            tracing::warn!(upload_id = %id, error = %rerr, "failed to remove spool file");
        }
        return Err(e);
    }

    UPLOAD_SESSIONS_CREATED.inc();
    tracing::info!(
        upload_id = %id,
        user_id = %auth.user_id,
        total_size = body.total_size,
        total_chunks,
        "upload session created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateUploadResponse {
            upload_session_id: id.to_string(),
            chunk_size,
            total_chunks,
            expires_at: rfc3339(new_session.expires_at)?,
        }),
    ))
}

async fn setup_session(state: &AppState, session: &UploadSession) -> ApiResult<()> {
    state
        .spool
        .allocate(
            std::path::Path::new(&session.spool_path),
            session.total_size,
        )
        .await?;
    state
        .metadata
        .create_session(&UploadSessionRow::from_session(session))
        .await?;
    Ok(())
}

/// A failed top-up must not block the upload; it only means the
/// reservation is judged against the current ceiling.
async fn maybe_topup(state: &AppState, user_id: Uuid) {
    if let Err(e) =
        crate::quota_policy::maybe_topup(state.metadata.as_ref(), user_id, &state.config.quota)
            .await
    {
        tracing::warn!(%user_id, error = %e, "dynamic top-up failed");
    }
}

// =============================================================================
// PUT /v1/uploads/{id}/chunks/{index}
// =============================================================================

pub async fn write_chunk(
    State(state): State<AppState>,
    Path((upload_id, chunk_index)): Path<(String, u64)>,
    req: Request,
) -> ApiResult<Json<ChunkAck>> {
    match write_chunk_inner(state, upload_id, chunk_index, req).await {
        Ok(ack) => Ok(ack),
        Err(e) => {
            record_upload_error(e.code());
            Err(e)
        }
    }
}

async fn write_chunk_inner(
    state: AppState,
    upload_id: String,
    chunk_index: u64,
    req: Request,
) -> ApiResult<Json<ChunkAck>> {
    let auth = require_auth(&req)?;
    let session = load_owned_session(&state, &auth, &upload_id).await?;

    match session.state {
        UploadState::Uploading => {}
        other => {
            return Err(ApiError::Conflict(format!(
                "session is {}, not accepting chunks",
                other.as_str()
            )));
        }
    }
    if chunk_index >= session.total_chunks {
        return Err(ApiError::InvalidChunkIndex {
            index: chunk_index,
            total: session.total_chunks,
        });
    }
    if session.is_expired() {
        return Err(ApiError::SessionExpired);
    }

    let declared = req
        .headers()
        .get(CHUNK_HASH_HEADER)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {CHUNK_HASH_HEADER} header")))?
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("malformed {CHUNK_HASH_HEADER} header")))?
        .trim()
        .to_ascii_lowercase();
    if declared.len() != 64 || !declared.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ApiError::BadRequest(format!(
            "{CHUNK_HASH_HEADER} must be a 64-character SHA-256 hex digest"
        )));
    }

    let expected_len = session.chunk_len(chunk_index);
    let content_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or(ApiError::InvalidContentLength {
            expected: expected_len,
            actual: 0,
        })?;
    if content_length != expected_len {
        return Err(ApiError::InvalidContentLength {
            expected: expected_len,
            actual: content_length,
        });
    }

    let offset = session.chunk_offset(chunk_index);
    let spool_path = PathBuf::from(&session.spool_path);

    // Replay: verify the stored bytes still carry the declared hash and
    // acknowledge without touching the spool.
    if state
        .metadata
        .has_chunk(*session.id.as_uuid(), chunk_index)
        .await?
    {
        let stored = state
            .spool
            .read_range(&spool_path, offset, expected_len)
            .await?;
        let stored_hash = state
            .hasher
            .calculate(HashAlgorithm::Sha256, HashInput::Bytes(stored))
            .await?;
        if stored_hash != declared {
            return Err(ApiError::InvalidChunkHash);
        }
        return Ok(Json(ChunkAck {
            ok: true,
            chunk_index,
        }));
    }

    let body = axum::body::to_bytes(req.into_body(), expected_len as usize)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read chunk body: {e}")))?;
    if body.len() as u64 != expected_len {
        return Err(ApiError::InvalidContentLength {
            expected: expected_len,
            actual: body.len() as u64,
        });
    }

    // Hash before any spool mutation.
    let actual = state
        .hasher
        .calculate(HashAlgorithm::Sha256, HashInput::Bytes(body.clone()))
        .await?;
    if actual != declared {
        CHUNK_HASH_MISMATCHES.inc();
        return Err(ApiError::ChunkHashMismatch {
            expected: declared,
            actual,
        });
    }

    let lock = state.session_lock(*session.id.as_uuid());
    let guard = lock.lock().await;
    state.spool.write_at(&spool_path, offset, body).await?;
    state
        .metadata
        .record_chunk(
            *session.id.as_uuid(),
            chunk_index,
            OffsetDateTime::now_utc(),
        )
        .await?;
    drop(guard);

    UPLOAD_CHUNKS_RECEIVED.inc();
    UPLOAD_BYTES_RECEIVED.inc_by(expected_len);
    tracing::debug!(upload_id = %session.id, chunk_index, len = expected_len, "chunk stored");

    Ok(Json(ChunkAck {
        ok: true,
        chunk_index,
    }))
}

// =============================================================================
// GET /v1/uploads/{id}
// =============================================================================

pub async fn upload_status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<Json<UploadStatusResponse>> {
    let auth = require_auth(&req)?;
    let session = load_owned_session(&state, &auth, &upload_id).await?;
    let uploaded_chunks = state
        .metadata
        .received_chunks(*session.id.as_uuid())
        .await?;

    Ok(Json(UploadStatusResponse {
        upload_session_id: session.id.to_string(),
        status: session.effective_status(),
        uploaded_chunks,
        total_chunks: session.total_chunks,
        chunk_size: session.chunk_size,
        total_size: session.total_size,
        expires_at: rfc3339(session.expires_at)?,
    }))
}

// =============================================================================
// POST /v1/uploads/{id}/complete
// =============================================================================

pub async fn complete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<Json<CompleteUploadResponse>> {
    match complete_upload_inner(state, upload_id, req).await {
        Ok(resp) => Ok(resp),
        Err(e) => {
            record_upload_error(e.code());
            Err(e)
        }
    }
}

async fn complete_upload_inner(
    state: AppState,
    upload_id: String,
    req: Request,
) -> ApiResult<Json<CompleteUploadResponse>> {
    let auth = require_auth(&req)?;
    let session = load_owned_session(&state, &auth, &upload_id).await?;

    match session.state {
        UploadState::Completed => {
            // Completion is idempotent: return the file record the first
            // completion produced.
            if let Some(file) = state
                .metadata
                .get_file_by_upload(*session.id.as_uuid())
                .await?
            {
                let path = crate::promote::storage_key(file.file_id);
                return Ok(Json(CompleteUploadResponse {
                    ok: true,
                    file_id: file.file_id.to_string(),
                    file_name: file.file_name,
                    mime_type: file.mime_type,
                    path,
                }));
            }
            return Err(ApiError::Conflict("session already completed".to_string()));
        }
        UploadState::Aborted => {
            return Err(ApiError::Conflict("session is aborted".to_string()));
        }
        UploadState::Uploading => {}
    }

    let body: CompleteUploadRequest = read_json_or_default(req).await?;
    let expected = match (&session.file_hash, &body.file_hash) {
        (Some(declared), Some(given)) if !declared.eq_ignore_ascii_case(given) => {
            return Err(ApiError::Conflict(
                "file_hash differs from the hash declared at creation".to_string(),
            ));
        }
        (Some(declared), _) => declared.clone(),
        (None, Some(given)) => given.to_ascii_lowercase(),
        (None, None) => {
            return Err(ApiError::BadRequest(
                "file_hash must be supplied at creation or completion".to_string(),
            ));
        }
    };
    validate_hex_digest(&expected, session.hash_algorithm)?;

    let received = state
        .metadata
        .count_received_chunks(*session.id.as_uuid())
        .await?;
    if received < session.total_chunks {
        return Err(ApiError::UploadIncomplete {
            missing: session.total_chunks - received,
            total: session.total_chunks,
        });
    }
    if session.is_expired() {
        return Err(ApiError::SessionExpired);
    }

    let lock = state.session_lock(*session.id.as_uuid());
    let guard = lock.lock().await;

    let spool_path = PathBuf::from(&session.spool_path);
    let actual = state
        .hasher
        .calculate(session.hash_algorithm, HashInput::File(spool_path.clone()))
        .await?;
    if actual != expected {
        // Session stays uploading so the client can repair chunks.
        return Err(ApiError::FileHashMismatch { expected, actual });
    }

    let head = state
        .spool
        .read_range(&spool_path, 0, SNIFF_LEN.min(session.total_size))
        .await?;
    let mime_type = infer::get(&head).map(|t| t.mime_type().to_string());

    let now = OffsetDateTime::now_utc();
    state
        .metadata
        .complete_session(*session.id.as_uuid(), mime_type.as_deref(), now)
        .await?;

    let file = FileRecordRow {
        file_id: Uuid::new_v4(),
        upload_id: *session.id.as_uuid(),
        owner_id: session.creator_id,
        file_name: session.file_name.clone(),
        size_bytes: session.total_size as i64,
        file_hash: actual,
        hash_algorithm: session.hash_algorithm.as_str().to_string(),
        mime_type: mime_type.clone(),
        local_path: session.spool_path.clone(),
        check_status: CheckStatus::Pending.as_str().to_string(),
        promoted: false,
        storage_key: None,
        created_at: now,
        updated_at: now,
    };
    state.metadata.create_file(&file).await?;

    drop(guard);
    state.release_session_lock(*session.id.as_uuid());

    UPLOAD_SESSIONS_COMPLETED.inc();
    state.jobs.enqueue(Job::VetUpload {
        file_id: file.file_id,
    });
    tracing::info!(
        upload_id = %session.id,
        file_id = %file.file_id,
        mime_type = mime_type.as_deref().unwrap_or("unknown"),
        "upload completed and queued for vetting"
    );

    Ok(Json(CompleteUploadResponse {
        ok: true,
        file_id: file.file_id.to_string(),
        file_name: file.file_name.clone(),
        mime_type,
        path: crate::promote::storage_key(file.file_id),
    }))
}

// =============================================================================
// POST /v1/uploads/{id}/abort
// =============================================================================

pub async fn abort_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    match abort_upload_inner(state, upload_id, req).await {
        Ok(status) => Ok(status),
        Err(e) => {
            record_upload_error(e.code());
            Err(e)
        }
    }
}

async fn abort_upload_inner(
    state: AppState,
    upload_id: String,
    req: Request,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&req)?;
    let session = load_owned_session(&state, &auth, &upload_id).await?;

    match session.state {
        UploadState::Completed => {
            return Err(ApiError::Conflict("session already completed".to_string()));
        }
        // Repeated aborts succeed. The withdraw runs again in case an
        // earlier attempt flipped the state but failed before the
        // reservation was returned; it no-ops once the credit exists.
        UploadState::Aborted => {
            state
                .metadata
                .withdraw(
                    session.creator_id,
                    *session.id.as_uuid(),
                    QuotaReason::UploadWithdraw,
                )
                .await?;
            return Ok(StatusCode::NO_CONTENT);
        }
        // Expired sessions may still be aborted: abort is the cleanup path.
        UploadState::Uploading => {}
    }

    let now = OffsetDateTime::now_utc();
    state
        .metadata
        .update_state(*session.id.as_uuid(), UploadState::Aborted.as_str(), now)
        .await?;
    let withdrawn = state
        .metadata
        .withdraw(
            session.creator_id,
            *session.id.as_uuid(),
            QuotaReason::UploadWithdraw,
        )
        .await?;
    if let Err(e) = state
        .spool
        .remove(std::path::Path::new(&session.spool_path))
        .await
    {
        tracing::warn!(upload_id = %session.id, error = %e, "failed to remove spool file");
    }
    state.release_session_lock(*session.id.as_uuid());

    UPLOAD_SESSIONS_ABORTED.inc();
    tracing::info!(upload_id = %session.id, withdrawn, "upload session aborted");
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// GET /v1/uploads
// =============================================================================

/// One entry in the active-session listing.
#[derive(Debug, Serialize)]
pub struct UploadSummary {
    pub upload_session_id: String,
    pub file_name: String,
    pub status: EffectiveStatus,
    pub uploaded_chunks: u64,
    pub total_chunks: u64,
    pub chunk_size: u64,
    pub total_size: u64,
    pub expires_at: String,
}

pub async fn list_uploads(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Vec<UploadSummary>>> {
    let auth = require_auth(&req)?;
    let rows = state
        .metadata
        .list_active_sessions(auth.user_id, OffsetDateTime::now_utc())
        .await?;

    let mut summaries = Vec::with_capacity(rows.len());
    for row in rows {
        let session = row.into_session()?;
        let uploaded = state
            .metadata
            .count_received_chunks(*session.id.as_uuid())
            .await?;
        summaries.push(UploadSummary {
            upload_session_id: session.id.to_string(),
            file_name: session.file_name.clone(),
            status: session.effective_status(),
            uploaded_chunks: uploaded,
            total_chunks: session.total_chunks,
            chunk_size: session.chunk_size,
            total_size: session.total_size,
            expires_at: rfc3339(session.expires_at)?,
        });
    }
    Ok(Json(summaries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_hex_digest_lengths() {
        assert!(validate_hex_digest(&"a".repeat(64), HashAlgorithm::Sha256).is_ok());
        assert!(validate_hex_digest(&"a".repeat(128), HashAlgorithm::Sha512).is_ok());
        assert!(validate_hex_digest(&"a".repeat(63), HashAlgorithm::Sha256).is_err());
        assert!(validate_hex_digest(&"g".repeat(64), HashAlgorithm::Sha256).is_err());
        assert!(validate_hex_digest(&"a".repeat(64), HashAlgorithm::Sha512).is_err());
    }
}
