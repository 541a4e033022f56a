//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{FileRepo, QuotaRepo, SessionRepo, UserRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: SessionRepo + QuotaRepo + FileRepo + UserRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; using a single connection avoids
            // persistent "database is locked" failures under test/axum concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use stowage_core::quota::{QuotaAction, QuotaField, QuotaReason};
    use time::OffsetDateTime;
    use uuid::Uuid;

    /// Fetch the account row inside a transaction, erroring when missing.
    async fn fetch_account(
        tx: &mut sqlx::SqliteConnection,
        user_id: Uuid,
    ) -> MetadataResult<QuotaAccountRow> {
        sqlx::query_as::<_, QuotaAccountRow>("SELECT * FROM quota_accounts WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(MetadataError::QuotaNotFound(user_id))
    }

    /// Write the account fields and append the matching ledger record,
    /// all within the caller's transaction.
    #[allow(clippy::too_many_arguments)]
    async fn write_account_and_record(
        tx: &mut sqlx::SqliteConnection,
        user_id: Uuid,
        size_bytes: i64,
        used_bytes: i64,
        is_first_grant: bool,
        field: QuotaField,
        action: QuotaAction,
        amount: u64,
        reason: QuotaReason,
        upload_session_id: Option<Uuid>,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE quota_accounts SET size_bytes = ?, used_bytes = ?, is_first_grant = ?, updated_at = ? WHERE user_id = ?",
        )
        .bind(size_bytes)
        .bind(used_bytes)
        .bind(is_first_grant)
        .bind(now)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO quota_records (
                record_id, user_id, field, action, amount, reason,
                upload_session_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(field.as_str())
        .bind(action.as_str())
        .bind(amount as i64)
        .bind(reason.as_str())
        .bind(upload_session_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        Ok(())
    }

    #[async_trait]
    impl SessionRepo for SqliteStore {
        async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO upload_sessions (
                    upload_id, creator_id, file_name, total_size, chunk_size,
                    total_chunks, hash_algorithm, file_hash, mime_type,
                    spool_path, state, created_at, updated_at, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session.upload_id)
            .bind(session.creator_id)
            .bind(&session.file_name)
            .bind(session.total_size)
            .bind(session.chunk_size)
            .bind(session.total_chunks)
            .bind(&session.hash_algorithm)
            .bind(&session.file_hash)
            .bind(&session.mime_type)
            .bind(&session.spool_path)
            .bind(&session.state)
            .bind(session.created_at)
            .bind(session.updated_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>> {
            let row = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_active_sessions(
            &self,
            creator_id: Uuid,
            now: OffsetDateTime,
        ) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE creator_id = ? AND state = 'uploading' AND expires_at > ? ORDER BY created_at DESC",
            )
            .bind(creator_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn update_state(
            &self,
            upload_id: Uuid,
            state: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query("UPDATE upload_sessions SET state = ?, updated_at = ? WHERE upload_id = ?")
                .bind(state)
                .bind(updated_at)
                .bind(upload_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn complete_session(
            &self,
            upload_id: Uuid,
            mime_type: Option<&str>,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE upload_sessions SET state = 'completed', mime_type = ?, updated_at = ? WHERE upload_id = ?",
            )
            .bind(mime_type)
            .bind(updated_at)
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn record_chunk(
            &self,
            upload_id: Uuid,
            chunk_index: u64,
            received_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            // Replays hit the primary key and are ignored.
            sqlx::query(
                "INSERT OR IGNORE INTO upload_chunks (upload_id, chunk_index, received_at) VALUES (?, ?, ?)",
            )
            .bind(upload_id)
            .bind(chunk_index as i64)
            .bind(received_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn has_chunk(&self, upload_id: Uuid, chunk_index: u64) -> MetadataResult<bool> {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM upload_chunks WHERE upload_id = ? AND chunk_index = ?)",
            )
            .bind(upload_id)
            .bind(chunk_index as i64)
            .fetch_one(&self.pool)
            .await?;
            Ok(exists)
        }

        async fn received_chunks(&self, upload_id: Uuid) -> MetadataResult<Vec<u64>> {
            let rows: Vec<i64> = sqlx::query_scalar(
                "SELECT chunk_index FROM upload_chunks WHERE upload_id = ? ORDER BY chunk_index ASC",
            )
            .bind(upload_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|i| i as u64).collect())
        }

        async fn count_received_chunks(&self, upload_id: Uuid) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM upload_chunks WHERE upload_id = ?")
                    .bind(upload_id)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }

        async fn last_completed_at(
            &self,
            creator_id: Uuid,
        ) -> MetadataResult<Option<OffsetDateTime>> {
            let row: Option<OffsetDateTime> = sqlx::query_scalar(
                "SELECT MAX(updated_at) FROM upload_sessions WHERE creator_id = ? AND state = 'completed'",
            )
            .bind(creator_id)
            .fetch_optional(&self.pool)
            .await?
            .flatten();
            Ok(row)
        }

        async fn last_session_activity(
            &self,
            creator_id: Uuid,
        ) -> MetadataResult<Option<OffsetDateTime>> {
            let row: Option<OffsetDateTime> = sqlx::query_scalar(
                "SELECT MAX(updated_at) FROM upload_sessions WHERE creator_id = ?",
            )
            .bind(creator_id)
            .fetch_optional(&self.pool)
            .await?
            .flatten();
            Ok(row)
        }

        async fn expired_sessions(
            &self,
            now: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<UploadSessionRow>> {
            // Sessions whose reservation was already returned are excluded
            // so the expiry sweep converges instead of reprocessing them.
            let rows = sqlx::query_as::<_, UploadSessionRow>(
                r#"
                SELECT s.* FROM upload_sessions s
                WHERE s.state = 'uploading' AND s.expires_at < ?
                  AND NOT EXISTS (
                    SELECT 1 FROM quota_records r
                    WHERE r.upload_session_id = s.upload_id AND r.action = 'sub'
                  )
                ORDER BY s.expires_at ASC
                LIMIT ?
                "#,
            )
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl QuotaRepo for SqliteStore {
        async fn create_account(&self, user_id: Uuid) -> MetadataResult<()> {
            let now = OffsetDateTime::now_utc();
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO quota_accounts (
                    user_id, size_bytes, used_bytes, is_first_grant, created_at, updated_at
                ) VALUES (?, 0, 0, 1, ?, ?)
                "#,
            )
            .bind(user_id)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::AlreadyExists(format!(
                    "quota account for user {user_id}"
                )));
            }
            Ok(())
        }

        async fn get_account(&self, user_id: Uuid) -> MetadataResult<Option<QuotaAccountRow>> {
            let row = sqlx::query_as::<_, QuotaAccountRow>(
                "SELECT * FROM quota_accounts WHERE user_id = ?",
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn reserve(
            &self,
            user_id: Uuid,
            amount: u64,
            upload_session_id: Uuid,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            let account = fetch_account(&mut tx, user_id).await?;

            let used = account.used_bytes as u64;
            let size = account.size_bytes as u64;
            let new_used = used
                .checked_add(amount)
                .filter(|v| *v <= size)
                .ok_or(MetadataError::QuotaExceeded {
                    requested: amount,
                    headroom: size.saturating_sub(used),
                })?;

            write_account_and_record(
                &mut tx,
                user_id,
                account.size_bytes,
                new_used as i64,
                account.is_first_grant,
                QuotaField::Used,
                QuotaAction::Use,
                amount,
                QuotaReason::UploadReserve,
                Some(upload_session_id),
                OffsetDateTime::now_utc(),
            )
            .await?;

            tx.commit().await?;
            Ok(())
        }

        async fn withdraw(
            &self,
            user_id: Uuid,
            upload_session_id: Uuid,
            reason: QuotaReason,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;

            // The most recent ledger record tagged with this session
            // decides: a 'use' is an outstanding reservation, a 'sub'
            // means it was already returned.
            let latest = sqlx::query_as::<_, QuotaRecordRow>(
                r#"
                SELECT * FROM quota_records
                WHERE user_id = ? AND upload_session_id = ?
                ORDER BY created_at DESC, rowid DESC
                LIMIT 1
                "#,
            )
            .bind(user_id)
            .bind(upload_session_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(latest) = latest else {
                tx.commit().await?;
                return Ok(false);
            };
            if latest.action != QuotaAction::Use.as_str() {
                tx.commit().await?;
                return Ok(false);
            }

            let account = fetch_account(&mut tx, user_id).await?;
            let amount = latest.amount as u64;
            let used = account.used_bytes as u64;
            if amount > used {
                return Err(MetadataError::InvariantViolation(format!(
                    "withdraw of {amount} exceeds used {used} for user {user_id}"
                )));
            }

            write_account_and_record(
                &mut tx,
                user_id,
                account.size_bytes,
                (used - amount) as i64,
                account.is_first_grant,
                QuotaField::Used,
                QuotaAction::Sub,
                amount,
                reason,
                Some(upload_session_id),
                OffsetDateTime::now_utc(),
            )
            .await?;

            tx.commit().await?;
            Ok(true)
        }

        async fn adjust_used(
            &self,
            user_id: Uuid,
            action: QuotaAction,
            amount: u64,
            reason: QuotaReason,
            upload_session_id: Option<Uuid>,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            let account = fetch_account(&mut tx, user_id).await?;

            let used = account.used_bytes as u64;
            let size = account.size_bytes as u64;
            let new_used = match action {
                QuotaAction::Add | QuotaAction::Use => used
                    .checked_add(amount)
                    .filter(|v| *v <= size)
                    .ok_or(MetadataError::QuotaExceeded {
                        requested: amount,
                        headroom: size.saturating_sub(used),
                    })?,
                QuotaAction::Sub => {
                    used.checked_sub(amount)
                        .ok_or(MetadataError::UsedCannotBeNegative { amount, used })?
                }
            };

            write_account_and_record(
                &mut tx,
                user_id,
                account.size_bytes,
                new_used as i64,
                account.is_first_grant,
                QuotaField::Used,
                action,
                amount,
                reason,
                upload_session_id,
                OffsetDateTime::now_utc(),
            )
            .await?;

            tx.commit().await?;
            Ok(())
        }

        async fn adjust_size(
            &self,
            user_id: Uuid,
            action: QuotaAction,
            amount: u64,
            reason: QuotaReason,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            let account = fetch_account(&mut tx, user_id).await?;

            let size = account.size_bytes as u64;
            let used = account.used_bytes as u64;
            let new_size = match action {
                QuotaAction::Add => {
                    size.checked_add(amount).ok_or_else(|| {
                        MetadataError::InvariantViolation(format!(
                            "size overflow for user {user_id}"
                        ))
                    })?
                }
                QuotaAction::Sub => {
                    let shrunk = size.checked_sub(amount).ok_or_else(|| {
                        MetadataError::InvariantViolation(format!(
                            "size reduction of {amount} exceeds size {size} for user {user_id}"
                        ))
                    })?;
                    if shrunk < used {
                        return Err(MetadataError::InvariantViolation(format!(
                            "size reduction would leave size {shrunk} below used {used} for user {user_id}"
                        )));
                    }
                    shrunk
                }
                QuotaAction::Use => {
                    return Err(MetadataError::InvariantViolation(
                        "'use' is not a valid direction for the size field".to_string(),
                    ));
                }
            };

            // The initial grant retires the account's first-grant flag.
            let is_first_grant =
                account.is_first_grant && reason != QuotaReason::InitialGrant;

            write_account_and_record(
                &mut tx,
                user_id,
                new_size as i64,
                account.used_bytes,
                is_first_grant,
                QuotaField::Size,
                action,
                amount,
                reason,
                None,
                OffsetDateTime::now_utc(),
            )
            .await?;

            tx.commit().await?;
            Ok(())
        }

        async fn list_records(
            &self,
            user_id: Uuid,
            limit: u32,
        ) -> MetadataResult<Vec<QuotaRecordRow>> {
            let rows = sqlx::query_as::<_, QuotaRecordRow>(
                "SELECT * FROM quota_records WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
            )
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn accounts_over_size(
            &self,
            size_bytes: u64,
            limit: u32,
        ) -> MetadataResult<Vec<QuotaAccountRow>> {
            let rows = sqlx::query_as::<_, QuotaAccountRow>(
                "SELECT * FROM quota_accounts WHERE size_bytes > ? ORDER BY updated_at ASC LIMIT ?",
            )
            .bind(size_bytes as i64)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn create_file(&self, file: &FileRecordRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO file_records (
                    file_id, upload_id, owner_id, file_name, size_bytes,
                    file_hash, hash_algorithm, mime_type, local_path,
                    check_status, promoted, storage_key, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(file.file_id)
            .bind(file.upload_id)
            .bind(file.owner_id)
            .bind(&file.file_name)
            .bind(file.size_bytes)
            .bind(&file.file_hash)
            .bind(&file.hash_algorithm)
            .bind(&file.mime_type)
            .bind(&file.local_path)
            .bind(&file.check_status)
            .bind(file.promoted)
            .bind(&file.storage_key)
            .bind(file.created_at)
            .bind(file.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRecordRow>> {
            let row =
                sqlx::query_as::<_, FileRecordRow>("SELECT * FROM file_records WHERE file_id = ?")
                    .bind(file_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn get_file_by_upload(
            &self,
            upload_id: Uuid,
        ) -> MetadataResult<Option<FileRecordRow>> {
            let row = sqlx::query_as::<_, FileRecordRow>(
                "SELECT * FROM file_records WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn update_check_status(
            &self,
            file_id: Uuid,
            check_status: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE file_records SET check_status = ?, updated_at = ? WHERE file_id = ?",
            )
            .bind(check_status)
            .bind(updated_at)
            .bind(file_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn mark_promoted(
            &self,
            file_id: Uuid,
            storage_key: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE file_records SET promoted = 1, storage_key = ?, updated_at = ? WHERE file_id = ?",
            )
            .bind(storage_key)
            .bind(updated_at)
            .bind(file_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn fill_history(
            &self,
            file_id: Uuid,
            storage_key: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            let open_id: Option<Uuid> = sqlx::query_scalar(
                "SELECT history_id FROM file_history WHERE file_id = ? AND storage_key IS NULL ORDER BY opened_at DESC, rowid DESC LIMIT 1",
            )
            .bind(file_id)
            .fetch_optional(&mut *tx)
            .await?;

            match open_id {
                Some(history_id) => {
                    sqlx::query(
                        "UPDATE file_history SET storage_key = ?, updated_at = ? WHERE history_id = ?",
                    )
                    .bind(storage_key)
                    .bind(updated_at)
                    .bind(history_id)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query(
                        "INSERT INTO file_history (history_id, file_id, storage_key, opened_at, updated_at) VALUES (?, ?, ?, ?, ?)",
                    )
                    .bind(Uuid::new_v4())
                    .bind(file_id)
                    .bind(storage_key)
                    .bind(updated_at)
                    .bind(updated_at)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            tx.commit().await?;
            Ok(())
        }

        async fn list_history(&self, file_id: Uuid) -> MetadataResult<Vec<FileHistoryRow>> {
            let rows = sqlx::query_as::<_, FileHistoryRow>(
                "SELECT * FROM file_history WHERE file_id = ? ORDER BY opened_at DESC, rowid DESC",
            )
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_pending_files(&self, limit: u32) -> MetadataResult<Vec<FileRecordRow>> {
            let rows = sqlx::query_as::<_, FileRecordRow>(
                "SELECT * FROM file_records WHERE promoted = 0 AND check_status IN ('pending', 'ok') ORDER BY created_at ASC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn create_scan_case(&self, case: &ScanCaseRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO scan_cases (case_id, file_id, owner_id, signatures, state, opened_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(case.case_id)
            .bind(case.file_id)
            .bind(case.owner_id)
            .bind(&case.signatures)
            .bind(&case.state)
            .bind(case.opened_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn list_open_scan_cases(&self, limit: u32) -> MetadataResult<Vec<ScanCaseRow>> {
            let rows = sqlx::query_as::<_, ScanCaseRow>(
                "SELECT * FROM scan_cases WHERE state = 'open' ORDER BY opened_at ASC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn increment_suspicious(&self, user_id: Uuid) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO user_flags (user_id, suspicious_upload_count)
                VALUES (?, 1)
                ON CONFLICT(user_id)
                DO UPDATE SET suspicious_upload_count = suspicious_upload_count + 1
                RETURNING suspicious_upload_count
                "#,
            )
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(count as u64)
        }

        async fn reset_suspicious(&self, user_id: Uuid) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO user_flags (user_id, suspicious_upload_count)
                VALUES (?, 0)
                ON CONFLICT(user_id) DO UPDATE SET suspicious_upload_count = 0
                "#,
            )
            .bind(user_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn suspicious_count(&self, user_id: Uuid) -> MetadataResult<u64> {
            let count: Option<i64> = sqlx::query_scalar(
                "SELECT suspicious_upload_count FROM user_flags WHERE user_id = ?",
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(count.unwrap_or(0) as u64)
        }
    }

    #[async_trait]
    impl UserRepo for SqliteStore {
        async fn create_user(&self, user: &UserRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO users (user_id, user_name, role, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(user.user_id)
            .bind(&user.user_name)
            .bind(&user.role)
            .bind(user.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    MetadataError::AlreadyExists(format!("user {}", user.user_name))
                }
                other => MetadataError::Database(other),
            })?;
            Ok(())
        }

        async fn get_user(&self, user_id: Uuid) -> MetadataResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_user_by_name(&self, user_name: &str) -> MetadataResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_name = ?")
                .bind(user_name)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tokens (token_id, user_id, token_hash, description, created_at, revoked_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(token.token_id)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(&token.description)
            .bind(token.created_at)
            .bind(token.revoked_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn revoke_token(
            &self,
            token_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET revoked_at = ? WHERE token_id = ?")
                .bind(revoked_at)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn bootstrap_token_id(&self) -> MetadataResult<Option<Uuid>> {
            let id: Option<String> =
                sqlx::query_scalar("SELECT bootstrap_token_id FROM bootstrap_state WHERE id = 1")
                    .fetch_one(&self.pool)
                    .await?;
            match id {
                Some(s) => Ok(Some(Uuid::parse_str(&s).map_err(|e| {
                    MetadataError::CorruptRow(format!("bootstrap token id: {e}"))
                })?)),
                None => Ok(None),
            }
        }

        async fn set_bootstrap_token_id(&self, token_id: Uuid) -> MetadataResult<()> {
            sqlx::query("UPDATE bootstrap_state SET bootstrap_token_id = ? WHERE id = 1")
                .bind(token_id.to_string())
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Users
CREATE TABLE IF NOT EXISTS users (
    user_id BLOB PRIMARY KEY,
    user_name TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL DEFAULT 'user',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_users_name ON users(user_name);

-- Tokens. Only the SHA-256 hash of a token is ever stored.
CREATE TABLE IF NOT EXISTS tokens (
    token_id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES users(user_id),
    token_hash TEXT NOT NULL UNIQUE,
    description TEXT,
    created_at TEXT NOT NULL,
    revoked_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_tokens_hash ON tokens(token_hash);

-- Bootstrap marker
CREATE TABLE IF NOT EXISTS bootstrap_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    bootstrap_token_id TEXT
);
INSERT OR IGNORE INTO bootstrap_state (id, bootstrap_token_id) VALUES (1, NULL);

-- Upload sessions. Rows are never deleted: terminal sessions remain as
-- an audit trail. Expiry is derived from expires_at, never stored.
CREATE TABLE IF NOT EXISTS upload_sessions (
    upload_id BLOB PRIMARY KEY,
    creator_id BLOB NOT NULL REFERENCES users(user_id),
    file_name TEXT NOT NULL,
    total_size INTEGER NOT NULL,
    chunk_size INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    hash_algorithm TEXT NOT NULL DEFAULT 'sha256',
    file_hash TEXT,
    mime_type TEXT,
    spool_path TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'uploading',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_state ON upload_sessions(state, expires_at);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_creator ON upload_sessions(creator_id, state);

-- Received chunk indices per session
CREATE TABLE IF NOT EXISTS upload_chunks (
    upload_id BLOB NOT NULL,
    chunk_index INTEGER NOT NULL,
    received_at TEXT NOT NULL,
    PRIMARY KEY (upload_id, chunk_index),
    FOREIGN KEY (upload_id) REFERENCES upload_sessions(upload_id) ON DELETE CASCADE
);

-- Quota accounts. Invariant: 0 <= used_bytes <= size_bytes.
CREATE TABLE IF NOT EXISTS quota_accounts (
    user_id BLOB PRIMARY KEY REFERENCES users(user_id),
    size_bytes INTEGER NOT NULL DEFAULT 0,
    used_bytes INTEGER NOT NULL DEFAULT 0,
    is_first_grant INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Append-only quota ledger: one record per committed account mutation.
CREATE TABLE IF NOT EXISTS quota_records (
    record_id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES users(user_id),
    field TEXT NOT NULL,
    action TEXT NOT NULL,
    amount INTEGER NOT NULL,
    reason TEXT NOT NULL,
    upload_session_id BLOB,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_quota_records_user ON quota_records(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_quota_records_session ON quota_records(upload_session_id);

-- File records for verified uploads
CREATE TABLE IF NOT EXISTS file_records (
    file_id BLOB PRIMARY KEY,
    upload_id BLOB NOT NULL UNIQUE REFERENCES upload_sessions(upload_id),
    owner_id BLOB NOT NULL REFERENCES users(user_id),
    file_name TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    file_hash TEXT NOT NULL,
    hash_algorithm TEXT NOT NULL,
    mime_type TEXT,
    local_path TEXT NOT NULL,
    check_status TEXT NOT NULL DEFAULT 'pending',
    promoted INTEGER NOT NULL DEFAULT 0,
    storage_key TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_file_records_owner ON file_records(owner_id);
CREATE INDEX IF NOT EXISTS idx_file_records_pending ON file_records(check_status, promoted);

-- File history. A NULL storage_key marks an open entry; promotion
-- fills the latest open entry.
CREATE TABLE IF NOT EXISTS file_history (
    history_id BLOB PRIMARY KEY,
    file_id BLOB NOT NULL REFERENCES file_records(file_id),
    storage_key TEXT,
    opened_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_file_history_file ON file_history(file_id);

-- Quarantine cases for infected files
CREATE TABLE IF NOT EXISTS scan_cases (
    case_id BLOB PRIMARY KEY,
    file_id BLOB NOT NULL REFERENCES file_records(file_id),
    owner_id BLOB NOT NULL REFERENCES users(user_id),
    signatures TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'open',
    opened_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scan_cases_state ON scan_cases(state);

-- Per-user moderation counters
CREATE TABLE IF NOT EXISTS user_flags (
    user_id BLOB PRIMARY KEY REFERENCES users(user_id),
    suspicious_upload_count INTEGER NOT NULL DEFAULT 0
);
"#;
