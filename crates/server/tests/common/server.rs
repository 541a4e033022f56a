//! Server test utilities.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use std::sync::Arc;
use stowage_core::check::Role;
use stowage_core::config::{AppConfig, MetadataConfig, StorageConfig};
use stowage_metadata::models::{TokenRow, UserRow};
use stowage_metadata::{MetadataStore, SqliteStore};
use stowage_server::auth::hash_token;
use stowage_server::bootstrap;
use stowage_server::hasher::HashWorker;
use stowage_server::inspect::ArchiveTool;
use stowage_server::jobs::{self, JobQueue};
use stowage_server::notify::LogNotifier;
use stowage_server::scan::MalwareScanner;
use stowage_server::{create_router, quota_policy, AppState};
use stowage_storage::{FilesystemBackend, ObjectStore};
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

/// Raw token matching `AdminConfig::for_testing()`.
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with default test configuration.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, None).await
    }

    /// Create a test server with mock vetting tools injected.
    pub async fn with_vetting<F>(
        inspector: Arc<dyn ArchiveTool>,
        scanner: Arc<dyn MalwareScanner>,
        modifier: F,
    ) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, Some((inspector, scanner))).await
    }

    async fn build<F>(
        modifier: F,
        vetting: Option<(Arc<dyn ArchiveTool>, Arc<dyn MalwareScanner>)>,
    ) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("storage");
        let db_path = temp_dir.path().join("metadata.db");

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem {
            path: storage_path.clone(),
        };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path.clone(),
        };
        config.upload.spool_dir = temp_dir.path().join("spool");
        modifier(&mut config);

        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create metadata store"),
        );

        bootstrap::ensure_admin(metadata.as_ref(), &config.admin, &config.quota)
            .await
            .expect("Failed to bootstrap admin");

        let hasher = Arc::new(HashWorker::spawn());
        let (queue, job_rx) = JobQueue::channel();

        let state = match vetting {
            Some((inspector, scanner)) => AppState::with_vetting(
                config,
                storage,
                metadata,
                hasher,
                queue,
                inspector,
                scanner,
                Arc::new(LogNotifier),
            ),
            None => AppState::new(config, storage, metadata, hasher, queue),
        };
        state
            .spool
            .init()
            .await
            .expect("Failed to create spool directory");
        jobs::spawn_runner(state.clone(), job_rx);

        let router = create_router(state.clone());
        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Create a user with a quota account, an initial grant, and a
    /// token. Returns the user ID and the raw token.
    pub async fn create_user(&self, name: &str, role: Role) -> (Uuid, String) {
        let now = OffsetDateTime::now_utc();
        let user = UserRow {
            user_id: Uuid::new_v4(),
            user_name: name.to_string(),
            role: role.as_str().to_string(),
            created_at: now,
        };
        self.state
            .metadata
            .create_user(&user)
            .await
            .expect("Failed to create user");
        quota_policy::ensure_account_with_grant(
            self.state.metadata.as_ref(),
            user.user_id,
            &self.state.config.quota,
        )
        .await
        .expect("Failed to create quota account");

        let raw = format!("test-token-{}", Uuid::new_v4().simple());
        let token = TokenRow {
            token_id: Uuid::new_v4(),
            user_id: user.user_id,
            token_hash: hash_token(&raw),
            description: None,
            created_at: now,
            revoked_at: None,
        };
        self.state
            .metadata
            .create_token(&token)
            .await
            .expect("Failed to create token");
        (user.user_id, raw)
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("request failed");
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response was not JSON")
        };
        (status, value)
    }

    /// Send a JSON request and parse the JSON response (if any).
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        token: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("failed to build request");
        self.send(req).await
    }

    /// Send a bodyless request.
    pub async fn bare(
        &self,
        method: Method,
        uri: &str,
        token: &str,
    ) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .expect("failed to build request");
        self.send(req).await
    }

    /// Upload one chunk, declaring the digest of the body itself.
    pub async fn put_chunk(
        &self,
        token: &str,
        upload_id: &str,
        index: u64,
        body: Bytes,
    ) -> (StatusCode, serde_json::Value) {
        let hash = super::fixtures::sha256_hex(&body);
        self.put_chunk_with_hash(token, upload_id, index, body, &hash)
            .await
    }

    /// Upload one chunk with an explicit declared hash.
    pub async fn put_chunk_with_hash(
        &self,
        token: &str,
        upload_id: &str,
        index: u64,
        body: Bytes,
        declared: &str,
    ) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(Method::PUT)
            .uri(format!("/v1/uploads/{upload_id}/chunks/{index}"))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_LENGTH, body.len())
            .header("x-chunk-hash", declared)
            .body(Body::from(body))
            .expect("failed to build request");
        self.send(req).await
    }

    /// Create an upload session, asserting success. Returns the
    /// creation response JSON.
    pub async fn create_upload(
        &self,
        token: &str,
        body: serde_json::Value,
    ) -> serde_json::Value {
        let (status, json) = self.json(Method::POST, "/v1/uploads", token, body).await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {json}");
        json
    }

    /// Upload all chunks of `data` and complete the session. Returns
    /// the completion response JSON.
    pub async fn upload_and_complete(
        &self,
        token: &str,
        file_name: &str,
        data: &Bytes,
        chunk_size: u64,
    ) -> serde_json::Value {
        let created = self
            .create_upload(
                token,
                serde_json::json!({
                    "file_name": file_name,
                    "total_size": data.len(),
                    "chunk_size": chunk_size,
                    "file_hash": super::fixtures::sha256_hex(data),
                }),
            )
            .await;
        let upload_id = created["upload_session_id"].as_str().unwrap().to_string();

        for (index, chunk) in super::fixtures::split_into_chunks(data, chunk_size as usize)
            .into_iter()
            .enumerate()
        {
            let (status, json) = self
                .put_chunk(token, &upload_id, index as u64, chunk)
                .await;
            assert_eq!(status, StatusCode::OK, "chunk {index} failed: {json}");
        }

        let (status, json) = self
            .json(
                Method::POST,
                &format!("/v1/uploads/{upload_id}/complete"),
                token,
                serde_json::json!({}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "complete failed: {json}");
        json
    }

    /// Poll until the file record satisfies the predicate or the
    /// deadline passes.
    pub async fn wait_for_file<F>(&self, file_id: Uuid, predicate: F)
    where
        F: Fn(&stowage_metadata::models::FileRecordRow) -> bool,
    {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let file = self
                .state
                .metadata
                .get_file(file_id)
                .await
                .expect("metadata failure")
                .expect("file record missing");
            if predicate(&file) {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "file {file_id} did not reach the expected state: \
                     check_status={} promoted={}",
                    file.check_status, file.promoted
                );
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}
