//! Tests for the archive inspector, the malware scan gate, and the
//! promotion pipeline, driven through stub vetting tools.

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::fixtures::{seeded_bytes, zip_like_bytes};
use common::server::TestServer;
use std::path::Path;
use std::sync::Arc;
use stowage_core::check::Role;
use stowage_server::inspect::{ArchiveTool, ToolOutput};
use stowage_server::scan::{MalwareScanner, ScanVerdict};
use uuid::Uuid;

fn tool_success(text: &str) -> ToolOutput {
    ToolOutput {
        success: true,
        stdout: text.to_string(),
        stderr: String::new(),
    }
}

fn tool_failure(text: &str) -> ToolOutput {
    ToolOutput {
        success: false,
        stdout: String::new(),
        stderr: text.to_string(),
    }
}

/// Inspector returning canned list/test output.
struct StubInspector {
    list: ToolOutput,
    test: ToolOutput,
}

impl StubInspector {
    fn clean() -> Arc<Self> {
        Arc::new(Self {
            list: tool_success("Path = upload.zip\n3 files, 1024 bytes"),
            test: tool_success("Everything is Ok"),
        })
    }
}

#[async_trait]
impl ArchiveTool for StubInspector {
    async fn list(&self, _path: &Path) -> std::io::Result<ToolOutput> {
        Ok(self.list.clone())
    }

    async fn test(&self, _path: &Path) -> std::io::Result<ToolOutput> {
        Ok(self.test.clone())
    }
}

/// Inspector that fails the test if either stage runs.
struct PanicInspector;

#[async_trait]
impl ArchiveTool for PanicInspector {
    async fn list(&self, _path: &Path) -> std::io::Result<ToolOutput> {
        panic!("inspector must not run for this upload");
    }

    async fn test(&self, _path: &Path) -> std::io::Result<ToolOutput> {
        panic!("inspector must not run for this upload");
    }
}

/// Scanner returning a fixed verdict.
struct StubScanner {
    verdict: ScanVerdict,
}

impl StubScanner {
    fn clean() -> Arc<Self> {
        Arc::new(Self {
            verdict: ScanVerdict::clean(),
        })
    }

    fn infected(signature: &str) -> Arc<Self> {
        Arc::new(Self {
            verdict: ScanVerdict {
                infected: true,
                signatures: vec![signature.to_string()],
            },
        })
    }
}

#[async_trait]
impl MalwareScanner for StubScanner {
    async fn scan(&self, _path: &Path) -> std::io::Result<ScanVerdict> {
        Ok(self.verdict.clone())
    }
}

fn enable_vetting(config: &mut stowage_core::config::AppConfig) {
    config.vetting.inspect_enabled = true;
    config.vetting.scan_enabled = true;
}

async fn upload_file(server: &TestServer, data: &Bytes) -> Uuid {
    let (_, token) = server.create_user("alice", Role::User).await;
    let completed = server
        .upload_and_complete(&token, "payload.bin", data, 64)
        .await;
    Uuid::parse_str(completed["file_id"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn clean_archive_is_vetted_and_promoted() {
    let server =
        TestServer::with_vetting(StubInspector::clean(), StubScanner::clean(), enable_vetting)
            .await;

    let data = zip_like_bytes(1, 600);
    let file_id = upload_file(&server, &data).await;
    server.wait_for_file(file_id, |f| f.promoted).await;

    let file = server.metadata().get_file(file_id).await.unwrap().unwrap();
    assert_eq!(file.check_status, "ok");
    assert_eq!(file.mime_type.as_deref(), Some("application/zip"));

    let key = file.storage_key.as_deref().unwrap();
    assert_eq!(key, stowage_server::promote::storage_key(file_id));
    assert!(server.state.storage.exists(key).await.unwrap());
    assert!(!Path::new(&file.local_path).exists());

    let history = server.metadata().list_history(file_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].storage_key.as_deref(), Some(key));

    assert_eq!(
        server
            .metadata()
            .suspicious_count(file.owner_id)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn infected_upload_is_quarantined() {
    let server = TestServer::with_vetting(
        StubInspector::clean(),
        StubScanner::infected("Eicar-Test-Signature"),
        enable_vetting,
    )
    .await;

    let data = seeded_bytes(2, 500);
    let file_id = upload_file(&server, &data).await;
    server
        .wait_for_file(file_id, |f| f.check_status == "infected")
        .await;

    let file = server.metadata().get_file(file_id).await.unwrap().unwrap();
    assert!(!file.promoted);
    assert!(file.storage_key.is_none());
    assert!(!Path::new(&file.local_path).exists());

    // A quarantine case is open with the scanner's signature.
    let cases = server.metadata().list_open_scan_cases(10).await.unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].file_id, file_id);
    assert_eq!(cases[0].owner_id, file.owner_id);
    assert_eq!(
        cases[0].signature_list().unwrap(),
        vec!["Eicar-Test-Signature"]
    );

    assert_eq!(
        server
            .metadata()
            .suspicious_count(file.owner_id)
            .await
            .unwrap(),
        1
    );

    // The reservation was returned: rejected uploads cost nothing.
    let account = server
        .metadata()
        .get_account(file.owner_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.used_bytes, 0);
}

#[tokio::test]
async fn encrypted_archive_is_blocked_before_the_scan() {
    let server = TestServer::with_vetting(
        Arc::new(StubInspector {
            list: tool_failure("ERROR: Wrong password : upload.zip"),
            test: tool_success("unreachable"),
        }),
        StubScanner::infected("must-not-run"),
        enable_vetting,
    )
    .await;

    let data = zip_like_bytes(3, 600);
    let file_id = upload_file(&server, &data).await;
    server
        .wait_for_file(file_id, |f| f.check_status == "encrypted")
        .await;

    let file = server.metadata().get_file(file_id).await.unwrap().unwrap();
    assert!(!file.promoted);
    assert!(file.storage_key.is_none());

    // The scan gate never ran: no quarantine case was opened and the
    // reservation stays (the spool copy is still on disk).
    assert!(server
        .metadata()
        .list_open_scan_cases(10)
        .await
        .unwrap()
        .is_empty());
    assert!(Path::new(&file.local_path).exists());
    let account = server
        .metadata()
        .get_account(file.owner_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.used_bytes, 600);
}

#[tokio::test]
async fn truncated_archive_fails_the_integrity_test() {
    let server = TestServer::with_vetting(
        Arc::new(StubInspector {
            list: tool_success("Path = upload.zip\n3 files"),
            test: tool_failure("ERROR: Data Error : inner.txt\nSub items Errors: 1"),
        }),
        StubScanner::clean(),
        enable_vetting,
    )
    .await;

    let data = zip_like_bytes(4, 600);
    let file_id = upload_file(&server, &data).await;
    server
        .wait_for_file(file_id, |f| f.check_status == "broken_or_truncated")
        .await;

    let file = server.metadata().get_file(file_id).await.unwrap().unwrap();
    assert!(!file.promoted);
}

#[tokio::test]
async fn non_archives_skip_the_inspector() {
    let server = TestServer::with_vetting(
        Arc::new(PanicInspector),
        StubScanner::clean(),
        enable_vetting,
    )
    .await;

    // No recognizable magic bytes: the MIME sniff yields nothing and
    // the inspector stays out of the path.
    let data = Bytes::from_static(b"plain text, nothing resembling an archive here at all");
    let file_id = upload_file(&server, &data).await;
    server.wait_for_file(file_id, |f| f.promoted).await;

    let file = server.metadata().get_file(file_id).await.unwrap().unwrap();
    assert_eq!(file.check_status, "ok");
    assert!(file.mime_type.is_none());
}

#[tokio::test]
async fn clean_promotion_resets_the_suspicious_counter() {
    let server = TestServer::with_vetting(
        StubInspector::clean(),
        StubScanner::clean(),
        enable_vetting,
    )
    .await;
    let (user_id, token) = server.create_user("alice", Role::User).await;

    // Seed a prior strike directly.
    server.metadata().increment_suspicious(user_id).await.unwrap();
    assert_eq!(server.metadata().suspicious_count(user_id).await.unwrap(), 1);

    let data = seeded_bytes(6, 300);
    let completed = server
        .upload_and_complete(&token, "clean.bin", &data, 64)
        .await;
    let file_id = Uuid::parse_str(completed["file_id"].as_str().unwrap()).unwrap();
    server.wait_for_file(file_id, |f| f.promoted).await;

    assert_eq!(server.metadata().suspicious_count(user_id).await.unwrap(), 0);
}
