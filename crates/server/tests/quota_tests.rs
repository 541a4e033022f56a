//! Tests for quota accounts, admin adjustments, and the ledger.

mod common;

use axum::http::{Method, StatusCode};
use common::fixtures::seeded_bytes;
use common::server::{TestServer, ADMIN_TOKEN};
use serde_json::json;
use stowage_core::check::Role;
use stowage_core::quota::QuotaReason;
use uuid::Uuid;

#[tokio::test]
async fn quota_reflects_the_initial_grant() {
    let server = TestServer::new().await;
    let (user_id, token) = server.create_user("alice", Role::User).await;

    let (status, body) = server.bare(Method::GET, "/v1/quota", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], user_id.to_string());
    assert_eq!(body["size"], 4096);
    assert_eq!(body["used"], 0);
    assert_eq!(body["is_first_grant"], false);
}

#[tokio::test]
async fn admin_adjusts_size_and_used() {
    let server = TestServer::new().await;
    let (user_id, _) = server.create_user("alice", Role::User).await;

    let (status, body) = server
        .json(
            Method::POST,
            &format!("/v1/admin/quota/{user_id}/size"),
            ADMIN_TOKEN,
            json!({ "action": "add", "amount": 1024 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "size add failed: {body}");
    assert_eq!(body["size"], 5120);

    let (status, body) = server
        .json(
            Method::POST,
            &format!("/v1/admin/quota/{user_id}/used"),
            ADMIN_TOKEN,
            json!({ "action": "add", "amount": 100 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "used add failed: {body}");
    assert_eq!(body["used"], 100);

    let (status, body) = server
        .json(
            Method::POST,
            &format!("/v1/admin/quota/{user_id}/used"),
            ADMIN_TOKEN,
            json!({ "action": "sub", "amount": 40 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "used sub failed: {body}");
    assert_eq!(body["used"], 60);
}

#[tokio::test]
async fn used_cannot_be_credited_below_zero() {
    let server = TestServer::new().await;
    let (user_id, _) = server.create_user("alice", Role::User).await;

    let (status, body) = server
        .json(
            Method::POST,
            &format!("/v1/admin/quota/{user_id}/used"),
            ADMIN_TOKEN,
            json!({ "action": "sub", "amount": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "used_cannot_be_negative");
}

#[tokio::test]
async fn used_cannot_exceed_the_ceiling() {
    let server = TestServer::new().await;
    let (user_id, _) = server.create_user("alice", Role::User).await;

    let (status, body) = server
        .json(
            Method::POST,
            &format!("/v1/admin/quota/{user_id}/used"),
            ADMIN_TOKEN,
            json!({ "action": "add", "amount": 5000 }),
        )
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "quota_exceeded");
}

#[tokio::test]
async fn adjustments_require_admin_role() {
    let server = TestServer::new().await;
    let (user_id, _) = server.create_user("alice", Role::User).await;
    let (_, mod_token) = server.create_user("bob", Role::Moderator).await;

    let (status, body) = server
        .json(
            Method::POST,
            &format!("/v1/admin/quota/{user_id}/size"),
            &mod_token,
            json!({ "action": "add", "amount": 1024 }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");
}

#[tokio::test]
async fn unknown_vocabulary_is_rejected() {
    let server = TestServer::new().await;
    let (user_id, _) = server.create_user("alice", Role::User).await;

    let (status, body) = server
        .json(
            Method::POST,
            &format!("/v1/admin/quota/{user_id}/used"),
            ADMIN_TOKEN,
            json!({ "action": "mul", "amount": 10 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let (status, _) = server
        .json(
            Method::POST,
            &format!("/v1/admin/quota/{user_id}/used"),
            ADMIN_TOKEN,
            json!({ "action": "add", "amount": 10, "reason": "bonus" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ledger_records_every_mutation() {
    let server = TestServer::new().await;
    let (user_id, token) = server.create_user("alice", Role::User).await;

    // Reserve and return capacity through a create/abort pair.
    let created = server
        .create_upload(
            &token,
            json!({ "file_name": "a.bin", "total_size": 100, "chunk_size": 50 }),
        )
        .await;
    let upload_id = created["upload_session_id"].as_str().unwrap().to_string();
    let (status, _) = server
        .bare(
            Method::POST,
            &format!("/v1/uploads/{upload_id}/abort"),
            &token,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = server
        .bare(
            Method::GET,
            &format!("/v1/admin/quota/{user_id}/records"),
            ADMIN_TOKEN,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 3);

    // Newest first: withdraw, reserve, initial grant.
    assert_eq!(records[0]["field"], "used");
    assert_eq!(records[0]["action"], "sub");
    assert_eq!(records[0]["reason"], "upload_withdraw");
    assert_eq!(records[0]["upload_session_id"], upload_id);

    assert_eq!(records[1]["field"], "used");
    assert_eq!(records[1]["action"], "use");
    assert_eq!(records[1]["amount"], 100);
    assert_eq!(records[1]["reason"], "upload_reserve");
    assert_eq!(records[1]["upload_session_id"], upload_id);

    assert_eq!(records[2]["field"], "size");
    assert_eq!(records[2]["action"], "add");
    assert_eq!(records[2]["amount"], 4096);
    assert_eq!(records[2]["reason"], "initial_grant");
    assert_eq!(records[2]["upload_session_id"], serde_json::Value::Null);
}

#[tokio::test]
async fn records_honor_the_limit_parameter() {
    let server = TestServer::new().await;
    let (user_id, _) = server.create_user("alice", Role::User).await;

    for _ in 0..3 {
        let (status, _) = server
            .json(
                Method::POST,
                &format!("/v1/admin/quota/{user_id}/size"),
                ADMIN_TOKEN,
                json!({ "action": "add", "amount": 10 }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = server
        .bare(
            Method::GET,
            &format!("/v1/admin/quota/{user_id}/records?limit=2"),
            ADMIN_TOKEN,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn withdraw_is_single_shot_per_session() {
    let server = TestServer::new().await;
    let (user_id, _) = server.create_user("alice", Role::User).await;
    let session_id = Uuid::new_v4();

    server
        .metadata()
        .reserve(user_id, 100, session_id)
        .await
        .unwrap();

    let withdrawn = server
        .metadata()
        .withdraw(user_id, session_id, QuotaReason::UploadWithdraw)
        .await
        .unwrap();
    assert!(withdrawn);

    // A second withdraw for the same session finds nothing to return.
    let withdrawn = server
        .metadata()
        .withdraw(user_id, session_id, QuotaReason::UploadWithdraw)
        .await
        .unwrap();
    assert!(!withdrawn);

    let account = server
        .metadata()
        .get_account(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.used_bytes, 0);
}

#[tokio::test]
async fn interleaved_reservations_withdraw_back_to_baseline() {
    let server = TestServer::new().await;
    let (user_id, _) = server.create_user("alice", Role::User).await;
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    server
        .metadata()
        .reserve(user_id, 1000, first)
        .await
        .unwrap();

    // A second session and an admin adjustment land between the first
    // session's reserve and its withdraw.
    server
        .metadata()
        .reserve(user_id, 500, second)
        .await
        .unwrap();
    let (status, body) = server
        .json(
            Method::POST,
            &format!("/v1/admin/quota/{user_id}/used"),
            ADMIN_TOKEN,
            json!({ "action": "add", "amount": 100 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "used add failed: {body}");
    assert_eq!(body["used"], 1600);

    // Each withdraw returns exactly its own reservation.
    assert!(server
        .metadata()
        .withdraw(user_id, first, QuotaReason::UploadWithdraw)
        .await
        .unwrap());
    assert!(server
        .metadata()
        .withdraw(user_id, second, QuotaReason::UploadWithdraw)
        .await
        .unwrap());

    let account = server
        .metadata()
        .get_account(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.used_bytes, 100);

    // Repeats after the interleaving stay no-ops.
    assert!(!server
        .metadata()
        .withdraw(user_id, first, QuotaReason::UploadWithdraw)
        .await
        .unwrap());
    let account = server
        .metadata()
        .get_account(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.used_bytes, 100);
}

#[tokio::test]
async fn admin_provisions_users_with_grant_and_token() {
    let server = TestServer::new().await;

    let (status, body) = server
        .json(
            Method::POST,
            "/v1/admin/users",
            ADMIN_TOKEN,
            json!({ "user_name": "carol", "role": "moderator" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create user failed: {body}");
    assert_eq!(body["user_name"], "carol");
    assert_eq!(body["role"], "moderator");
    let token = body["token"].as_str().unwrap().to_string();
    assert!(token.starts_with("stw_"));

    // The returned token authenticates and the grant is in place.
    let (status, who) = server.bare(Method::GET, "/v1/auth/whoami", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(who["user_name"], "carol");
    let (status, quota) = server.bare(Method::GET, "/v1/quota", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quota["size"], 4096);

    // User names are unique.
    let (status, body) = server
        .json(
            Method::POST,
            "/v1/admin/users",
            ADMIN_TOKEN,
            json!({ "user_name": "carol" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn user_creation_requires_admin() {
    let server = TestServer::new().await;
    let (_, mod_token) = server.create_user("bob", Role::Moderator).await;

    let (status, body) = server
        .json(
            Method::POST,
            "/v1/admin/users",
            &mod_token,
            json!({ "user_name": "eve" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");
}

#[tokio::test]
async fn active_accounts_get_topped_up_on_demand() {
    let server = TestServer::with_config(|config| {
        config.quota.topup_headroom_fraction = 0.5;
    })
    .await;
    let (user_id, token) = server.create_user("alice", Role::User).await;

    // A completed upload consumes most of the grant and counts as
    // recent activity: 3000 of 4096 used leaves headroom below the 50%
    // threshold.
    let data = seeded_bytes(41, 3000);
    server.upload_and_complete(&token, "big.bin", &data, 64).await;

    // The next session creation tops the ceiling up one step.
    server
        .create_upload(
            &token,
            json!({ "file_name": "next.bin", "total_size": 500, "chunk_size": 64 }),
        )
        .await;

    let account = server
        .metadata()
        .get_account(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.size_bytes, 4096 + 2048);
    assert_eq!(account.used_bytes, 3500);
}

#[tokio::test]
async fn topup_never_exceeds_the_cap() {
    let server = TestServer::with_config(|config| {
        config.quota.topup_headroom_fraction = 0.5;
        config.quota.cap_bytes = 5000;
    })
    .await;
    let (user_id, token) = server.create_user("alice", Role::User).await;

    let data = seeded_bytes(43, 3000);
    server.upload_and_complete(&token, "big.bin", &data, 64).await;
    server
        .create_upload(
            &token,
            json!({ "file_name": "next.bin", "total_size": 500, "chunk_size": 64 }),
        )
        .await;

    // Only 904 bytes of headroom under the cap: a partial step.
    let account = server
        .metadata()
        .get_account(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.size_bytes, 5000);
}

#[tokio::test]
async fn idle_reduce_sweep_shrinks_oversized_accounts() {
    let server = TestServer::with_config(|config| {
        config.quota.reduce_after_days = 0;
    })
    .await;
    let (user_id, _) = server.create_user("alice", Role::User).await;

    // Grow the account above the base grant.
    let (status, _) = server
        .json(
            Method::POST,
            &format!("/v1/admin/quota/{user_id}/size"),
            ADMIN_TOKEN,
            json!({ "action": "add", "amount": 4096 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // With a zero-day idle window every account with no sessions
    // qualifies immediately.
    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    let reduced = stowage_server::quota_policy::run_reduce_sweep(
        server.metadata().as_ref(),
        &server.state.config.quota,
    )
    .await
    .unwrap();
    assert!(reduced >= 1);

    let account = server
        .metadata()
        .get_account(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.size_bytes, 4096 + 4096 - 2048);
}
