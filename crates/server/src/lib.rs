//! HTTP API server for the stowage upload service.
//!
//! This crate provides the HTTP control plane:
//! - Resumable upload session management with chunk-level verification
//! - Quota accounts backed by an append-only ledger
//! - Archive inspection and malware scanning before promotion
//! - Promotion of vetted files into durable object storage
//! - Admin endpoints (users, quota adjustments)

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod hasher;
pub mod inspect;
pub mod jobs;
pub mod metrics;
pub mod notify;
pub mod promote;
pub mod quota_policy;
pub mod routes;
pub mod scan;
pub mod spool;
pub mod state;
pub mod tasks;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
