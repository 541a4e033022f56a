//! Core domain types and shared logic for the stowage upload subsystem.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload session identifiers and lifecycle
//! - Chunk arithmetic and content hashing
//! - Quota ledger vocabulary (fields, actions, reasons)
//! - Vetting verdicts and principal roles
//! - Application configuration

pub mod check;
pub mod config;
pub mod error;
pub mod hash;
pub mod quota;
pub mod session;

pub use check::{CheckStatus, Role};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher, HashAlgorithm};
pub use quota::{QuotaAccount, QuotaAction, QuotaField, QuotaReason, QuotaRecord};
pub use session::{UploadId, UploadSession, UploadState};

/// Default chunk size: 8 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Maximum chunk size: 32 MiB
pub const MAX_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Minimum chunk size: 1 MiB
pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;
