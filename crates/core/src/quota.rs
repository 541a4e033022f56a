//! Quota ledger vocabulary and account types.
//!
//! Every committed mutation of a quota account appends exactly one
//! [`QuotaRecord`] describing which field changed, in which direction,
//! and why. The vocabulary is closed: unknown strings are rejected at
//! the boundary instead of being stored.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Which account field a ledger record touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaField {
    /// The capacity ceiling.
    Size,
    /// The consumed amount.
    Used,
}

impl QuotaField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Used => "used",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "size" => Ok(Self::Size),
            "used" => Ok(Self::Used),
            other => Err(crate::Error::UnknownVariant {
                kind: "quota field",
                value: other.to_string(),
            }),
        }
    }
}

/// Direction of a ledger mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaAction {
    /// Increase the field.
    Add,
    /// Decrease the field (for `used`, a credit back).
    Sub,
    /// Consume capacity: increase `used` against the ceiling, tagged as
    /// a session reservation.
    Use,
}

impl QuotaAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Use => "use",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "add" => Ok(Self::Add),
            "sub" => Ok(Self::Sub),
            "use" => Ok(Self::Use),
            other => Err(crate::Error::UnknownVariant {
                kind: "quota action",
                value: other.to_string(),
            }),
        }
    }
}

/// Why a ledger mutation happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaReason {
    /// The account's first capacity grant.
    InitialGrant,
    /// Manual adjustment by an administrator.
    AdminGrant,
    /// Manual reduction by an administrator.
    Penalty,
    /// Automatic capacity increase for active accounts.
    DynamicTopup,
    /// Automatic capacity decrease for idle accounts.
    DynamicReduce,
    /// Capacity consumed by an upload session reservation.
    UploadReserve,
    /// Reservation returned after abort or expiry.
    UploadWithdraw,
    /// Reservation returned after a malware verdict.
    ScanRejected,
}

impl QuotaReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialGrant => "initial_grant",
            Self::AdminGrant => "admin_grant",
            Self::Penalty => "penalty",
            Self::DynamicTopup => "dynamic_topup",
            Self::DynamicReduce => "dynamic_reduce",
            Self::UploadReserve => "upload_reserve",
            Self::UploadWithdraw => "upload_withdraw",
            Self::ScanRejected => "scan_rejected",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "initial_grant" => Ok(Self::InitialGrant),
            "admin_grant" => Ok(Self::AdminGrant),
            "penalty" => Ok(Self::Penalty),
            "dynamic_topup" => Ok(Self::DynamicTopup),
            "dynamic_reduce" => Ok(Self::DynamicReduce),
            "upload_reserve" => Ok(Self::UploadReserve),
            "upload_withdraw" => Ok(Self::UploadWithdraw),
            "scan_rejected" => Ok(Self::ScanRejected),
            other => Err(crate::Error::UnknownVariant {
                kind: "quota reason",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for QuotaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for QuotaAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for QuotaReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's quota account.
///
/// Invariant: `0 <= used <= size`, checked inside the same transaction
/// as every mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaAccount {
    pub user_id: Uuid,
    /// Capacity ceiling in bytes.
    pub size: u64,
    /// Bytes currently reserved or consumed.
    pub used: u64,
    /// Whether the initial grant is still pending.
    pub is_first_grant: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl QuotaAccount {
    /// Remaining capacity.
    pub fn headroom(&self) -> u64 {
        self.size.saturating_sub(self.used)
    }

    /// Whether reserving `amount` more bytes would fit.
    pub fn can_reserve(&self, amount: u64) -> bool {
        self.used.checked_add(amount).is_some_and(|v| v <= self.size)
    }
}

/// One append-only ledger entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub record_id: Uuid,
    pub user_id: Uuid,
    pub field: QuotaField,
    pub action: QuotaAction,
    pub amount: u64,
    pub reason: QuotaReason,
    /// Session the record is tagged with, for reserve/withdraw pairing.
    pub upload_session_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
