//! Vetting verdicts and principal roles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of vetting an uploaded file.
///
/// Archive inspection is fail-safe: output the classifier does not
/// recognize lands in `BrokenOrUnsupported`, never in `Ok`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Not yet vetted.
    Pending,
    /// Inspection passed (or the file is not an archive).
    Ok,
    /// Archive requires a password.
    Encrypted,
    /// Archive data is damaged or cut short.
    BrokenOrTruncated,
    /// Archive could not be read at all.
    BrokenOrUnsupported,
    /// Malware scanner flagged the file.
    Infected,
}

impl CheckStatus {
    /// Whether the file may proceed to promotion.
    pub fn is_promotable(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Canonical string form, as stored in metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ok => "ok",
            Self::Encrypted => "encrypted",
            Self::BrokenOrTruncated => "broken_or_truncated",
            Self::BrokenOrUnsupported => "broken_or_unsupported",
            Self::Infected => "infected",
        }
    }

    /// Parse from the canonical string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "ok" => Ok(Self::Ok),
            "encrypted" => Ok(Self::Encrypted),
            "broken_or_truncated" => Ok(Self::BrokenOrTruncated),
            "broken_or_unsupported" => Ok(Self::BrokenOrUnsupported),
            "infected" => Ok(Self::Infected),
            other => Err(crate::Error::UnknownVariant {
                kind: "check status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Principal role. Ordering matters: later roles hold every permission
/// of earlier ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    /// Exempt from the per-upload chunk count ceiling.
    pub fn exempt_from_chunk_limit(&self) -> bool {
        *self >= Self::Moderator
    }

    /// Exempt from the per-upload total size ceiling.
    pub fn exempt_from_size_limit(&self) -> bool {
        *self >= Self::Admin
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "moderator" => Ok(Self::Moderator),
            "admin" => Ok(Self::Admin),
            other => Err(crate::Error::UnknownVariant {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status_roundtrip() {
        for status in [
            CheckStatus::Pending,
            CheckStatus::Ok,
            CheckStatus::Encrypted,
            CheckStatus::BrokenOrTruncated,
            CheckStatus::BrokenOrUnsupported,
            CheckStatus::Infected,
        ] {
            assert_eq!(CheckStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(CheckStatus::parse("fine").is_err());
    }

    #[test]
    fn test_only_ok_is_promotable() {
        assert!(CheckStatus::Ok.is_promotable());
        assert!(!CheckStatus::Pending.is_promotable());
        assert!(!CheckStatus::Encrypted.is_promotable());
        assert!(!CheckStatus::Infected.is_promotable());
    }

    #[test]
    fn test_role_exemptions() {
        assert!(!Role::User.exempt_from_chunk_limit());
        assert!(Role::Moderator.exempt_from_chunk_limit());
        assert!(!Role::Moderator.exempt_from_size_limit());
        assert!(Role::Admin.exempt_from_chunk_limit());
        assert!(Role::Admin.exempt_from_size_limit());
    }
}
