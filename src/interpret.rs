//! Turns the status pair returned by `LsaLogonUser` into a trust verdict.

use core::fmt::{self, Display};

use crate::NtStatus;

/// Which of the two returned statuses decided a negative verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureSource {
    /// `STATUS_ACCOUNT_RESTRICTION` paired with a failing sub-status.
    AccountRestriction,
    /// The primary status.
    Status,
    /// The sub-status alone.
    SubStatus,
}

impl Display for FailureSource {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccountRestriction => f.write_str("account restriction"),
            Self::Status => f.write_str("status"),
            Self::SubStatus => f.write_str("sub-status"),
        }
    }
}

/// Outcome of one credential check.
///
/// `is_valid = false` is the normal negative answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    /// Whether the subsystem accepted the credentials.
    pub is_valid: bool,
    /// Human-readable reason, suitable for logs. Never contains the password.
    pub diagnostic: String,
    /// The status that decided a negative verdict.
    pub operative_status: Option<NtStatus>,
}

impl ValidationVerdict {
    /// A positive verdict.
    #[inline]
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            diagnostic: "credentials accepted".to_owned(),
            operative_status: None,
        }
    }

    /// A negative verdict decided by `status`.
    #[inline]
    #[must_use]
    pub fn invalid(source: FailureSource, status: NtStatus) -> Self {
        Self {
            is_valid: false,
            diagnostic: format!("authentication failed with {source} {status}"),
            operative_status: Some(status),
        }
    }
}

/// Maps `(status, sub_status)` to a verdict. First matching rule wins:
///
/// 1. `STATUS_ACCOUNT_RESTRICTION` with a failing sub-status: the sub-status is the reason.
/// 2. A failing status.
/// 3. A failing sub-status.
/// 4. Otherwise the credentials are valid.
#[inline]
#[must_use]
pub fn interpret(status: NtStatus, sub_status: NtStatus) -> ValidationVerdict {
    if status == NtStatus::ACCOUNT_RESTRICTION && sub_status.is_failure() {
        ValidationVerdict::invalid(FailureSource::AccountRestriction, sub_status)
    } else if status.is_failure() {
        ValidationVerdict::invalid(FailureSource::Status, status)
    } else if sub_status.is_failure() {
        ValidationVerdict::invalid(FailureSource::SubStatus, sub_status)
    } else {
        ValidationVerdict::valid()
    }
}
