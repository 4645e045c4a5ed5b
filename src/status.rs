//! `NTSTATUS` values returned by the Local Security Authority.
//!
//! Every LSA primitive reports its result as a signed 32-bit status where a
//! negative value (severity bits `11`) denotes failure. [`NtStatus`] wraps the
//! raw value once at the native boundary so the rest of the crate never has to
//! reason about sign bits.

use core::fmt::{self, Debug, Display};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// A raw `NTSTATUS` value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct NtStatus(i32);

impl NtStatus {
    /// `STATUS_SUCCESS`.
    pub const SUCCESS: Self = Self(0);

    /// `STATUS_ACCOUNT_RESTRICTION`: a wrapper status whose sub-status carries
    /// the real reason (expired, disabled, outside logon hours, ...).
    pub const ACCOUNT_RESTRICTION: Self = Self::from_bits(KnownStatus::AccountRestriction as u32);

    /// Wraps a signed status as returned by the native call.
    #[inline]
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Wraps a status written in its usual unsigned hexadecimal form.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(i32::from_ne_bytes(bits.to_ne_bytes()))
    }

    /// The signed value handed back by the native call.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// The unsigned form used in headers and documentation (`0xC000006D`).
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        u32::from_ne_bytes(self.0.to_ne_bytes())
    }

    /// `true` when the sign bit is set.
    #[inline]
    #[must_use]
    pub const fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// `true` for every non-negative status, informational and warning codes included.
    #[inline]
    #[must_use]
    pub const fn is_success(self) -> bool {
        !self.is_failure()
    }

    /// Translates the sign convention into a `Result`.
    ///
    /// # Errors
    /// Returns `Err(self)` when the status denotes failure.
    #[inline]
    pub const fn ok(self) -> Result<Self, Self> {
        if self.is_failure() { Err(self) } else { Ok(self) }
    }

    /// The symbolic status, when this is one of the codes a logon commonly returns.
    #[inline]
    #[must_use]
    pub fn known(self) -> Option<KnownStatus> {
        KnownStatus::try_from(self.bits()).ok()
    }
}

impl From<i32> for NtStatus {
    #[inline]
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

impl From<NtStatus> for i32 {
    #[inline]
    fn from(status: NtStatus) -> Self {
        status.0
    }
}

impl From<KnownStatus> for NtStatus {
    #[inline]
    fn from(status: KnownStatus) -> Self {
        Self::from_bits(status.into())
    }
}

impl Debug for NtStatus {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NtStatus({:#010X})", self.bits())
    }
}

impl Display for NtStatus {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some(known) => write!(f, "{} ({:#010X})", known.name(), self.bits()),
            None => write!(f, "{:#010X}", self.bits()),
        }
    }
}

/// Status codes a logon attempt commonly returns, from `ntstatus.h`.
///
/// Only used to render readable diagnostics; unknown codes are still
/// interpreted through the sign convention of [`NtStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum KnownStatus {
    /// The logon completed.
    Success = 0x0000_0000,
    /// No logon server is available to service the request.
    NoLogonServers = 0xC000_005E,
    /// The account does not exist.
    NoSuchUser = 0xC000_0064,
    /// The password is wrong.
    WrongPassword = 0xC000_006A,
    /// Unknown user name or bad password.
    LogonFailure = 0xC000_006D,
    /// Account restriction; the sub-status holds the reason.
    AccountRestriction = 0xC000_006E,
    /// Logon attempted outside the allowed hours.
    InvalidLogonHours = 0xC000_006F,
    /// Logon attempted from a workstation that is not allowed.
    InvalidWorkstation = 0xC000_0070,
    /// The password has expired.
    PasswordExpired = 0xC000_0071,
    /// The account is disabled.
    AccountDisabled = 0xC000_0072,
    /// The authentication package is unknown.
    NoSuchPackage = 0xC000_00FE,
    /// The user has not been granted the requested logon type.
    LogonTypeNotGranted = 0xC000_015B,
    /// The account has expired.
    AccountExpired = 0xC000_0193,
    /// The password must be changed before the first logon.
    PasswordMustChange = 0xC000_0224,
    /// The account is locked out.
    AccountLockedOut = 0xC000_0234,
}

impl KnownStatus {
    /// The `ntstatus.h` identifier.
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "STATUS_SUCCESS",
            Self::NoLogonServers => "STATUS_NO_LOGON_SERVERS",
            Self::NoSuchUser => "STATUS_NO_SUCH_USER",
            Self::WrongPassword => "STATUS_WRONG_PASSWORD",
            Self::LogonFailure => "STATUS_LOGON_FAILURE",
            Self::AccountRestriction => "STATUS_ACCOUNT_RESTRICTION",
            Self::InvalidLogonHours => "STATUS_INVALID_LOGON_HOURS",
            Self::InvalidWorkstation => "STATUS_INVALID_WORKSTATION",
            Self::PasswordExpired => "STATUS_PASSWORD_EXPIRED",
            Self::AccountDisabled => "STATUS_ACCOUNT_DISABLED",
            Self::NoSuchPackage => "STATUS_NO_SUCH_PACKAGE",
            Self::LogonTypeNotGranted => "STATUS_LOGON_TYPE_NOT_GRANTED",
            Self::AccountExpired => "STATUS_ACCOUNT_EXPIRED",
            Self::PasswordMustChange => "STATUS_PASSWORD_MUST_CHANGE",
            Self::AccountLockedOut => "STATUS_ACCOUNT_LOCKED_OUT",
        }
    }
}
