//! Credential check through `LogonUserW`.
//!
//! `LogonUserW` reports a rejection as a Win32 error instead of a status
//! pair, so the decision that the LSA engine takes from
//! [`interpret`](fn@crate::interpret) is made here by [`classify_logon_error`].

use crate::ValidationError;

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod windows;
        pub use self::windows::AccountApiValidator;
    }
}

/// Win32 errors by which `LogonUserW` says "these credentials do not log on".
pub const REJECTION_CODES: [u32; 10] = [
    1326, // ERROR_LOGON_FAILURE
    1327, // ERROR_ACCOUNT_RESTRICTION
    1328, // ERROR_INVALID_LOGON_HOURS
    1329, // ERROR_INVALID_WORKSTATION
    1330, // ERROR_PASSWORD_EXPIRED
    1331, // ERROR_ACCOUNT_DISABLED
    1385, // ERROR_LOGON_TYPE_NOT_GRANTED
    1793, // ERROR_ACCOUNT_EXPIRED
    1907, // ERROR_PASSWORD_MUST_CHANGE
    1909, // ERROR_ACCOUNT_LOCKED_OUT
];

/// Maps a failed `LogonUserW` to a verdict: rejected credentials are
/// `Ok(false)`, anything else is an error.
///
/// # Errors
/// [`ValidationError::AccountApi`] for codes outside [`REJECTION_CODES`].
#[inline]
pub fn classify_logon_error(code: u32) -> Result<bool, ValidationError> {
    if REJECTION_CODES.contains(&code) {
        Ok(false)
    } else {
        Err(ValidationError::AccountApi(code))
    }
}
