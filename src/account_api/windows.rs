use core::ptr::{null, null_mut};
use std::os::windows::io::{FromRawHandle, OwnedHandle};

use parsing::Identity;
use tracing::{debug, error, instrument};
use widestring::U16CString;
use windows_sys::Win32::{
    Foundation::{ERROR_INVALID_PARAMETER, GetLastError, HANDLE},
    Security::{LOGON32_LOGON_NETWORK, LOGON32_PROVIDER_DEFAULT, LogonUserW},
};
use zeroize::Zeroizing;

use super::classify_logon_error;
use crate::{CredentialValidator, ValidationError};

/// Validates credentials with a network `LogonUserW`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountApiValidator;

fn wide(value: &str) -> Result<U16CString, ValidationError> {
    U16CString::from_str(value).map_err(|_| ValidationError::AccountApi(ERROR_INVALID_PARAMETER))
}

impl CredentialValidator for AccountApiValidator {
    #[instrument(level = "debug", skip(self, password), err(Display))]
    fn validate(&self, identity: &str, password: &str) -> Result<bool, ValidationError> {
        let parsed = Identity::parse(identity)?;
        let account = wide(parsed.account)?;
        let domain = parsed.domain.map(wide).transpose()?;
        if password.contains('\0') {
            return Err(ValidationError::AccountApi(ERROR_INVALID_PARAMETER));
        }
        let password: Zeroizing<Vec<u16>> =
            Zeroizing::new(password.encode_utf16().chain(core::iter::once(0)).collect());

        let mut token: HANDLE = null_mut();
        // SAFETY: every string is NUL-terminated and outlives the call; a
        // missing domain is passed as null; the out pointer is valid.
        let ok = unsafe {
            LogonUserW(
                account.as_ptr(),
                domain.as_ref().map_or(null(), |domain| domain.as_ptr()),
                password.as_ptr(),
                LOGON32_LOGON_NETWORK,
                LOGON32_PROVIDER_DEFAULT,
                &raw mut token,
            )
        };
        drop(password);

        if ok == 0 {
            // SAFETY: GetLastError can be called immediately after a failing FFI call.
            let code = unsafe { GetLastError() };
            let verdict = classify_logon_error(code);
            if verdict.is_ok() {
                error!(%parsed, code, "authentication failed");
            }
            return verdict;
        }

        // SAFETY: LogonUserW reported success; the token is a valid owned handle.
        drop(unsafe { OwnedHandle::from_raw_handle(token) });
        debug!(%parsed, "credentials accepted");
        Ok(true)
    }
}
