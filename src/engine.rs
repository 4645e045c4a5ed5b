//! The credential validation engine: parse, build, open, submit, interpret.

use parsing::{Identity, MalformedIdentity};
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::config::LogonSettings;
use crate::native::LsaApi;
use crate::session::{ConnectionFailed, NativeLogonSession, SubmissionFailed};
use crate::{BufferError, LogonBuffer, ValidationVerdict, interpret};

/// Why a credential check could not produce a verdict.
///
/// A rejected password is not an error; it is `Ok(false)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The identity does not follow the `DOMAIN\account` grammar.
    #[error("Malformed identity: {0}")]
    MalformedIdentity(#[from] MalformedIdentity),

    /// The submit buffer cannot be sized.
    #[error("Cannot build logon buffer: {0}")]
    Buffer(#[from] BufferError),

    /// Session setup failed.
    #[error("Connection to the LSA failed: {0}")]
    ConnectionFailed(#[from] ConnectionFailed),

    /// The logon primitive could not be invoked.
    #[error("Logon submission failed: {0}")]
    SubmissionFailed(#[from] SubmissionFailed),

    /// The account API failed for a reason other than rejected credentials.
    #[error("Account API logon failed (error {0})")]
    AccountApi(u32),
}

/// Answers "are these credentials valid?".
///
/// Implementations fail closed: anything that prevents a definite answer is an
/// `Err`, never `Ok(true)`.
pub trait CredentialValidator {
    /// Checks `password` for `identity` (`DOMAIN\account` or a principal name).
    ///
    /// # Errors
    /// See [`ValidationError`].
    fn validate(&self, identity: &str, password: &str) -> Result<bool, ValidationError>;
}

/// Validates credentials with a network logon through `LsaLogonUser`.
///
/// Stateless between calls: each validation opens and closes its own LSA
/// connection, so concurrent calls need no locking.
#[derive(Debug)]
pub struct CredentialValidationEngine<A: LsaApi> {
    api: A,
    settings: LogonSettings,
}

impl<A: LsaApi> CredentialValidationEngine<A> {
    /// Creates an engine over `api`.
    #[inline]
    #[must_use]
    pub const fn new(api: A, settings: LogonSettings) -> Self {
        Self { api, settings }
    }

    /// The native layer in use.
    #[inline]
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// The names handed to the subsystem.
    #[inline]
    #[must_use]
    pub const fn settings(&self) -> &LogonSettings {
        &self.settings
    }

    /// Runs one logon and returns the verdict with its diagnostic.
    ///
    /// The password is encoded once into the submit buffer, which is zeroed
    /// and freed before this returns on every path. The token, if one was
    /// produced, is closed before this returns.
    ///
    /// # Errors
    /// See [`ValidationError`]. Parsing errors are raised before any native call.
    #[instrument(level = "debug", skip(self, password), err(Display))]
    pub fn verdict(&self, identity: &str, password: &str) -> Result<ValidationVerdict, ValidationError> {
        let parsed = Identity::parse(identity)?;
        let mut buffer = LogonBuffer::build(parsed.domain, parsed.account, password)?;

        let session = NativeLogonSession::open(&self.api, self.settings.package_name())?;
        let mut outcome = session.submit(
            &mut buffer,
            self.settings.origin_name(),
            self.settings.source_tag(),
            parsed.account,
        )?;
        drop(buffer);

        let verdict = interpret(outcome.status, outcome.sub_status);
        outcome.release_token();
        drop(outcome);
        session.close();

        if verdict.is_valid {
            debug!(%parsed, "credentials accepted");
        } else {
            error!(%parsed, diagnostic = %verdict.diagnostic, "authentication failed");
        }
        Ok(verdict)
    }
}

impl<A: LsaApi> CredentialValidator for CredentialValidationEngine<A> {
    #[inline]
    fn validate(&self, identity: &str, password: &str) -> Result<bool, ValidationError> {
        self.verdict(identity, password).map(|verdict| verdict.is_valid)
    }
}

#[cfg(all(windows, feature = "windows_result"))]
mod hresult {
    use windows_sys::Win32::Foundation::{ERROR_BAD_LENGTH, ERROR_INVALID_PARAMETER};

    use super::ValidationError;

    impl From<&ValidationError> for windows_result::HRESULT {
        fn from(value: &ValidationError) -> Self {
            let code = match value {
                ValidationError::MalformedIdentity(_) | ValidationError::SubmissionFailed(_) => {
                    ERROR_INVALID_PARAMETER
                }
                ValidationError::Buffer(_) => ERROR_BAD_LENGTH,
                ValidationError::ConnectionFailed(failed) => failed.code,
                ValidationError::AccountApi(code) => *code,
            };
            Self::from_win32(code)
        }
    }

    impl From<ValidationError> for windows_result::HRESULT {
        fn from(value: ValidationError) -> Self {
            Self::from(&value)
        }
    }

    impl From<ValidationError> for windows_result::Error {
        fn from(value: ValidationError) -> Self {
            let hresult = windows_result::HRESULT::from(&value);
            Self::from_hresult(hresult)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in test")]
mod tests {
    use super::*;
    use crate::buffer::live_buffers;
    use crate::native::fake::FakeLsa;
    use crate::{KnownStatus, NtStatus, OpenStep};

    fn engine(api: FakeLsa) -> CredentialValidationEngine<FakeLsa> {
        CredentialValidationEngine::new(api, LogonSettings::default())
    }

    #[test]
    fn accepted_credentials() {
        let engine = engine(FakeLsa::accepting());
        assert!(engine.validate("CONTOSO\\alice", "correct horse").unwrap());

        let api = engine.api();
        assert_eq!(api.logon_calls(), 1);
        let submitted = api.last_submission().unwrap();
        assert_eq!(submitted.domain, "CONTOSO");
        assert_eq!(submitted.account, "alice");
        assert_eq!(submitted.password, "correct horse");
        assert_eq!(submitted.live_buffers, 1);
        assert_eq!(live_buffers(), 0);
        assert!(api.leaked().is_empty(), "leaked {:?}", api.leaked());
        assert!(api.double_released().is_empty());
        // Profile buffer, token and connection were all given back.
        assert_eq!(api.released().len(), 3);
    }

    #[test]
    fn rejected_password_is_not_an_error() {
        let engine = engine(FakeLsa::returning(
            KnownStatus::LogonFailure.into(),
            NtStatus::SUCCESS,
        ));
        let verdict = engine.verdict("alice@contoso.com", "wrong").unwrap();
        assert!(!verdict.is_valid);
        assert!(verdict.diagnostic.contains("STATUS_LOGON_FAILURE"));
        assert!(!verdict.diagnostic.contains("wrong"));
        assert_eq!(engine.api().last_submission().unwrap().domain, "");
        assert!(engine.api().leaked().is_empty());
        assert_eq!(live_buffers(), 0);
    }

    #[test]
    fn malformed_identity_never_reaches_the_lsa() {
        let engine = engine(FakeLsa::accepting());
        assert_eq!(
            engine.validate("\\alice", "pw"),
            Err(ValidationError::MalformedIdentity(MalformedIdentity::EmptyDomain))
        );
        assert!(engine.api().acquired().is_empty());
        assert_eq!(engine.api().logon_calls(), 0);
        assert_eq!(live_buffers(), 0);
    }

    #[test]
    fn oversized_password_fails_before_connecting() {
        let engine = engine(FakeLsa::accepting());
        let password = "x".repeat(40_000);
        assert!(matches!(
            engine.validate("alice", &password),
            Err(ValidationError::Buffer(BufferError::FieldTooLong { .. }))
        ));
        assert!(engine.api().acquired().is_empty());
        assert_eq!(live_buffers(), 0);
    }

    #[test]
    fn setup_failure_fails_closed() {
        for step in [OpenStep::Connect, OpenStep::LookupPackage, OpenStep::SourceIdentifier] {
            let engine = engine(FakeLsa::accepting().failing_at(step));
            let result = engine.validate("CONTOSO\\alice", "pw");
            assert!(
                matches!(&result, Err(ValidationError::ConnectionFailed(failed)) if failed.step == step),
                "expected connection failure at {step}, got {result:?}"
            );
            assert!(engine.api().leaked().is_empty());
            assert_eq!(engine.api().logon_calls(), 0);
            assert_eq!(live_buffers(), 0, "buffer outlived a failed {step}");
        }
    }

    #[test]
    fn failure_status_still_releases_token_and_profile() {
        let engine = engine(
            FakeLsa::returning(NtStatus::ACCOUNT_RESTRICTION, KnownStatus::AccountDisabled.into())
                .with_token(),
        );
        let verdict = engine.verdict("CONTOSO\\bob", "pw").unwrap();
        assert!(!verdict.is_valid);
        assert_eq!(
            verdict.operative_status,
            Some(KnownStatus::AccountDisabled.into())
        );
        assert!(engine.api().leaked().is_empty());
        assert_eq!(engine.api().last_submission().unwrap().live_buffers, 1);
        assert_eq!(live_buffers(), 0);
    }
}
