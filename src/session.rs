//! One untrusted LSA connection, scoped to a single validation attempt.
//!
//! [`NativeLogonSession::open`] acquires, in order, the connection, the
//! marshalled package name, the package id and the source identifier. A failure
//! at any step drops whatever was already acquired. Dropping the session
//! deregisters the connection.

use core::fmt::{self, Display};

use thiserror::Error;
use tracing::{debug, warn};

use crate::native::{
    LogonRequest, LsaApi, LsaName, LsaNameError, Luid, NativeHandle, NativeResource, Scoped,
    SecurityLogonType, SourceTag,
};
use crate::{LogonBuffer, NtStatus};

/// The steps of [`NativeLogonSession::open`], in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenStep {
    /// `LsaConnectUntrusted`.
    Connect,
    /// Building the `LSA_STRING` for the package name.
    PackageName,
    /// `LsaLookupAuthenticationPackage`.
    LookupPackage,
    /// `AllocateLocallyUniqueId`.
    SourceIdentifier,
}

impl OpenStep {
    /// Every step, in order.
    pub const ALL: [Self; 4] = [
        Self::Connect,
        Self::PackageName,
        Self::LookupPackage,
        Self::SourceIdentifier,
    ];
}

impl Display for OpenStep {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("LsaConnectUntrusted"),
            Self::PackageName => f.write_str("package name"),
            Self::LookupPackage => f.write_str("LsaLookupAuthenticationPackage"),
            Self::SourceIdentifier => f.write_str("AllocateLocallyUniqueId"),
        }
    }
}

/// Session setup failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{step} failed (error {code})")]
pub struct ConnectionFailed {
    /// The step that failed.
    pub step: OpenStep,
    /// Win32 error code (translated from the `NTSTATUS` for LSA calls).
    pub code: u32,
    /// The invalid package name, when that is what failed.
    #[source]
    pub name_error: Option<LsaNameError>,
}

/// The logon primitive could not be invoked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionFailed {
    /// The origin name is not a valid `LSA_STRING`.
    #[error("Invalid origin name")]
    OriginName(#[from] LsaNameError),
}

/// Raw result of one submission. The token, if any, is released when this is dropped.
#[derive(Debug)]
pub struct LogonOutcome<'a, A: LsaApi + ?Sized> {
    /// Value returned by `LsaLogonUser`.
    pub status: NtStatus,
    /// `SubStatus` written by `LsaLogonUser`.
    pub sub_status: NtStatus,
    /// The logon session that was created, if any.
    pub logon_id: Luid,
    token: Option<Scoped<'a, A>>,
}

impl<A: LsaApi + ?Sized> LogonOutcome<'_, A> {
    /// `true` when the subsystem handed back a token.
    #[inline]
    #[must_use]
    pub const fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Closes the token now, if any.
    #[inline]
    pub fn release_token(&mut self) {
        if let Some(token) = self.token.take()
            && let Err(err) = token.release()
        {
            warn!(%err, "failed to close logon token");
        }
    }
}

/// An open LSA connection with its package id and source identifier.
#[derive(Debug)]
pub struct NativeLogonSession<'a, A: LsaApi + ?Sized> {
    api: &'a A,
    handle: NativeHandle,
    connection: Scoped<'a, A>,
    package_id: u32,
    source_id: Luid,
}

impl<'a, A: LsaApi + ?Sized> NativeLogonSession<'a, A> {
    /// Connects to the LSA and resolves `package_name`.
    ///
    /// # Errors
    /// [`ConnectionFailed`] naming the failing step. Everything acquired before
    /// that step has been released by the time this returns.
    pub fn open(api: &'a A, package_name: &str) -> Result<Self, ConnectionFailed> {
        let handle = api
            .connect_untrusted()
            .map_err(|status| Self::failed(api, OpenStep::Connect, status))?;
        let connection = Scoped::new(api, NativeResource::LsaConnection(handle));
        debug!(?handle, "connected to LSA");

        let package = LsaName::new(package_name).map_err(|err| ConnectionFailed {
            step: OpenStep::PackageName,
            code: ERROR_INVALID_PARAMETER,
            name_error: Some(err),
        })?;

        let package_id = api
            .lookup_authentication_package(handle, &package)
            .map_err(|status| Self::failed(api, OpenStep::LookupPackage, status))?;
        debug!(%package, package_id, "resolved authentication package");

        let source_id = api.allocate_locally_unique_id().map_err(|code| {
            warn!(code, step = %OpenStep::SourceIdentifier, "LSA session setup failed");
            ConnectionFailed {
                step: OpenStep::SourceIdentifier,
                code,
                name_error: None,
            }
        })?;

        Ok(Self {
            api,
            handle,
            connection,
            package_id,
            source_id,
        })
    }

    fn failed(api: &A, step: OpenStep, status: NtStatus) -> ConnectionFailed {
        let code = api.nt_status_to_win_error(status);
        warn!(%status, code, %step, "LSA session setup failed");
        ConnectionFailed {
            step,
            code,
            name_error: None,
        }
    }

    /// The id of the looked-up authentication package.
    #[inline]
    #[must_use]
    pub const fn package_id(&self) -> u32 {
        self.package_id
    }

    /// The identifier tagging logons from this session.
    #[inline]
    #[must_use]
    pub const fn source_id(&self) -> Luid {
        self.source_id
    }

    /// Submits `buffer` as a network logon.
    ///
    /// The profile buffer is freed before returning; the token, if any, is owned
    /// by the returned outcome. `account` is only used for logging.
    ///
    /// # Errors
    /// [`SubmissionFailed`] when the call cannot be made. A rejected logon is
    /// not an error: it comes back as a failing status in the outcome.
    pub fn submit(
        &self,
        buffer: &mut LogonBuffer,
        origin_name: &str,
        source_tag: SourceTag,
        account: &str,
    ) -> Result<LogonOutcome<'a, A>, SubmissionFailed> {
        let api = self.api;
        let origin = LsaName::new(origin_name)?;
        let request = LogonRequest {
            connection: self.handle,
            origin: &origin,
            logon_type: SecurityLogonType::Network,
            package_id: self.package_id,
            source_tag,
            source_id: self.source_id,
        };

        debug!(account, size = buffer.len(), "submitting logon");
        let raw = api.logon_user(&request, buffer);
        let _profile = raw
            .profile
            .map(|handle| Scoped::new(api, NativeResource::ReturnBuffer(handle)));
        let token = raw
            .token
            .map(|handle| Scoped::new(api, NativeResource::Token(handle)));
        debug!(
            account,
            status = %raw.status,
            sub_status = %raw.sub_status,
            profile_length = raw.profile_length,
            "logon returned"
        );

        Ok(LogonOutcome {
            status: raw.status,
            sub_status: raw.sub_status,
            logon_id: raw.logon_id,
            token,
        })
    }

    /// Deregisters the connection now.
    #[inline]
    pub fn close(self) {
        let Self { connection, .. } = self;
        match connection.release() {
            Ok(()) => debug!("LSA connection closed"),
            Err(err) => warn!(%err, "failed to deregister LSA connection"),
        }
    }
}

/// `ERROR_INVALID_PARAMETER` from `winerror.h`, reported when a name cannot be marshalled.
const ERROR_INVALID_PARAMETER: u32 = 87;
