//! The boundary with the Local Security Authority.
//!
//! [`LsaApi`] has one method per native primitive the logon needs. The
//! Windows implementation ([`SystemLsa`]) calls `secur32`/`advapi32`; tests
//! substitute their own implementation to script statuses and inject faults.
//!
//! Every releasable resource handed out by the API is wrapped in a [`Scoped`]
//! guard as soon as it is returned, so it is released exactly once on every
//! exit path.

use core::ffi::c_void;
use core::fmt::{self, Debug, Display};
use core::ptr;
use core::str::FromStr;

use thiserror::Error;
use tracing::warn;

use crate::{LogonBuffer, NtStatus};

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod windows;
        pub use self::windows::SystemLsa;
    }
}

#[cfg(test)]
pub(crate) mod fake;

/// An opaque native handle or pointer owned by the caller.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NativeHandle(*mut c_void);

impl NativeHandle {
    /// Wraps a raw handle, `None` when it is null.
    #[inline]
    #[must_use]
    pub fn new(raw: *mut c_void) -> Option<Self> {
        (!raw.is_null()).then_some(Self(raw))
    }

    /// A non-dereferenceable handle carrying `value`, for API implementations
    /// that hand out identifiers rather than addresses.
    #[inline]
    #[must_use]
    pub const fn from_value(value: usize) -> Self {
        Self(ptr::without_provenance_mut(value))
    }

    /// The raw handle.
    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> *mut c_void {
        self.0
    }

    /// The handle's address as an integer.
    #[inline]
    #[must_use]
    pub fn value(self) -> usize {
        self.0.addr()
    }
}

impl Debug for NativeHandle {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle({:#x})", self.value())
    }
}

/// A native resource that must be given back to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeResource {
    /// Connection from `LsaConnectUntrusted`, released with `LsaDeregisterLogonProcess`.
    LsaConnection(NativeHandle),
    /// Profile buffer from `LsaLogonUser`, released with `LsaFreeReturnBuffer`.
    ReturnBuffer(NativeHandle),
    /// Token from `LsaLogonUser`, released with `CloseHandle`.
    Token(NativeHandle),
}

impl Display for NativeResource {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LsaConnection(handle) => write!(f, "LSA connection {handle:?}"),
            Self::ReturnBuffer(handle) => write!(f, "LSA return buffer {handle:?}"),
            Self::Token(handle) => write!(f, "token {handle:?}"),
        }
    }
}

/// Why a release failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReleaseError {
    /// An LSA release call returned a failing `NTSTATUS`.
    #[error("release failed with status {0}")]
    Status(NtStatus),
    /// `CloseHandle` failed; contains the Win32 error code.
    #[error("release failed with error {0}")]
    Win32(u32),
}

/// Locally unique identifier (`LUID`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Luid {
    /// `LowPart`.
    pub low_part: u32,
    /// `HighPart`.
    pub high_part: i32,
}

/// `SECURITY_LOGON_TYPE`, mirrored from `ntsecapi.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(i32)]
pub enum SecurityLogonType {
    /// Interactive desktop logon.
    Interactive = 2,
    /// Network logon: credentials are checked, no interactive session is created.
    Network = 3,
    /// Batch logon.
    Batch = 4,
    /// Service logon.
    Service = 5,
    /// Proxy logon.
    Proxy = 6,
    /// Workstation unlock.
    Unlock = 7,
}

/// Errors building an [`LsaName`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LsaNameError {
    /// LSA names are ANSI; only ASCII is accepted.
    #[error("Non-ASCII character in LSA name at index {index}")]
    NonAscii {
        /// Byte index of the offending character.
        index: usize,
    },
    /// Counted strings cannot carry an interior NUL.
    #[error("NUL in LSA name at index {index}")]
    InteriorNul {
        /// Byte index of the NUL.
        index: usize,
    },
    /// The name does not fit a 16-bit counted string.
    #[error("LSA name too long: {len} bytes")]
    TooLong {
        /// Length in bytes.
        len: usize,
    },
}

/// ANSI counted string (`LSA_STRING`) for package and origin names.
///
/// The owned storage keeps a trailing NUL; `Length` excludes it and
/// `MaximumLength` is `Length + 1`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LsaName {
    bytes_with_nul: Vec<u8>,
}

impl LsaName {
    /// Validates and copies `name`.
    ///
    /// # Errors
    /// See [`LsaNameError`].
    #[inline]
    pub fn new(name: &str) -> Result<Self, LsaNameError> {
        Self::check(name)?;
        Ok(Self::copy_of(name))
    }

    /// Copies a name known to be valid, such as a built-in default.
    pub(crate) fn from_trusted(name: &str) -> Self {
        debug_assert!(Self::check(name).is_ok(), "invalid built-in LSA name");
        Self::copy_of(name)
    }

    fn check(name: &str) -> Result<(), LsaNameError> {
        if let Some(index) = name.bytes().position(|b| b == 0) {
            return Err(LsaNameError::InteriorNul { index });
        }
        if let Some(index) = name.bytes().position(|b| !b.is_ascii()) {
            return Err(LsaNameError::NonAscii { index });
        }
        if name.len() >= usize::from(u16::MAX) {
            return Err(LsaNameError::TooLong { len: name.len() });
        }
        Ok(())
    }

    fn copy_of(name: &str) -> Self {
        let mut bytes_with_nul = Vec::with_capacity(name.len() + 1);
        bytes_with_nul.extend_from_slice(name.as_bytes());
        bytes_with_nul.push(0);
        Self { bytes_with_nul }
    }

    /// The name without its terminator.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        let bytes = self.bytes_with_nul.split_last().map_or(&[][..], |(_, b)| b);
        core::str::from_utf8(bytes).unwrap_or_default()
    }

    /// `Length`.
    #[inline]
    #[must_use]
    pub fn length(&self) -> u16 {
        u16::try_from(self.bytes_with_nul.len().saturating_sub(1)).unwrap_or(u16::MAX)
    }

    /// `MaximumLength`.
    #[inline]
    #[must_use]
    pub fn maximum_length(&self) -> u16 {
        self.length().saturating_add(1)
    }

    /// `Buffer`: NUL-terminated storage valid while `self` lives.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes_with_nul.as_ptr()
    }
}

impl FromStr for LsaName {
    type Err = LsaNameError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Debug for LsaName {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LsaName({:?})", self.as_str())
    }
}

impl Display for LsaName {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors building a [`SourceTag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SourceTagError {
    /// The tag must be 1 to 8 bytes.
    #[error("Token source name must be 1 to 8 bytes, got {0}")]
    Length(usize),
    /// The tag must be printable ASCII.
    #[error("Token source name must be printable ASCII")]
    NotAscii,
}

const TOKEN_SOURCE_LENGTH: usize = 8;

/// The 8-byte `TOKEN_SOURCE.SourceName`, NUL-padded.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceTag([u8; TOKEN_SOURCE_LENGTH]);

impl SourceTag {
    /// `TOKEN_SOURCE_LENGTH`.
    pub const LEN: usize = TOKEN_SOURCE_LENGTH;

    /// `"CredVal"`, the default tag.
    pub const CREDENTIAL_VALIDATION: Self = Self(*b"CredVal\0");

    /// Pads `name` with NULs to eight bytes.
    ///
    /// # Errors
    /// See [`SourceTagError`].
    #[inline]
    pub fn new(name: &str) -> Result<Self, SourceTagError> {
        if name.is_empty() || name.len() > Self::LEN {
            return Err(SourceTagError::Length(name.len()));
        }
        if !name.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
            return Err(SourceTagError::NotAscii);
        }
        let mut tag = [0u8; Self::LEN];
        for (dst, src) in tag.iter_mut().zip(name.bytes()) {
            *dst = src;
        }
        Ok(Self(tag))
    }

    /// The eight raw bytes.
    #[inline]
    #[must_use]
    pub const fn bytes(self) -> [u8; Self::LEN] {
        self.0
    }
}

impl SourceTag {
    /// The tag without its NUL padding.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(Self::LEN);
        let name = self.0.get(..end).unwrap_or_default();
        core::str::from_utf8(name).unwrap_or_default()
    }
}

impl FromStr for SourceTag {
    type Err = SourceTagError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Debug for SourceTag {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceTag({:?})", self.as_str())
    }
}

impl Display for SourceTag {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything `LsaLogonUser` needs besides the submit buffer.
#[derive(Debug)]
pub struct LogonRequest<'a> {
    /// The connection from [`LsaApi::connect_untrusted`].
    pub connection: NativeHandle,
    /// Origin name recorded with the logon.
    pub origin: &'a LsaName,
    /// Always [`SecurityLogonType::Network`] for credential checks.
    pub logon_type: SecurityLogonType,
    /// Package id from [`LsaApi::lookup_authentication_package`].
    pub package_id: u32,
    /// `TOKEN_SOURCE.SourceName`.
    pub source_tag: SourceTag,
    /// `TOKEN_SOURCE.SourceIdentifier`.
    pub source_id: Luid,
}

/// What `LsaLogonUser` wrote back. Handles are raw here; the caller wraps
/// them into [`Scoped`] guards immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLogonOutput {
    /// The call's return value.
    pub status: NtStatus,
    /// `SubStatus`.
    pub sub_status: NtStatus,
    /// `ProfileBuffer`, if one was allocated.
    pub profile: Option<NativeHandle>,
    /// `ProfileBufferLength`.
    pub profile_length: u32,
    /// `LogonId`.
    pub logon_id: Luid,
    /// `Token`, if one was created.
    pub token: Option<NativeHandle>,
}

/// The native primitives of an LSA logon.
pub trait LsaApi {
    /// `LsaConnectUntrusted`.
    ///
    /// # Errors
    /// The failing status.
    fn connect_untrusted(&self) -> Result<NativeHandle, NtStatus>;

    /// `LsaLookupAuthenticationPackage`.
    ///
    /// # Errors
    /// The failing status.
    fn lookup_authentication_package(
        &self,
        connection: NativeHandle,
        package: &LsaName,
    ) -> Result<u32, NtStatus>;

    /// `AllocateLocallyUniqueId`.
    ///
    /// # Errors
    /// The Win32 error code.
    fn allocate_locally_unique_id(&self) -> Result<Luid, u32>;

    /// `LsaLogonUser`. The buffer is mutable so the implementation can bind
    /// its pointer slots (see [`LogonBuffer::bind_segment_pointers`]).
    fn logon_user(&self, request: &LogonRequest<'_>, buffer: &mut LogonBuffer) -> RawLogonOutput;

    /// Gives `resource` back to the system.
    ///
    /// # Errors
    /// See [`ReleaseError`].
    fn release(&self, resource: NativeResource) -> Result<(), ReleaseError>;

    /// `LsaNtStatusToWinError`.
    fn nt_status_to_win_error(&self, status: NtStatus) -> u32;
}

impl<A: LsaApi + ?Sized> LsaApi for &A {
    #[inline]
    fn connect_untrusted(&self) -> Result<NativeHandle, NtStatus> {
        (**self).connect_untrusted()
    }

    #[inline]
    fn lookup_authentication_package(
        &self,
        connection: NativeHandle,
        package: &LsaName,
    ) -> Result<u32, NtStatus> {
        (**self).lookup_authentication_package(connection, package)
    }

    #[inline]
    fn allocate_locally_unique_id(&self) -> Result<Luid, u32> {
        (**self).allocate_locally_unique_id()
    }

    #[inline]
    fn logon_user(&self, request: &LogonRequest<'_>, buffer: &mut LogonBuffer) -> RawLogonOutput {
        (**self).logon_user(request, buffer)
    }

    #[inline]
    fn release(&self, resource: NativeResource) -> Result<(), ReleaseError> {
        (**self).release(resource)
    }

    #[inline]
    fn nt_status_to_win_error(&self, status: NtStatus) -> u32 {
        (**self).nt_status_to_win_error(status)
    }
}

/// Owns one [`NativeResource`] and releases it when dropped, exactly once.
///
/// Guards declared later are dropped first, which gives reverse-order
/// teardown for free.
pub struct Scoped<'a, A: LsaApi + ?Sized> {
    api: &'a A,
    resource: Option<NativeResource>,
}

impl<'a, A: LsaApi + ?Sized> Scoped<'a, A> {
    /// Takes ownership of `resource`.
    #[inline]
    #[must_use]
    pub const fn new(api: &'a A, resource: NativeResource) -> Self {
        Self {
            api,
            resource: Some(resource),
        }
    }

    /// The guarded resource, `None` once released.
    #[inline]
    #[must_use]
    pub const fn resource(&self) -> Option<NativeResource> {
        self.resource
    }

    /// Releases now and reports the outcome instead of logging it.
    ///
    /// # Errors
    /// See [`ReleaseError`].
    #[inline]
    pub fn release(mut self) -> Result<(), ReleaseError> {
        self.resource
            .take()
            .map_or(Ok(()), |resource| self.api.release(resource))
    }
}

impl<A: LsaApi + ?Sized> Debug for Scoped<'_, A> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(Scoped))
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl<A: LsaApi + ?Sized> Drop for Scoped<'_, A> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take()
            && let Err(err) = self.api.release(resource)
        {
            warn!(%resource, %err, "failed to release native resource");
        }
    }
}
