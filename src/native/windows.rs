use core::ffi::c_void;
use core::mem::MaybeUninit;
use core::ptr::{null, null_mut};

use windows_sys::Win32::{
    Foundation::{CloseHandle, GetLastError, HANDLE, LUID},
    Security::{
        AllocateLocallyUniqueId, QUOTA_LIMITS, TOKEN_SOURCE,
        Authentication::Identity::{
            LSA_STRING, LsaConnectUntrusted, LsaDeregisterLogonProcess, LsaFreeReturnBuffer,
            LsaLogonUser, LsaLookupAuthenticationPackage, LsaNtStatusToWinError,
        },
    },
};

use super::{
    LogonRequest, LsaApi, LsaName, Luid, NativeHandle, NativeResource, RawLogonOutput,
    ReleaseError,
};
use crate::{LogonBuffer, NtStatus};

/// [`LsaApi`] over `secur32.dll` and `advapi32.dll`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLsa;

impl LsaName {
    /// Borrowed `LSA_STRING` view; valid while `self` lives.
    fn as_lsa_string(&self) -> LSA_STRING {
        LSA_STRING {
            Length: self.length(),
            MaximumLength: self.maximum_length(),
            // The subsystem only reads through this pointer.
            Buffer: self.as_ptr().cast_mut(),
        }
    }
}

impl From<LUID> for Luid {
    #[inline]
    fn from(luid: LUID) -> Self {
        Self {
            low_part: luid.LowPart,
            high_part: luid.HighPart,
        }
    }
}

impl From<Luid> for LUID {
    #[inline]
    fn from(luid: Luid) -> Self {
        Self {
            LowPart: luid.low_part,
            HighPart: luid.high_part,
        }
    }
}

impl LsaApi for SystemLsa {
    fn connect_untrusted(&self) -> Result<NativeHandle, NtStatus> {
        let mut handle: HANDLE = null_mut();
        // SAFETY: FFI call; the out pointer is valid. We check the status immediately.
        let status = NtStatus::new(unsafe { LsaConnectUntrusted(&raw mut handle) });
        status.ok()?;
        // A successful connect never yields a null handle.
        NativeHandle::new(handle).ok_or(status)
    }

    fn lookup_authentication_package(
        &self,
        connection: NativeHandle,
        package: &LsaName,
    ) -> Result<u32, NtStatus> {
        let name = package.as_lsa_string();
        let mut package_id = 0u32;
        // SAFETY: `connection` comes from `LsaConnectUntrusted`, `name` borrows
        // `package` which outlives the call, the out pointer is valid.
        let status = NtStatus::new(unsafe {
            LsaLookupAuthenticationPackage(connection.as_raw(), &raw const name, &raw mut package_id)
        });
        status.ok().map(|_| package_id)
    }

    fn allocate_locally_unique_id(&self) -> Result<Luid, u32> {
        let mut luid_mu: MaybeUninit<LUID> = MaybeUninit::uninit();
        // SAFETY: FFI call; the out pointer is valid. We check the return value immediately.
        let ok = unsafe { AllocateLocallyUniqueId(luid_mu.as_mut_ptr()) };
        if ok == 0 {
            // SAFETY: GetLastError can be called immediately after a failing FFI call.
            return Err(unsafe { GetLastError() });
        }
        // SAFETY: AllocateLocallyUniqueId reported success; the LUID is initialized.
        Ok(unsafe { luid_mu.assume_init() }.into())
    }

    fn logon_user(&self, request: &LogonRequest<'_>, buffer: &mut LogonBuffer) -> RawLogonOutput {
        let origin = request.origin.as_lsa_string();
        let source = TOKEN_SOURCE {
            SourceName: request.source_tag.bytes().map(|b| b as _),
            SourceIdentifier: request.source_id.into(),
        };
        let authentication_information = buffer.bind_segment_pointers().cast::<c_void>();

        let mut profile: *mut c_void = null_mut();
        let mut profile_length = 0u32;
        let mut logon_id_mu: MaybeUninit<LUID> = MaybeUninit::zeroed();
        let mut token: HANDLE = null_mut();
        let mut quotas_mu: MaybeUninit<QUOTA_LIMITS> = MaybeUninit::zeroed();
        let mut sub_status = 0i32;

        // SAFETY:
        // - `connection` comes from `LsaConnectUntrusted` and is still registered.
        // - `origin` and `source` live on this frame for the whole call.
        // - `authentication_information` points to `buffer.len_u32()` bytes whose
        //   pointer slots were just bound to this allocation.
        // - Every out pointer is valid for writes.
        let status = NtStatus::new(unsafe {
            LsaLogonUser(
                request.connection.as_raw(),
                &raw const origin,
                request.logon_type.into(),
                request.package_id,
                authentication_information,
                buffer.len_u32(),
                null(),
                &raw const source,
                &raw mut profile,
                &raw mut profile_length,
                logon_id_mu.as_mut_ptr(),
                &raw mut token,
                quotas_mu.as_mut_ptr(),
                &raw mut sub_status,
            )
        });

        // SAFETY: zero-initialized above and possibly overwritten by the call.
        let logon_id = unsafe { logon_id_mu.assume_init() };
        RawLogonOutput {
            status,
            sub_status: NtStatus::new(sub_status),
            profile: NativeHandle::new(profile),
            profile_length,
            logon_id: logon_id.into(),
            token: NativeHandle::new(token),
        }
    }

    fn release(&self, resource: NativeResource) -> Result<(), ReleaseError> {
        match resource {
            NativeResource::LsaConnection(handle) => {
                // SAFETY: the handle comes from `LsaConnectUntrusted` and is released once.
                let status = NtStatus::new(unsafe { LsaDeregisterLogonProcess(handle.as_raw()) });
                status.ok().map(|_| ()).map_err(ReleaseError::Status)
            }
            NativeResource::ReturnBuffer(handle) => {
                // SAFETY: the buffer was allocated by the LSA and is freed once.
                let status = NtStatus::new(unsafe { LsaFreeReturnBuffer(handle.as_raw()) });
                status.ok().map(|_| ()).map_err(ReleaseError::Status)
            }
            NativeResource::Token(handle) => {
                // SAFETY: the token handle comes from `LsaLogonUser` and is closed once.
                if unsafe { CloseHandle(handle.as_raw()) } == 0 {
                    // SAFETY: GetLastError can be called immediately after a failing FFI call.
                    return Err(ReleaseError::Win32(unsafe { GetLastError() }));
                }
                Ok(())
            }
        }
    }

    fn nt_status_to_win_error(&self, status: NtStatus) -> u32 {
        // SAFETY: pure translation of a status value.
        unsafe { LsaNtStatusToWinError(status.raw()) }
    }
}
