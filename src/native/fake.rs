//! Scripted [`LsaApi`] that records every acquisition and release.

use core::cell::{Cell, RefCell};

use super::{
    LogonRequest, LsaApi, LsaName, Luid, NativeHandle, NativeResource, RawLogonOutput,
    ReleaseError, SecurityLogonType, SourceTag,
};
use crate::buffer::Field;
use crate::{LogonBuffer, NtStatus, OpenStep};

/// What the fake decoded from the submitted buffer and request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Submission {
    pub domain: String,
    pub account: String,
    pub password: String,
    pub message_type: i32,
    pub origin: String,
    pub logon_type: SecurityLogonType,
    pub package_id: u32,
    pub source_tag: SourceTag,
    pub source_id: Luid,
    pub buffer_len: usize,
    /// Buffers alive on this thread while the logon ran, this one included.
    pub live_buffers: usize,
}

#[derive(Debug)]
pub(crate) struct FakeLsa {
    fault: Option<OpenStep>,
    status: NtStatus,
    sub_status: NtStatus,
    token: bool,
    next_handle: Cell<usize>,
    acquired: RefCell<Vec<NativeResource>>,
    released: RefCell<Vec<NativeResource>>,
    logon_calls: Cell<usize>,
    last_submission: RefCell<Option<Submission>>,
}

pub(crate) const PACKAGE_ID: u32 = 7;
pub(crate) const SOURCE_ID: Luid = Luid {
    low_part: 0x1234,
    high_part: 0,
};

impl FakeLsa {
    /// Accepts every logon and hands back a profile buffer and a token.
    pub(crate) fn accepting() -> Self {
        Self::returning(NtStatus::SUCCESS, NtStatus::SUCCESS).with_token()
    }

    /// Answers every logon with `status`/`sub_status` and a profile buffer.
    pub(crate) fn returning(status: NtStatus, sub_status: NtStatus) -> Self {
        Self {
            fault: None,
            status,
            sub_status,
            token: false,
            next_handle: Cell::new(0x100),
            acquired: RefCell::new(Vec::new()),
            released: RefCell::new(Vec::new()),
            logon_calls: Cell::new(0),
            last_submission: RefCell::new(None),
        }
    }

    pub(crate) fn with_token(mut self) -> Self {
        self.token = true;
        self
    }

    /// Fails the native call behind `step`.
    pub(crate) fn failing_at(mut self, step: OpenStep) -> Self {
        self.fault = Some(step);
        self
    }

    pub(crate) fn acquired(&self) -> Vec<NativeResource> {
        self.acquired.borrow().clone()
    }

    pub(crate) fn released(&self) -> Vec<NativeResource> {
        self.released.borrow().clone()
    }

    pub(crate) fn leaked(&self) -> Vec<NativeResource> {
        let released = self.released.borrow();
        self.acquired
            .borrow()
            .iter()
            .filter(|resource| !released.contains(resource))
            .copied()
            .collect()
    }

    pub(crate) fn double_released(&self) -> Vec<NativeResource> {
        let released = self.released.borrow();
        released
            .iter()
            .enumerate()
            .filter(|(i, resource)| released.iter().skip(i + 1).any(|other| other == *resource))
            .map(|(_, resource)| *resource)
            .collect()
    }

    pub(crate) fn logon_calls(&self) -> usize {
        self.logon_calls.get()
    }

    pub(crate) fn last_submission(&self) -> Option<Submission> {
        self.last_submission.borrow().clone()
    }

    fn acquire(&self, wrap: fn(NativeHandle) -> NativeResource) -> NativeHandle {
        let value = self.next_handle.get();
        self.next_handle.set(value + 0x10);
        let handle = NativeHandle::from_value(value);
        self.acquired.borrow_mut().push(wrap(handle));
        handle
    }

    fn faulted(&self, step: OpenStep) -> bool {
        self.fault == Some(step)
    }
}

fn decode(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .filter_map(|pair| pair.try_into().ok().map(u16::from_ne_bytes))
        .collect();
    String::from_utf16_lossy(&units)
}

impl LsaApi for FakeLsa {
    fn connect_untrusted(&self) -> Result<NativeHandle, NtStatus> {
        if self.faulted(OpenStep::Connect) {
            return Err(NtStatus::from_bits(0xC000_0022));
        }
        Ok(self.acquire(NativeResource::LsaConnection))
    }

    fn lookup_authentication_package(
        &self,
        connection: NativeHandle,
        package: &LsaName,
    ) -> Result<u32, NtStatus> {
        assert!(
            self.acquired()
                .contains(&NativeResource::LsaConnection(connection)),
            "lookup on unknown connection"
        );
        if self.faulted(OpenStep::LookupPackage) || package.as_str() != "Negotiate" {
            return Err(NtStatus::from_bits(0xC000_00FE));
        }
        Ok(PACKAGE_ID)
    }

    fn allocate_locally_unique_id(&self) -> Result<Luid, u32> {
        if self.faulted(OpenStep::SourceIdentifier) {
            return Err(8);
        }
        Ok(SOURCE_ID)
    }

    fn logon_user(&self, request: &LogonRequest<'_>, buffer: &mut LogonBuffer) -> RawLogonOutput {
        self.logon_calls.set(self.logon_calls.get() + 1);
        *self.last_submission.borrow_mut() = Some(Submission {
            domain: decode(buffer.segment_bytes(Field::Domain)),
            account: decode(buffer.segment_bytes(Field::Account)),
            password: decode(buffer.segment_bytes(Field::Password)),
            message_type: buffer.recorded_message_type(),
            origin: request.origin.as_str().to_owned(),
            logon_type: request.logon_type,
            package_id: request.package_id,
            source_tag: request.source_tag,
            source_id: request.source_id,
            buffer_len: buffer.len(),
            live_buffers: crate::buffer::live_buffers(),
        });
        let profile = self.acquire(NativeResource::ReturnBuffer);
        let token = self.token.then(|| self.acquire(NativeResource::Token));
        RawLogonOutput {
            status: self.status,
            sub_status: self.sub_status,
            profile: Some(profile),
            profile_length: 64,
            logon_id: Luid {
                low_part: 0x9999,
                high_part: 0,
            },
            token,
        }
    }

    fn release(&self, resource: NativeResource) -> Result<(), ReleaseError> {
        self.released.borrow_mut().push(resource);
        Ok(())
    }

    fn nt_status_to_win_error(&self, status: NtStatus) -> u32 {
        status.bits() & 0xFFFF
    }
}
