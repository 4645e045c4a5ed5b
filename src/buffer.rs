//! Serialization of the `KERB_INTERACTIVE_LOGON` submit buffer.
//!
//! The buffer is one contiguous allocation: a fixed `repr(C)` header followed
//! by the domain, account and password as UTF-16 code units, back to back with
//! no padding and no terminators.
//!
//! ```text
//! +--------------------------+--------+---------+----------+
//! | InteractiveLogonHeader   | domain | account | password |
//! +--------------------------+--------+---------+----------+
//! 0                          HEADER_SIZE                    total_size
//! ```
//!
//! Offsets are computed up front into a [`BufferLayout`] before any byte is
//! written. The header's pointer slots hold self-relative offsets until
//! [`LogonBuffer::bind_segment_pointers`] rebases them onto the allocation,
//! right before submission. The allocation is zeroed before it is freed since
//! it holds the plaintext password.

use core::alloc::Layout;
use core::fmt::{self, Debug};
use core::mem::{align_of, offset_of, size_of};
use core::ptr::NonNull;
use core::slice;
use std::alloc;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;
use zeroize::Zeroize;

/// Layout-compatible mirror of `UNICODE_STRING`, with the pointer held as `usize`.
#[repr(C)]
#[allow(dead_code, reason = "Only read through `offset_of!`")]
pub(crate) struct CountedWideString {
    length: u16,
    maximum_length: u16,
    buffer: usize,
}

/// Layout-compatible mirror of `KERB_INTERACTIVE_LOGON`.
#[repr(C)]
#[allow(dead_code, reason = "Only read through `offset_of!`")]
pub(crate) struct InteractiveLogonHeader {
    message_type: i32,
    logon_domain_name: CountedWideString,
    user_name: CountedWideString,
    password: CountedWideString,
}

/// Size in bytes of the fixed header preceding the strings.
pub const HEADER_SIZE: usize = size_of::<InteractiveLogonHeader>();

const HEADER_ALIGN: usize = align_of::<InteractiveLogonHeader>();

/// Bytes per native wide character.
const WIDE_CHAR_SIZE: usize = size_of::<u16>();

/// `KERB_LOGON_SUBMIT_TYPE`, the discriminant at the start of a Kerberos/Negotiate
/// submit buffer. `MSV1_0` uses the same value for its interactive logon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum LogonSubmitType {
    /// Username/password logon. The only type this crate submits.
    InteractiveLogon = 2,
    /// Smart card logon.
    SmartCardLogon = 6,
    /// Workstation unlock.
    WorkstationUnlockLogon = 7,
    /// Smart card unlock.
    SmartCardUnlockLogon = 8,
    /// Proxy logon.
    ProxyLogon = 9,
    /// Ticket logon.
    TicketLogon = 10,
    /// Ticket unlock.
    TicketUnlockLogon = 11,
    /// Service-for-user logon.
    S4ULogon = 12,
    /// Certificate logon.
    CertificateLogon = 13,
    /// Certificate service-for-user logon.
    CertificateS4ULogon = 14,
    /// Certificate unlock.
    CertificateUnlockLogon = 15,
}

/// One of the three strings carried by the buffer, in layout order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// `LogonDomainName`.
    Domain,
    /// `UserName`.
    Account,
    /// `Password`.
    Password,
}

impl Field {
    /// All fields, in the order they follow the header.
    pub const ALL: [Self; 3] = [Self::Domain, Self::Account, Self::Password];

    const fn header_offset(self) -> usize {
        match self {
            Self::Domain => offset_of!(InteractiveLogonHeader, logon_domain_name),
            Self::Account => offset_of!(InteractiveLogonHeader, user_name),
            Self::Password => offset_of!(InteractiveLogonHeader, password),
        }
    }
}

impl fmt::Display for Field {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain => f.write_str("domain"),
            Self::Account => f.write_str("account"),
            Self::Password => f.write_str("password"),
        }
    }
}

/// Errors raised while sizing the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The total size is not representable as an allocation or as the
    /// 32-bit length argument of the logon call.
    #[error("Logon buffer size overflows the addressable allocation limit")]
    AllocationOverflow,

    /// A string does not fit the 16-bit counted-string length.
    #[error("{field} too long for a counted string: {bytes} bytes")]
    FieldTooLong {
        /// The offending field.
        field: Field,
        /// Its encoded length in bytes.
        bytes: usize,
    },
}

/// Position of one string inside the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentDescriptor {
    /// Offset from the start of the buffer.
    pub offset: usize,
    /// Encoded length in bytes, terminator excluded.
    pub length: u16,
    /// Always `length + 1`.
    pub maximum_length: u16,
}

impl SegmentDescriptor {
    /// Byte range covered by the segment.
    #[inline]
    #[must_use]
    pub const fn range(&self) -> core::ops::Range<usize> {
        self.offset..self.offset + self.length as usize
    }
}

/// Offsets and total size, computed before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferLayout {
    /// Header plus the three encoded strings.
    pub total_size: usize,
    /// Domain segment, right after the header.
    pub domain: SegmentDescriptor,
    /// Account segment, right after the domain.
    pub account: SegmentDescriptor,
    /// Password segment, right after the account.
    pub password: SegmentDescriptor,
}

impl BufferLayout {
    /// Computes the layout for strings of the given encoded byte lengths.
    ///
    /// # Errors
    /// [`BufferError::AllocationOverflow`] when the total is not representable,
    /// [`BufferError::FieldTooLong`] when a length does not fit a counted string.
    #[inline]
    pub fn from_byte_lengths(
        domain: usize,
        account: usize,
        password: usize,
    ) -> Result<Self, BufferError> {
        let total_size = HEADER_SIZE
            .checked_add(domain)
            .and_then(|size| size.checked_add(account))
            .and_then(|size| size.checked_add(password))
            .ok_or(BufferError::AllocationOverflow)?;
        if u32::try_from(total_size).is_err()
            || Layout::from_size_align(total_size, HEADER_ALIGN).is_err()
        {
            return Err(BufferError::AllocationOverflow);
        }

        let domain = Self::descriptor(Field::Domain, HEADER_SIZE, domain)?;
        let account = Self::descriptor(Field::Account, domain.range().end, account)?;
        let password = Self::descriptor(Field::Password, account.range().end, password)?;
        Ok(Self {
            total_size,
            domain,
            account,
            password,
        })
    }

    /// Computes the layout for the three strings once encoded as UTF-16.
    ///
    /// # Errors
    /// See [`BufferLayout::from_byte_lengths`].
    #[inline]
    pub fn for_strings(
        domain: Option<&str>,
        account: &str,
        password: &str,
    ) -> Result<Self, BufferError> {
        Self::from_byte_lengths(
            wide_byte_len(domain.unwrap_or_default())?,
            wide_byte_len(account)?,
            wide_byte_len(password)?,
        )
    }

    /// The descriptor of `field`.
    #[inline]
    #[must_use]
    pub const fn segment(&self, field: Field) -> SegmentDescriptor {
        match field {
            Field::Domain => self.domain,
            Field::Account => self.account,
            Field::Password => self.password,
        }
    }

    fn descriptor(field: Field, offset: usize, bytes: usize) -> Result<SegmentDescriptor, BufferError> {
        // `maximum_length` reserves one more slot than `length`.
        let too_long = BufferError::FieldTooLong { field, bytes };
        let length = u16::try_from(bytes).map_err(|_| too_long)?;
        let maximum_length = length.checked_add(1).ok_or(too_long)?;
        Ok(SegmentDescriptor {
            offset,
            length,
            maximum_length,
        })
    }

    fn allocation(&self) -> Result<Layout, BufferError> {
        Layout::from_size_align(self.total_size, HEADER_ALIGN)
            .map_err(|_| BufferError::AllocationOverflow)
    }
}

fn wide_byte_len(s: &str) -> Result<usize, BufferError> {
    s.encode_utf16()
        .count()
        .checked_mul(WIDE_CHAR_SIZE)
        .ok_or(BufferError::AllocationOverflow)
}

/// A counted string as currently recorded in the header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordedString {
    /// `Length`.
    pub length: u16,
    /// `MaximumLength`.
    pub maximum_length: u16,
    /// `Buffer`: a self-relative offset, or an address once bound.
    pub buffer: usize,
}

/// Owned, zeroed-on-drop `KERB_INTERACTIVE_LOGON` submit buffer.
pub struct LogonBuffer {
    ptr: NonNull<u8>,
    allocation: Layout,
    layout: BufferLayout,
}

impl LogonBuffer {
    /// Encodes the three strings into a new buffer.
    ///
    /// An absent domain contributes a zero-length segment.
    ///
    /// # Errors
    /// See [`BufferLayout::from_byte_lengths`].
    #[inline]
    pub fn build(domain: Option<&str>, account: &str, password: &str) -> Result<Self, BufferError> {
        let layout = BufferLayout::for_strings(domain, account, password)?;
        let mut buffer = Self::alloc(layout)?;
        buffer.write_wide(layout.domain, domain.unwrap_or_default());
        buffer.write_wide(layout.account, account);
        buffer.write_wide(layout.password, password);
        buffer.write_header();
        Ok(buffer)
    }

    /// Zero-initialized allocation matching `layout`.
    fn alloc(layout: BufferLayout) -> Result<Self, BufferError> {
        let allocation = layout.allocation()?;

        // SAFETY: `allocation` has a non-zero size, it is at least `HEADER_SIZE`.
        let mem_ptr = unsafe { alloc::alloc_zeroed(allocation) };
        let Some(ptr) = NonNull::new(mem_ptr) else {
            alloc::handle_alloc_error(allocation);
        };
        #[cfg(test)]
        LIVE_BUFFERS.with(|live| live.set(live.get() + 1));
        Ok(Self {
            ptr,
            allocation,
            layout,
        })
    }

    /// The offsets computed before the buffer was written.
    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Exact size handed to the logon call.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.layout.total_size
    }

    /// Always `false`: the header is never empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Exact size as the 32-bit argument of the logon call.
    #[inline]
    #[must_use]
    pub fn len_u32(&self) -> u32 {
        // Checked when the layout was computed.
        u32::try_from(self.layout.total_size).unwrap_or(u32::MAX)
    }

    /// Start of the allocation.
    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// The whole buffer.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        // SAFETY: `ptr` owns `total_size` initialized bytes for the lifetime of `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.layout.total_size) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` owns `total_size` initialized bytes and `&mut self` is unique.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.total_size) }
    }

    /// The encoded bytes of `field`.
    #[inline]
    #[must_use]
    pub fn segment_bytes(&self, field: Field) -> &[u8] {
        self.as_bytes()
            .get(self.layout.segment(field).range())
            .unwrap_or_default()
    }

    /// The discriminant recorded at the start of the header.
    #[inline]
    #[must_use]
    pub fn recorded_message_type(&self) -> i32 {
        i32::from_ne_bytes(self.read(offset_of!(InteractiveLogonHeader, message_type)))
    }

    /// The counted string recorded in the header for `field`.
    #[inline]
    #[must_use]
    pub fn recorded_string(&self, field: Field) -> RecordedString {
        let base = field.header_offset();
        RecordedString {
            length: u16::from_ne_bytes(self.read(base + offset_of!(CountedWideString, length))),
            maximum_length: u16::from_ne_bytes(
                self.read(base + offset_of!(CountedWideString, maximum_length)),
            ),
            buffer: usize::from_ne_bytes(self.read(base + offset_of!(CountedWideString, buffer))),
        }
    }

    /// Rewrites each header pointer slot as `base address + offset` so the
    /// buffer can be handed to the native call. Returns the base address.
    ///
    /// Idempotent; the logical [`BufferLayout`] is unaffected.
    #[inline]
    pub fn bind_segment_pointers(&mut self) -> *const u8 {
        let base = self.ptr.as_ptr().addr();
        for field in Field::ALL {
            let offset = self.layout.segment(field).offset;
            self.write(
                field.header_offset() + offset_of!(CountedWideString, buffer),
                &base.wrapping_add(offset).to_ne_bytes(),
            );
        }
        self.as_ptr()
    }

    fn write_header(&mut self) {
        let message_type: i32 = LogonSubmitType::InteractiveLogon.into();
        self.write(
            offset_of!(InteractiveLogonHeader, message_type),
            &message_type.to_ne_bytes(),
        );
        for field in Field::ALL {
            let segment = self.layout.segment(field);
            let base = field.header_offset();
            self.write(
                base + offset_of!(CountedWideString, length),
                &segment.length.to_ne_bytes(),
            );
            self.write(
                base + offset_of!(CountedWideString, maximum_length),
                &segment.maximum_length.to_ne_bytes(),
            );
            self.write(
                base + offset_of!(CountedWideString, buffer),
                &segment.offset.to_ne_bytes(),
            );
        }
    }

    fn write_wide(&mut self, segment: SegmentDescriptor, s: &str) {
        if let Some(dst) = self.as_bytes_mut().get_mut(segment.range()) {
            for (chunk, unit) in dst.chunks_exact_mut(WIDE_CHAR_SIZE).zip(s.encode_utf16()) {
                chunk.copy_from_slice(&unit.to_ne_bytes());
            }
        }
    }

    fn write(&mut self, at: usize, bytes: &[u8]) {
        if let Some(dst) = self.as_bytes_mut().get_mut(at..at + bytes.len()) {
            dst.copy_from_slice(bytes);
        }
    }

    fn read<const N: usize>(&self, at: usize) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(src) = self.as_bytes().get(at..at + N) {
            out.copy_from_slice(src);
        }
        out
    }
}

impl Debug for LogonBuffer {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(LogonBuffer))
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl LogonBuffer {
    /// Overwrites every byte, header and password included, with zeros.
    pub(crate) fn wipe(&mut self) {
        self.as_bytes_mut().zeroize();
    }
}

impl Drop for LogonBuffer {
    fn drop(&mut self) {
        self.wipe();
        #[cfg(test)]
        LIVE_BUFFERS.with(|live| live.set(live.get() - 1));
        // SAFETY:
        // - `ptr` was allocated by `alloc::alloc_zeroed` with `self.allocation`.
        // - `Drop` runs once, so the memory is freed exactly once.
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), self.allocation);
        }
    }
}

#[cfg(test)]
thread_local! {
    static LIVE_BUFFERS: core::cell::Cell<usize> = const { core::cell::Cell::new(0) };
}

/// Buffers allocated and not yet dropped on this thread.
#[cfg(test)]
pub(crate) fn live_buffers() -> usize {
    LIVE_BUFFERS.with(core::cell::Cell::get)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in test")]
#[allow(clippy::indexing_slicing, reason = "Indexing is not an issue in test")]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn wide(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_ne_bytes).collect()
    }

    proptest! {
        #[test]
        fn segments_are_contiguous(domain in proptest::option::of(".{0,16}"), account in ".{0,32}", password in ".{0,64}") {
            let buffer = LogonBuffer::build(domain.as_deref(), &account, &password).unwrap();
            let layout = *buffer.layout();
            let domain_bytes = wide(domain.as_deref().unwrap_or_default());
            let account_bytes = wide(&account);
            let password_bytes = wide(&password);

            prop_assert_eq!(
                buffer.len(),
                HEADER_SIZE + domain_bytes.len() + account_bytes.len() + password_bytes.len()
            );
            prop_assert_eq!(layout.domain.offset, HEADER_SIZE);
            prop_assert_eq!(layout.account.offset, layout.domain.range().end);
            prop_assert_eq!(layout.password.offset, layout.account.range().end);
            prop_assert_eq!(layout.password.range().end, buffer.len());

            prop_assert_eq!(buffer.segment_bytes(Field::Domain), domain_bytes.as_slice());
            prop_assert_eq!(buffer.segment_bytes(Field::Account), account_bytes.as_slice());
            prop_assert_eq!(buffer.segment_bytes(Field::Password), password_bytes.as_slice());

            for field in Field::ALL {
                let segment = layout.segment(field);
                let recorded = buffer.recorded_string(field);
                prop_assert_eq!(recorded.length, segment.length);
                prop_assert_eq!(recorded.maximum_length, segment.length + 1);
                prop_assert_eq!(recorded.buffer, segment.offset);
            }
        }

        #[test]
        fn layout_is_deterministic(account in ".{0,32}", password in ".{0,32}") {
            let first = LogonBuffer::build(Some("CONTOSO"), &account, &password).unwrap();
            let second = LogonBuffer::build(Some("CONTOSO"), &account, &password).unwrap();
            prop_assert_eq!(first.layout(), second.layout());
            prop_assert_eq!(first.as_bytes(), second.as_bytes());
        }
    }

    #[test]
    fn header_carries_interactive_discriminant() {
        let buffer = LogonBuffer::build(Some("CONTOSO"), "alice", "hunter2").unwrap();
        assert_eq!(
            LogonSubmitType::try_from(buffer.recorded_message_type()).unwrap(),
            LogonSubmitType::InteractiveLogon
        );
        assert_eq!(buffer.layout().domain.length, 14);
        assert_eq!(buffer.layout().account.length, 10);
        assert_eq!(buffer.layout().password.length, 14);
    }

    #[test]
    fn header_matches_c_layout() {
        let pointer = size_of::<usize>();
        // i32 discriminant padded to pointer alignment, then three
        // {u16, u16, pointer} strings.
        let string = (4usize).next_multiple_of(pointer) + pointer;
        assert_eq!(HEADER_SIZE, 4usize.next_multiple_of(pointer) + 3 * string);
    }

    #[test]
    fn absent_domain_is_empty_segment() {
        let buffer = LogonBuffer::build(None, "alice@contoso.com", "pw").unwrap();
        let domain = buffer.layout().domain;
        assert_eq!(domain.offset, HEADER_SIZE);
        assert_eq!(domain.length, 0);
        assert_eq!(domain.maximum_length, 1);
        assert_eq!(buffer.layout().account.offset, HEADER_SIZE);
    }

    #[test]
    fn surrogate_pairs_count_twice() {
        let layout = BufferLayout::for_strings(None, "\u{1F600}", "").unwrap();
        assert_eq!(layout.account.length, 4);
    }

    #[test]
    fn binding_rebases_pointer_slots_only() {
        let mut buffer = LogonBuffer::build(Some("D"), "u", "p").unwrap();
        let before = *buffer.layout();
        let base = buffer.bind_segment_pointers().addr();
        assert_eq!(*buffer.layout(), before);
        for field in Field::ALL {
            assert_eq!(
                buffer.recorded_string(field).buffer,
                base + before.segment(field).offset
            );
        }
        assert_eq!(buffer.segment_bytes(Field::Password), wide("p").as_slice());
    }

    #[test]
    fn oversized_inputs_are_rejected() {
        assert_eq!(
            BufferLayout::from_byte_lengths(usize::MAX - 8, 16, 0),
            Err(BufferError::AllocationOverflow)
        );
        assert_eq!(
            BufferLayout::from_byte_lengths(0, 0, usize::MAX),
            Err(BufferError::AllocationOverflow)
        );
        assert_eq!(
            BufferLayout::from_byte_lengths(0, 0, 65_536),
            Err(BufferError::FieldTooLong {
                field: Field::Password,
                bytes: 65_536
            })
        );
        // `length + 1` must still fit.
        assert_eq!(
            BufferLayout::from_byte_lengths(0, 65_535, 0),
            Err(BufferError::FieldTooLong {
                field: Field::Account,
                bytes: 65_535
            })
        );
        let password = "x".repeat(40_000);
        assert!(matches!(
            LogonBuffer::build(None, "alice", &password),
            Err(BufferError::FieldTooLong {
                field: Field::Password,
                ..
            })
        ));
    }

    #[test]
    fn wipe_clears_every_byte() {
        let mut buffer = LogonBuffer::build(Some("CONTOSO"), "alice", "hunter2").unwrap();
        assert_eq!(buffer.segment_bytes(Field::Password), wide("hunter2").as_slice());
        buffer.wipe();
        assert!(buffer.segment_bytes(Field::Password).iter().all(|&b| b == 0));
        assert!(buffer.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn drop_releases_the_allocation() {
        let before = live_buffers();
        let buffer = LogonBuffer::build(None, "alice", "hunter2").unwrap();
        assert_eq!(live_buffers(), before + 1);
        drop(buffer);
        assert_eq!(live_buffers(), before);
        assert!(LogonBuffer::build(None, "alice", &"x".repeat(40_000)).is_err());
        assert_eq!(live_buffers(), before);
    }

    #[test]
    fn debug_hides_contents() {
        let buffer = LogonBuffer::build(None, "alice", "s3cret").unwrap();
        let rendered = format!("{buffer:?}");
        assert!(!rendered.contains("s3cret"));
    }

    #[cfg(windows)]
    mod windows {
        use super::super::*;
        use windows_sys::Win32::Security::Authentication::Identity::{
            KERB_INTERACTIVE_LOGON, KerbInteractiveLogon,
        };

        #[test]
        fn header_matches_windows_struct() {
            assert_eq!(HEADER_SIZE, size_of::<KERB_INTERACTIVE_LOGON>());
            assert_eq!(HEADER_ALIGN, align_of::<KERB_INTERACTIVE_LOGON>());
            assert_eq!(
                offset_of!(InteractiveLogonHeader, password),
                offset_of!(KERB_INTERACTIVE_LOGON, Password)
            );
            assert_eq!(
                i32::from(LogonSubmitType::InteractiveLogon),
                KerbInteractiveLogon
            );
        }
    }
}
