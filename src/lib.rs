//! # Credential validation through the Windows Local Security Authority
//!
//! Answers "does this user name and password log on?" by submitting a
//! network logon to the LSA, without creating an interactive session.
//! The crate provides:
//! - [`CredentialValidationEngine`]: parse the identity, build the
//!   `KERB_INTERACTIVE_LOGON` submit buffer, open an untrusted LSA
//!   connection, call `LsaLogonUser` and interpret the status pair.
//! - [`Identity`]: `DOMAIN\account` or principal-name parsing (re-exported
//!   from the `no_std` parsing crate).
//! - [`LogonBuffer`]: the self-relative submit buffer, zeroed on drop.
//! - [`interpret()`]: the status precedence rules, as a pure function.
//! - [`ValidatorConfig`] and [`ConfiguredValidator`]: strategy selection
//!   between the LSA engine and (Windows) `LogonUserW`.
//!
//! ## Overview
//! - **Fails closed**: anything that prevents a definite answer is an `Err`;
//!   rejected credentials are `Ok(false)`.
//! - **Scoped resources**: every native handle is owned by a [`Scoped`] guard
//!   and released exactly once on every path.
//! - **Portable core**: everything but the FFI bindings builds and is tested
//!   on any host through the [`LsaApi`] trait.
//!
//! ## Examples
//! ### Parse an identity
//! ```rust
//! use win_logon_validator::Identity;
//!
//! let identity = Identity::parse("CONTOSO\\alice").unwrap();
//! assert_eq!(identity.domain, Some("CONTOSO"));
//! assert_eq!(identity.account, "alice");
//! ```
//!
//! ### Interpret a status pair
//! ```rust
//! use win_logon_validator::{KnownStatus, NtStatus, interpret};
//!
//! let verdict = interpret(NtStatus::ACCOUNT_RESTRICTION, KnownStatus::PasswordExpired.into());
//! assert!(!verdict.is_valid);
//! assert_eq!(verdict.operative_status, Some(KnownStatus::PasswordExpired.into()));
//! ```
//!
//! ### (Windows) Validate credentials
//! ```no_run
//! # #[cfg(windows)]
//! # {
//! use win_logon_validator::{ConfiguredValidator, CredentialValidator, ValidatorConfig};
//!
//! let validator = ConfiguredValidator::system(&ValidatorConfig::default()).unwrap();
//! let valid = validator.validate("CONTOSO\\alice", "correct horse").unwrap();
//! # let _ = valid;
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]

mod account_api;
mod buffer;
mod config;
mod engine;
mod interpret;
mod native;
#[cfg(feature = "serde")]
mod serde_impl;
mod session;
mod status;

pub use parsing::{DOMAIN_SEPARATOR, Identity, MalformedIdentity};

/// `NTSTATUS` with its sign convention, and the statuses a logon commonly returns.
pub use status::{KnownStatus, NtStatus};

pub use interpret::{FailureSource, ValidationVerdict, interpret};

pub use buffer::{
    BufferError, BufferLayout, Field, HEADER_SIZE, LogonBuffer, LogonSubmitType, RecordedString,
    SegmentDescriptor,
};

#[cfg_attr(docsrs, doc(cfg(windows)))]
#[cfg(windows)]
pub use native::SystemLsa;
pub use native::{
    LogonRequest, LsaApi, LsaName, LsaNameError, Luid, NativeHandle, NativeResource,
    RawLogonOutput, ReleaseError, Scoped, SecurityLogonType, SourceTag, SourceTagError,
};

pub use session::{ConnectionFailed, LogonOutcome, NativeLogonSession, OpenStep, SubmissionFailed};

pub use engine::{CredentialValidationEngine, CredentialValidator, ValidationError};

#[cfg_attr(docsrs, doc(cfg(windows)))]
#[cfg(windows)]
pub use account_api::AccountApiValidator;
pub use account_api::{REJECTION_CODES, classify_logon_error};

pub use config::{
    ConfigError, ConfiguredValidator, DEFAULT_ORIGIN_NAME, DEFAULT_PACKAGE_NAME, LogonSettings,
    ValidatorConfig, ValidatorKind,
};
