//! Splits a raw logon identity into its domain and account components.
//!
//! Two shapes are accepted:
//! - `DOMAIN\account` (down-level logon name): exactly one `\`, non-empty domain.
//! - anything without a `\` (e.g. `user@example.com`): the whole input is the
//!   account and the domain is absent.
//!
//! No normalization is performed; case folding and trimming belong to the
//! authentication subsystem.
#![cfg_attr(not(feature = "std"), no_std)]

use core::fmt::{self, Display};

use thiserror::Error;

/// Separator between the domain and the account in a down-level logon name.
pub const DOMAIN_SEPARATOR: char = '\\';

/// Error returned when an identity does not follow the `DOMAIN\account` grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum MalformedIdentity {
    /// A separator is present but nothing precedes it (e.g. `\user`).
    #[error("Domain is empty")]
    EmptyDomain,

    /// More than one separator is present (e.g. `A\B\C`).
    #[error("Too many '\\' separators")]
    TooManySeparators,
}

/// Borrowed view of a parsed identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity<'a> {
    /// The domain part, absent for principal-name style identities.
    pub domain: Option<&'a str>,
    /// The account part. May be empty for `DOMAIN\`.
    pub account: &'a str,
}

impl<'a> Identity<'a> {
    /// Parses `raw` into its domain and account.
    ///
    /// # Errors
    /// See [`MalformedIdentity`].
    #[inline]
    pub fn parse(raw: &'a str) -> Result<Self, MalformedIdentity> {
        // At most 3 parts are needed to detect a second separator.
        let mut parts = raw.splitn(3, DOMAIN_SEPARATOR);
        let domain = parts.next().unwrap_or(raw);
        let Some(account) = parts.next() else {
            return Ok(Self {
                domain: None,
                account: raw,
            });
        };
        if parts.next().is_some() {
            return Err(MalformedIdentity::TooManySeparators);
        }
        if domain.is_empty() {
            return Err(MalformedIdentity::EmptyDomain);
        }
        Ok(Self {
            domain: Some(domain),
            account,
        })
    }

    /// `true` when no domain was supplied (UPN or bare account name).
    #[inline]
    #[must_use]
    pub const fn is_principal_name(&self) -> bool {
        self.domain.is_none()
    }
}

impl Display for Identity<'_> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.domain {
            Some(domain) => write!(f, "{domain}{DOMAIN_SEPARATOR}{}", self.account),
            None => f.write_str(self.account),
        }
    }
}
