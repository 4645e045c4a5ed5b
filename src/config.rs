//! Validator configuration and strategy selection.

use core::fmt::{self, Display};

use thiserror::Error;

use crate::engine::{CredentialValidationEngine, CredentialValidator, ValidationError};
use crate::native::{LsaApi, LsaName, LsaNameError, SourceTag, SourceTagError};

/// Package negotiated by default.
pub const DEFAULT_PACKAGE_NAME: &str = "Negotiate";
/// Origin recorded with each logon by default.
pub const DEFAULT_ORIGIN_NAME: &str = "CredentialValidation";

/// A configuration value was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The authentication package name is not a valid `LSA_STRING`.
    #[error("Invalid package name: {0}")]
    PackageName(#[source] LsaNameError),
    /// The origin name is not a valid `LSA_STRING`.
    #[error("Invalid origin name: {0}")]
    OriginName(#[source] LsaNameError),
    /// The token source tag is not 1 to 8 ASCII bytes.
    #[error(transparent)]
    SourceTag(#[from] SourceTagError),
    /// The strategy cannot run on this platform.
    #[error("The {0} strategy is not available on this platform")]
    Unsupported(ValidatorKind),
}

/// Which [`CredentialValidator`] a [`ConfiguredValidator`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ValidatorKind {
    /// `LsaLogonUser` with a hand-built `KERB_INTERACTIVE_LOGON` buffer.
    #[default]
    LsaLogon,
    /// `LogonUserW` with a network logon.
    AccountApi,
}

impl Display for ValidatorKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LsaLogon => f.write_str("lsa_logon"),
            Self::AccountApi => f.write_str("account_api"),
        }
    }
}

/// Names handed to the LSA on every validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogonSettings {
    package_name: LsaName,
    origin_name: LsaName,
    source_tag: SourceTag,
}

impl LogonSettings {
    /// Validates the three names.
    ///
    /// # Errors
    /// See [`ConfigError`].
    #[inline]
    pub fn new(package_name: &str, origin_name: &str, source_tag: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            package_name: LsaName::new(package_name).map_err(ConfigError::PackageName)?,
            origin_name: LsaName::new(origin_name).map_err(ConfigError::OriginName)?,
            source_tag: SourceTag::new(source_tag)?,
        })
    }

    /// Authentication package looked up on each connection.
    #[inline]
    #[must_use]
    pub fn package_name(&self) -> &str {
        self.package_name.as_str()
    }

    /// `OriginName` passed to `LsaLogonUser`.
    #[inline]
    #[must_use]
    pub fn origin_name(&self) -> &str {
        self.origin_name.as_str()
    }

    /// `TOKEN_SOURCE.SourceName`.
    #[inline]
    #[must_use]
    pub const fn source_tag(&self) -> SourceTag {
        self.source_tag
    }
}

impl Default for LogonSettings {
    #[inline]
    fn default() -> Self {
        ValidatorConfig::default().settings()
    }
}

/// Deserializable validator configuration. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct ValidatorConfig {
    /// Strategy to run.
    pub strategy: ValidatorKind,
    /// Authentication package, `"Negotiate"` by default.
    pub package_name: LsaName,
    /// Origin name, `"CredentialValidation"` by default.
    pub origin_name: LsaName,
    /// Token source tag, `"CredVal"` by default.
    pub source_tag: SourceTag,
}

impl ValidatorConfig {
    /// Builds a configuration from unchecked names.
    ///
    /// # Errors
    /// See [`ConfigError`].
    #[inline]
    pub fn new(
        strategy: ValidatorKind,
        package_name: &str,
        origin_name: &str,
        source_tag: &str,
    ) -> Result<Self, ConfigError> {
        let settings = LogonSettings::new(package_name, origin_name, source_tag)?;
        Ok(Self::from_settings(strategy, settings))
    }

    /// Wraps already validated settings.
    #[inline]
    #[must_use]
    pub fn from_settings(strategy: ValidatorKind, settings: LogonSettings) -> Self {
        let LogonSettings {
            package_name,
            origin_name,
            source_tag,
        } = settings;
        Self {
            strategy,
            package_name,
            origin_name,
            source_tag,
        }
    }

    /// The LSA names of this configuration.
    #[inline]
    #[must_use]
    pub fn settings(&self) -> LogonSettings {
        LogonSettings {
            package_name: self.package_name.clone(),
            origin_name: self.origin_name.clone(),
            source_tag: self.source_tag,
        }
    }
}

impl Default for ValidatorConfig {
    #[inline]
    fn default() -> Self {
        Self {
            strategy: ValidatorKind::default(),
            package_name: LsaName::from_trusted(DEFAULT_PACKAGE_NAME),
            origin_name: LsaName::from_trusted(DEFAULT_ORIGIN_NAME),
            source_tag: SourceTag::CREDENTIAL_VALIDATION,
        }
    }
}

/// The [`CredentialValidator`] chosen by [`ValidatorConfig::strategy`].
#[derive(Debug)]
pub enum ConfiguredValidator<A: LsaApi> {
    /// The `LsaLogonUser` engine.
    Lsa(CredentialValidationEngine<A>),
    /// The `LogonUserW` validator.
    #[cfg(windows)]
    AccountApi(crate::account_api::AccountApiValidator),
}

impl<A: LsaApi> ConfiguredValidator<A> {
    /// Selects the strategy named in `config`. `api` is only used by the LSA engine.
    ///
    /// # Errors
    /// [`ConfigError::Unsupported`] when the account API is selected on a
    /// platform without it.
    #[inline]
    pub fn new(config: &ValidatorConfig, api: A) -> Result<Self, ConfigError> {
        match config.strategy {
            ValidatorKind::LsaLogon => Ok(Self::Lsa(CredentialValidationEngine::new(
                api,
                config.settings(),
            ))),
            ValidatorKind::AccountApi => {
                cfg_if::cfg_if! {
                    if #[cfg(windows)] {
                        Ok(Self::AccountApi(crate::account_api::AccountApiValidator))
                    } else {
                        Err(ConfigError::Unsupported(ValidatorKind::AccountApi))
                    }
                }
            }
        }
    }

    /// The strategy in use.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ValidatorKind {
        match self {
            Self::Lsa(_) => ValidatorKind::LsaLogon,
            #[cfg(windows)]
            Self::AccountApi(_) => ValidatorKind::AccountApi,
        }
    }
}

#[cfg(windows)]
impl ConfiguredValidator<crate::native::SystemLsa> {
    /// Validator backed by the local security authority.
    ///
    /// # Errors
    /// See [`ConfiguredValidator::new`].
    #[inline]
    pub fn system(config: &ValidatorConfig) -> Result<Self, ConfigError> {
        Self::new(config, crate::native::SystemLsa)
    }
}

impl<A: LsaApi> CredentialValidator for ConfiguredValidator<A> {
    #[inline]
    fn validate(&self, identity: &str, password: &str) -> Result<bool, ValidationError> {
        match self {
            Self::Lsa(engine) => engine.validate(identity, password),
            #[cfg(windows)]
            Self::AccountApi(validator) => validator.validate(identity, password),
        }
    }
}
