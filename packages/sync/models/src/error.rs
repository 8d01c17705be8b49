//! User-facing error codes and severities.
//!
//! Every crate-level error enum maps onto an [`ErrorCode`], and through it
//! onto a [`Severity`], so that any failure can be rendered as an
//! [`ErrorReport`] for history records and UI consumers.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Stable identifier for a class of failure.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    CsvInvalidFormat,
    CsvMissingColumn,
    CsvEmpty,
    CsvFileNotFound,
    CsvMappingInvalid,
    DbfInvalidFormat,
    ValueUnparseable,
    RemoteUnauthorized,
    RemoteForbidden,
    RemoteRateLimit,
    RemoteServerError,
    RemoteInvalidResponse,
    RemoteLocationNotFound,
    RemoteUserError,
    NetworkError,
    ConfigInvalid,
    ConfigShopUrlInvalid,
    ConfigTokenInvalid,
    ConfigLocationMissing,
    ConfigMappingMissing,
    CatalogEmpty,
    SmokeTestNoCandidate,
    SmokeTestVariantNotFound,
    SyncAlreadyRunning,
    SyncCancelled,
    InternalUnexpected,
}

impl ErrorCode {
    /// Transient conditions are warnings, an unusable catalog is fatal,
    /// everything else is an error.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::RemoteRateLimit
            | Self::RemoteServerError
            | Self::NetworkError
            | Self::SyncAlreadyRunning => Severity::Warning,
            Self::CatalogEmpty => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

/// How serious a failure is for the run that hit it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

/// The `{code, severity, userMessage}` triple every error converts into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub severity: Severity,
    pub user_message: String,
}

impl ErrorReport {
    #[must_use]
    pub fn new(code: ErrorCode, user_message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.severity(),
            user_message: user_message.into(),
        }
    }
}
