#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Runs the stock sync pipeline.
//!
//! [`SyncOrchestrator`] drives a single run: open the source, load the
//! remote catalog, match and plan, then apply prices and inventory. It
//! reports through a [`SyncEventSink`] and records finished runs in a
//! [`HistorySink`]. [`Scheduler`] triggers runs on a timer and never lets
//! two overlap.

pub mod events;
pub mod guard;
pub mod history;
pub mod orchestrator;
pub mod scheduler;
pub mod validators;

#[cfg(test)]
mod testing;

use stock_sync_models::{ErrorCode, ErrorReport, Severity};
use stock_sync_remote::RemoteError;
use stock_sync_source::SourceError;

pub use events::{LogSink, NullSink, SyncEventSink, null_sink};
pub use guard::{RunPermit, RunSlot};
pub use history::{HistoryError, HistorySink, JsonHistoryStore};
pub use orchestrator::SyncOrchestrator;
pub use scheduler::{LastOutcome, RunConfigProvider, Scheduler, SchedulerStatus, TickOutcome};

/// Errors that end a run or reject a request to start one.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The source file could not be opened or read.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The remote catalog could not be reached or refused a call.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The run configuration is incomplete or malformed.
    #[error("{message}")]
    Config {
        /// Which configuration check failed.
        code: ErrorCode,
        /// Description of the problem.
        message: String,
    },

    /// The shop returned no products.
    #[error("The remote catalog has no products")]
    CatalogEmpty,

    /// The run was cancelled before it finished.
    #[error("Sync cancelled")]
    Cancelled,

    /// Another run holds the run slot.
    #[error("A sync is already running")]
    AlreadyRunning,

    /// No planned inventory operation has a positive quantity.
    #[error("No inventory update with a positive quantity to test with")]
    SmokeTestNoCandidate,

    /// The smoke test candidate no longer maps to a catalog variant.
    #[error("Variant for {reference} not found in the catalog")]
    SmokeTestVariantNotFound {
        /// SKU or titles of the candidate.
        reference: String,
    },
}

impl SyncError {
    /// Shorthand for [`SyncError::Config`].
    #[must_use]
    pub fn config(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Source(e) => e.code(),
            Self::Remote(e) => e.code(),
            Self::Config { code, .. } => *code,
            Self::CatalogEmpty => ErrorCode::CatalogEmpty,
            Self::Cancelled => ErrorCode::SyncCancelled,
            Self::AlreadyRunning => ErrorCode::SyncAlreadyRunning,
            Self::SmokeTestNoCandidate => ErrorCode::SmokeTestNoCandidate,
            Self::SmokeTestVariantNotFound { .. } => ErrorCode::SmokeTestVariantNotFound,
        }
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.code().severity()
    }

    #[must_use]
    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.code(), self.to_string())
    }

    /// Whether the failure needs user action before another run can
    /// succeed. The scheduler stops on these.
    #[must_use]
    pub fn requires_attention(&self) -> bool {
        match self {
            Self::Config { .. } => true,
            Self::Source(e) => matches!(
                e,
                SourceError::MappingInvalid { .. } | SourceError::Unsupported { .. }
            ),
            Self::Remote(e) => {
                e.is_authorization() || matches!(e, RemoteError::LocationNotFound { .. })
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_wrapped_errors() {
        let err = SyncError::from(RemoteError::Unauthorized);
        assert_eq!(err.code(), ErrorCode::RemoteUnauthorized);
        assert!(err.requires_attention());

        let err = SyncError::from(RemoteError::RateLimited { attempts: 6 });
        assert_eq!(err.severity(), Severity::Warning);
        assert!(!err.requires_attention());
    }

    #[test]
    fn transient_source_errors_do_not_need_attention() {
        let missing = SyncError::from(SourceError::FileNotFound {
            path: "/tmp/gone.csv".into(),
        });
        assert_eq!(missing.code(), ErrorCode::CsvFileNotFound);
        assert!(!missing.requires_attention());

        let mapping = SyncError::from(SourceError::MappingInvalid {
            message: "sku is empty".to_owned(),
        });
        assert!(mapping.requires_attention());
    }

    #[test]
    fn reports_carry_severity() {
        let report = SyncError::CatalogEmpty.report();
        assert_eq!(report.code, ErrorCode::CatalogEmpty);
        assert_eq!(report.severity, Severity::Fatal);

        let report = SyncError::config(ErrorCode::ConfigLocationMissing, "no location").report();
        assert_eq!(report.user_message, "no location");
        assert_eq!(report.severity, Severity::Error);
    }
}
