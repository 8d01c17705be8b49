#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Remote catalog access.
//!
//! [`client::GraphqlClient`] talks to the shop's GraphQL admin API through
//! the [`CatalogClient`] trait. Every request goes through
//! [`retry::send_graphql`], which retries rate-limited and failing calls
//! with backoff and returns the call's [`CallMetadata`] alongside the body.
//!
//! [`executor::RemoteExecutor`] applies a plan's price batches and
//! inventory updates and turns the responses into per-operation results.

pub mod client;
pub mod executor;
pub mod queries;
pub mod rate_limit;
pub mod retry;

use stock_sync_models::{ErrorCode, ErrorReport, Severity};

pub use client::{
    BatchOutcome, CatalogClient, CatalogConnector, Fetched, GraphqlClient, GraphqlConnector,
    ItemError,
};
pub use executor::{ExecutionReport, RemoteExecutor};
pub use rate_limit::CallMetadata;
pub use retry::RetryPolicy;

/// Errors from talking to the remote platform.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Transport-level failure (DNS, connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The access token was rejected.
    #[error("Unauthorized: the access token was rejected")]
    Unauthorized,

    /// The token lacks a required scope.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Detail returned by the platform.
        message: String,
    },

    /// Still rate limited after every retry.
    #[error("Rate limited after {attempts} attempt(s)")]
    RateLimited {
        /// Total requests sent.
        attempts: u32,
    },

    /// Still failing with a 5xx status after every retry.
    #[error("Server error (HTTP {status}) after {attempts} attempt(s)")]
    Server {
        /// Last status code seen.
        status: u16,
        /// Total requests sent.
        attempts: u32,
    },

    /// A non-retryable HTTP status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The response carried top-level GraphQL errors.
    #[error("GraphQL error: {message}")]
    GraphQl {
        /// Joined error messages.
        message: String,
    },

    /// The response did not have the expected shape.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Description of what was missing.
        message: String,
    },

    /// The response body was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configured location does not exist in the shop.
    #[error("Location not found: {location_id}")]
    LocationNotFound {
        /// Requested location id.
        location_id: String,
    },
}

impl RemoteError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Http(_) => ErrorCode::NetworkError,
            Self::Unauthorized => ErrorCode::RemoteUnauthorized,
            Self::Forbidden { .. } => ErrorCode::RemoteForbidden,
            Self::RateLimited { .. } => ErrorCode::RemoteRateLimit,
            Self::Server { .. } => ErrorCode::RemoteServerError,
            Self::Status { .. } | Self::GraphQl { .. } | Self::InvalidResponse { .. } | Self::Json(_) => {
                ErrorCode::RemoteInvalidResponse
            }
            Self::LocationNotFound { .. } => ErrorCode::RemoteLocationNotFound,
        }
    }

    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.code().severity()
    }

    #[must_use]
    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.code(), self.to_string())
    }

    /// Whether the credentials themselves were refused.
    #[must_use]
    pub const fn is_authorization(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::Forbidden { .. })
    }
}
