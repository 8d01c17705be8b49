//! HTTP retry helpers for GraphQL calls.
//!
//! Every request the client makes goes through [`send_graphql`] instead of
//! calling `reqwest::RequestBuilder::send()` directly, so that rate
//! limiting, server errors, and flaky connections are retried the same way
//! everywhere.
//!
//! # Usage
//!
//! ```ignore
//! let (body, meta) = retry::send_graphql(&policy, || {
//!     client.post(&url).json(&payload)
//! })
//! .await?;
//! ```

use std::time::Duration;

use serde_json::Value;

use crate::RemoteError;
use crate::rate_limit::{self, CallMetadata};

/// Maximum length of a response body kept in error messages.
const BODY_PREVIEW_LEN: usize = 500;

/// GraphQL error code the platform uses for cost-based throttling.
const THROTTLED: &str = "THROTTLED";

/// GraphQL error code for a missing access scope.
const ACCESS_DENIED: &str = "ACCESS_DENIED";

/// How failed calls are retried and paced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry when the server gives no hint.
    pub base_delay: Duration,
    /// Growth factor applied per retry.
    pub backoff_factor: f64,
    /// Lower bound applied to server-provided `Retry-After` values.
    pub min_retry_after: Duration,
    /// Pause after every completed call.
    pub throttle: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            backoff_factor: 1.5,
            min_retry_after: Duration::from_secs(1),
            throttle: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests against local servers.
    #[must_use]
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            backoff_factor: 1.0,
            min_retry_after: Duration::ZERO,
            throttle: Duration::ZERO,
        }
    }

    /// Exponential backoff before retry number `retry` (0-based):
    /// `base_delay × backoff_factor^retry`.
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        self.base_delay
            .mul_f64(self.backoff_factor.powi(exponent).min(f64::from(u16::MAX)))
    }

    /// Converts a `Retry-After` header (whole or fractional seconds) into a
    /// delay no shorter than [`Self::min_retry_after`].
    #[must_use]
    pub fn retry_after_delay(&self, header: Option<&str>) -> Option<Duration> {
        let seconds: f64 = header?.trim().parse().ok()?;
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(seconds).max(self.min_retry_after))
    }
}

/// A failed attempt that may be retried.
enum Retryable {
    RateLimited { delay: Option<Duration> },
    Server { status: u16 },
    Transport(reqwest::Error),
}

/// Sends a GraphQL request and returns the parsed body plus usage metadata.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`], since builders are consumed by
/// `.send()`.
///
/// # Retry behaviour
///
/// Retries up to `policy.max_retries` times on HTTP 429, HTTP 5xx,
/// transient transport errors, and GraphQL `THROTTLED` errors. A
/// `Retry-After` header takes precedence over exponential backoff. Other
/// 4xx statuses and GraphQL errors fail immediately.
///
/// # Errors
///
/// * [`RemoteError::Unauthorized`] / [`RemoteError::Forbidden`] on 401/403
///   or `ACCESS_DENIED`
/// * [`RemoteError::RateLimited`] / [`RemoteError::Server`] once retries
///   are exhausted
/// * [`RemoteError::GraphQl`] for other GraphQL errors
/// * [`RemoteError::Http`] / [`RemoteError::Json`] for transport and body
///   failures
#[allow(clippy::future_not_send)]
pub async fn send_graphql<F>(
    policy: &RetryPolicy,
    build_request: F,
) -> Result<(Value, CallMetadata), RemoteError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let max_retries = policy.max_retries;

    for attempt in 0..=max_retries {
        let failure = match send_once(policy, &build_request).await {
            Ok(Ok(success)) => {
                if !policy.throttle.is_zero() {
                    tokio::time::sleep(policy.throttle).await;
                }
                return Ok(success);
            }
            Ok(Err(retryable)) => retryable,
            Err(e) => return Err(e),
        };

        let attempts = attempt + 1;
        if attempt == max_retries {
            return Err(match failure {
                Retryable::RateLimited { .. } => RemoteError::RateLimited { attempts },
                Retryable::Server { status } => RemoteError::Server { status, attempts },
                Retryable::Transport(e) => RemoteError::Http(e),
            });
        }

        let delay = match &failure {
            Retryable::RateLimited { delay: Some(d) } => *d,
            _ => policy.backoff_delay(attempt),
        };
        match &failure {
            Retryable::RateLimited { .. } => {
                log::warn!("[remote] rate limited, retry {attempts}/{max_retries} in {delay:?}");
            }
            Retryable::Server { status } => {
                log::warn!(
                    "[remote] HTTP {status} (server error), retry {attempts}/{max_retries} in {delay:?}"
                );
            }
            Retryable::Transport(e) => {
                log::warn!(
                    "[remote] transient error: {e}, retry {attempts}/{max_retries} in {delay:?}"
                );
            }
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    Err(RemoteError::RateLimited {
        attempts: max_retries + 1,
    })
}

/// One attempt. The outer `Result` carries permanent failures, the inner
/// one retryable failures.
#[allow(clippy::future_not_send)]
async fn send_once<F>(
    policy: &RetryPolicy,
    build_request: &F,
) -> Result<Result<(Value, CallMetadata), Retryable>, RemoteError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = match build_request().send().await {
        Ok(response) => response,
        Err(e) if is_transient(&e) => return Ok(Err(Retryable::Transport(e))),
        Err(e) => return Err(RemoteError::Http(e)),
    };

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let delay = policy.retry_after_delay(
            response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        return Ok(Err(Retryable::RateLimited { delay }));
    }
    if status.is_server_error() {
        return Ok(Err(Retryable::Server {
            status: status.as_u16(),
        }));
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(RemoteError::Unauthorized);
    }
    if status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::Forbidden {
            message: preview(&body),
        });
    }
    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::Status {
            status: status.as_u16(),
            body: preview(&body),
        });
    }

    let header_meta = rate_limit::from_headers(response.headers());
    let text = response.text().await?;
    let body: Value = serde_json::from_str(&text)?;
    let meta = header_meta.merge(rate_limit::parse_cost_extensions(&body));

    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let codes: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.pointer("/extensions/code").and_then(Value::as_str))
                .collect();
            let message = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("; ");

            if codes.contains(&THROTTLED) {
                return Ok(Err(Retryable::RateLimited { delay: None }));
            }
            if codes.contains(&ACCESS_DENIED) {
                return Err(RemoteError::Forbidden { message });
            }
            return Err(RemoteError::GraphQl { message });
        }
    }

    Ok(Ok((body, meta)))
}

fn preview(body: &str) -> String {
    if body.len() > BODY_PREVIEW_LEN {
        let cut = (0..=BODY_PREVIEW_LEN)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_by_factor() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(1500));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(2250));
    }

    #[test]
    fn retry_after_is_floored() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.retry_after_delay(Some("0.2")),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            policy.retry_after_delay(Some(" 3 ")),
            Some(Duration::from_secs(3))
        );
        assert_eq!(policy.retry_after_delay(Some("soon")), None);
        assert_eq!(policy.retry_after_delay(Some("-1")), None);
        assert_eq!(policy.retry_after_delay(None), None);
    }

    #[test]
    fn long_bodies_are_truncated() {
        let long = "é".repeat(400);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert!(shown.len() <= BODY_PREVIEW_LEN + 3);
        assert_eq!(preview("short"), "short");
    }
}
