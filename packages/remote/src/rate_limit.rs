//! Rate-limit and query-cost metadata.
//!
//! The platform reports usage two ways: a `used/limit` header on REST-style
//! leaky-bucket accounting, and a `extensions.cost` object on GraphQL
//! responses. Both are folded into a [`CallMetadata`] returned with each
//! call rather than kept in shared state.

use serde_json::Value;
use stock_sync_models::RateLimitInfo;

/// Header carrying `used/limit` bucket usage.
pub const CALL_LIMIT_HEADER: &str = "X-Shopify-Shop-Api-Call-Limit";

/// Usage accounting for one remote call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CallMetadata {
    pub rate_limit: Option<RateLimitInfo>,
    /// Query cost points charged for the call.
    pub cost: Option<f64>,
}

impl CallMetadata {
    /// Prefers values from `other` where present.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            rate_limit: other.rate_limit.or(self.rate_limit),
            cost: other.cost.or(self.cost),
        }
    }
}

/// Parses a `used/limit` header value such as `"32/40"`.
#[must_use]
pub fn parse_call_limit(value: &str) -> Option<RateLimitInfo> {
    let (used, limit) = value.trim().split_once('/')?;
    let used = used.trim().parse().ok()?;
    let limit = limit.trim().parse().ok()?;
    Some(RateLimitInfo::from_usage(used, limit))
}

/// Reads `extensions.cost` from a GraphQL response body.
#[must_use]
pub fn parse_cost_extensions(body: &Value) -> CallMetadata {
    let Some(cost) = body.get("extensions").and_then(|e| e.get("cost")) else {
        return CallMetadata::default();
    };

    let charged = cost
        .get("actualQueryCost")
        .and_then(Value::as_f64)
        .or_else(|| cost.get("requestedQueryCost").and_then(Value::as_f64));

    let rate_limit = cost.get("throttleStatus").and_then(|status| {
        let maximum = status.get("maximumAvailable").and_then(Value::as_f64)?;
        let available = status.get("currentlyAvailable").and_then(Value::as_f64)?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (limit, remaining) = (maximum.max(0.0) as u32, available.max(0.0) as u32);
        Some(RateLimitInfo::from_usage(
            limit.saturating_sub(remaining),
            limit,
        ))
    });

    CallMetadata {
        rate_limit,
        cost: charged,
    }
}

/// Reads usage from the call-limit header, if the response carried one.
#[must_use]
pub fn from_headers(headers: &reqwest::header::HeaderMap) -> CallMetadata {
    CallMetadata {
        rate_limit: headers
            .get(CALL_LIMIT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_call_limit),
        cost: None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_call_limit_header() {
        let info = parse_call_limit("32/40").unwrap();
        assert_eq!(info.used, 32);
        assert_eq!(info.limit, 40);
        assert_eq!(info.remaining, 8);
        assert!((info.percentage - 80.0).abs() < f64::EPSILON);

        assert!(parse_call_limit("garbage").is_none());
        assert!(parse_call_limit("1/x").is_none());
    }

    #[test]
    fn parses_graphql_cost() {
        let body = json!({
            "data": {},
            "extensions": {
                "cost": {
                    "requestedQueryCost": 12,
                    "actualQueryCost": 10,
                    "throttleStatus": {
                        "maximumAvailable": 2000.0,
                        "currentlyAvailable": 1500,
                        "restoreRate": 100.0
                    }
                }
            }
        });
        let meta = parse_cost_extensions(&body);
        assert_eq!(meta.cost, Some(10.0));
        let info = meta.rate_limit.unwrap();
        assert_eq!(info.limit, 2000);
        assert_eq!(info.used, 500);
        assert_eq!(info.remaining, 1500);
    }

    #[test]
    fn missing_extensions_yield_empty_metadata() {
        assert_eq!(parse_cost_extensions(&json!({"data": {}})), CallMetadata::default());
    }

    #[test]
    fn merge_prefers_newer_values() {
        let header = CallMetadata {
            rate_limit: Some(RateLimitInfo::from_usage(1, 40)),
            cost: None,
        };
        let body = CallMetadata {
            rate_limit: None,
            cost: Some(3.0),
        };
        let merged = header.merge(body);
        assert_eq!(merged.rate_limit.unwrap().used, 1);
        assert_eq!(merged.cost, Some(3.0));
    }
}
