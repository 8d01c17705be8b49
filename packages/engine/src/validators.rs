//! Shape checks for user-supplied configuration.
//!
//! These only look at the values themselves; whether the shop accepts the
//! token or knows the location is found out on the first remote call.

use std::sync::LazyLock;

use regex::Regex;
use stock_sync_models::{ColumnMapping, ErrorCode, RunConfig};
use stock_sync_source::columns::ColumnIndexes;

use crate::SyncError;

static SHOP_HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9-]*\.myshopify\.com$").expect("valid regex")
});

const LOCATION_PREFIX: &str = "gid://shopify/Location/";

/// Shortest token accepted outside strict mode.
pub const MIN_TOKEN_LEN: usize = 10;

/// Shortest token accepted in strict mode.
pub const MIN_STRICT_TOKEN_LEN: usize = 40;

const TOKEN_PREFIXES: [&str; 2] = ["shpat_", "shpca_"];

/// Normalizes a shop address to `https://<shop>.myshopify.com`.
///
/// Accepts a bare host, an `http://` or `https://` URL, and trailing
/// paths, which are dropped.
///
/// # Errors
///
/// Returns [`ErrorCode::ConfigShopUrlInvalid`] if the host is not a
/// `myshopify.com` shop domain.
pub fn normalize_shop_url(input: &str) -> Result<String, SyncError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SyncError::config(
            ErrorCode::ConfigShopUrlInvalid,
            "Shop URL is empty",
        ));
    }

    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    if !SHOP_HOST_RE.is_match(&host) {
        return Err(SyncError::config(
            ErrorCode::ConfigShopUrlInvalid,
            format!("'{trimmed}' is not a myshopify.com shop address"),
        ));
    }
    Ok(format!("https://{host}"))
}

/// Checks the shape of an admin API access token.
///
/// Strict mode additionally requires a `shpat_` or `shpca_` prefix and at
/// least [`MIN_STRICT_TOKEN_LEN`] characters.
///
/// # Errors
///
/// Returns [`ErrorCode::ConfigTokenInvalid`] describing the first failed
/// check.
pub fn validate_access_token(token: &str, strict: bool) -> Result<(), SyncError> {
    let token = token.trim();
    if token.len() < MIN_TOKEN_LEN {
        return Err(SyncError::config(
            ErrorCode::ConfigTokenInvalid,
            format!("Access token must be at least {MIN_TOKEN_LEN} characters"),
        ));
    }
    if strict {
        if !TOKEN_PREFIXES.iter().any(|p| token.starts_with(p)) {
            return Err(SyncError::config(
                ErrorCode::ConfigTokenInvalid,
                "Access token must start with shpat_ or shpca_",
            ));
        }
        if token.len() < MIN_STRICT_TOKEN_LEN {
            return Err(SyncError::config(
                ErrorCode::ConfigTokenInvalid,
                format!("Access token must be at least {MIN_STRICT_TOKEN_LEN} characters"),
            ));
        }
    }
    Ok(())
}

/// Checks that a location id is present and looks like a location gid.
///
/// # Errors
///
/// Returns [`ErrorCode::ConfigLocationMissing`] when absent and
/// [`ErrorCode::ConfigInvalid`] when malformed.
pub fn validate_location_id(location_id: Option<&str>) -> Result<&str, SyncError> {
    let Some(id) = location_id.map(str::trim).filter(|id| !id.is_empty()) else {
        return Err(SyncError::config(
            ErrorCode::ConfigLocationMissing,
            "No inventory location is configured",
        ));
    };

    let numeric = id
        .strip_prefix(LOCATION_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()));
    if !numeric {
        return Err(SyncError::config(
            ErrorCode::ConfigInvalid,
            format!("'{id}' is not a location id (expected {LOCATION_PREFIX}<number>)"),
        ));
    }
    Ok(id)
}

/// Checks that all four fields are mapped to valid column letters.
///
/// # Errors
///
/// Returns [`ErrorCode::ConfigMappingMissing`] if nothing is mapped, or the
/// [`stock_sync_source::SourceError::MappingInvalid`] naming the first bad
/// field.
pub fn validate_mapping(mapping: &ColumnMapping) -> Result<(), SyncError> {
    if mapping.entries().iter().all(|(_, l)| l.trim().is_empty()) {
        return Err(SyncError::config(
            ErrorCode::ConfigMappingMissing,
            "No column mapping is configured",
        ));
    }
    ColumnIndexes::resolve(mapping)?;
    Ok(())
}

/// Checks everything a run needs before any file or network access.
///
/// A location is only required when inventory will actually be written.
///
/// # Errors
///
/// Returns the first failed check as a [`SyncError`].
pub fn validate_run_config(config: &RunConfig) -> Result<(), SyncError> {
    if !config.update_prices && !config.update_inventory {
        return Err(SyncError::config(
            ErrorCode::ConfigInvalid,
            "Neither price nor inventory updates are enabled",
        ));
    }
    normalize_shop_url(&config.credentials.shop_url)?;
    validate_access_token(&config.credentials.access_token, false)?;
    validate_mapping(&config.mapping)?;
    if config.update_inventory && !config.dry_run {
        validate_location_id(config.location_id.as_deref())?;
    }
    Ok(())
}
