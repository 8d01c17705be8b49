//! Per-run configuration handed to the orchestrator.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "2025-10";

/// Maps each pipeline field to a spreadsheet-style column letter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub sku: String,
    pub name: String,
    pub price: String,
    pub stock: String,
}

impl ColumnMapping {
    #[must_use]
    pub fn new(sku: &str, name: &str, price: &str, stock: &str) -> Self {
        Self {
            sku: sku.to_owned(),
            name: name.to_owned(),
            price: price.to_owned(),
            stock: stock.to_owned(),
        }
    }

    /// `(field, letter)` pairs in a fixed order.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("sku", &self.sku),
            ("name", &self.name),
            ("price", &self.price),
            ("stock", &self.stock),
        ]
    }
}

/// Which match strategies are enabled.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchMode {
    /// Only exact SKU lookups.
    #[default]
    SkuOnly,
    /// SKU, then title, truncated title, prefix, and barcode lookups.
    FullChain,
}

/// Credentials for the remote catalog.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopCredentials {
    /// Normalized `https://<shop>.myshopify.com` URL.
    pub shop_url: String,
    pub access_token: String,
    pub api_version: String,
}

impl ShopCredentials {
    #[must_use]
    pub fn new(shop_url: &str, access_token: &str) -> Self {
        Self {
            shop_url: shop_url.trim_end_matches('/').to_owned(),
            access_token: access_token.to_owned(),
            api_version: DEFAULT_API_VERSION.to_owned(),
        }
    }

    #[must_use]
    pub fn with_api_version(mut self, version: &str) -> Self {
        version.clone_into(&mut self.api_version);
        self
    }

    /// The GraphQL admin endpoint for these credentials.
    #[must_use]
    pub fn graphql_url(&self) -> String {
        format!(
            "{}/admin/api/{}/graphql.json",
            self.shop_url, self.api_version
        )
    }
}

impl fmt::Debug for ShopCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShopCredentials")
            .field("shop_url", &self.shop_url)
            .field("access_token", &"<redacted>")
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Everything one run needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub source_path: PathBuf,
    pub mapping: ColumnMapping,
    pub credentials: ShopCredentials,
    pub location_id: Option<String>,
    pub update_prices: bool,
    pub update_inventory: bool,
    pub dry_run: bool,
    pub match_mode: MatchMode,
}

impl RunConfig {
    #[must_use]
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            update_prices: self.update_prices,
            update_inventory: self.update_inventory,
            dry_run: self.dry_run,
            match_mode: self.match_mode,
            location_id: self.location_id.clone(),
        }
    }
}

/// The subset of a [`RunConfig`] recorded alongside history entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub update_prices: bool,
    pub update_inventory: bool,
    pub dry_run: bool,
    pub match_mode: MatchMode,
    pub location_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphql_url_uses_api_version() {
        let creds = ShopCredentials::new("https://demo.myshopify.com/", "token-123456")
            .with_api_version("2024-07");
        assert_eq!(
            creds.graphql_url(),
            "https://demo.myshopify.com/admin/api/2024-07/graphql.json"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let creds = ShopCredentials::new("https://demo.myshopify.com", "shpat_secret");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("shpat_secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn match_mode_parses_from_config_text() {
        let mode: MatchMode = "full_chain".parse().unwrap();
        assert_eq!(mode, MatchMode::FullChain);
        assert_eq!(MatchMode::default(), MatchMode::SkuOnly);
    }
}
