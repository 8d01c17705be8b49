#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the stock sync pipeline.
//!
//! Rows flow from a source file through field extraction and matching into
//! [`PlannedOperation`]s, which the remote executor turns into
//! [`OperationResult`]s collected on a [`SyncResult`]. The catalog side of
//! the pipeline is a read-only [`CatalogSnapshot`] loaded once per run.

pub mod config;
pub mod error;
pub mod event;
pub mod result;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use config::{
    ColumnMapping, ConfigSummary, DEFAULT_API_VERSION, MatchMode, RunConfig, ShopCredentials,
};
pub use error::{ErrorCode, ErrorReport, Severity};
pub use event::{LogCategory, LogLevel, SyncLogEntry, SyncProgress, SyncStage};
pub use result::{
    HistoryEntry, HistoryStats, OperationResult, OperationStatus, RunStatus, SyncResult,
    UnmatchedReason, UnmatchedRow,
};

// ── Source rows ─────────────────────────────────────────────────────

/// One record read from a source file, before any column mapping.
///
/// `values` is aligned with `headers`; short records are padded with empty
/// strings so that every row has exactly one value per header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Logical position in the source file (see the reader for numbering).
    pub row_number: u64,
    /// Column names shared by every row of the same source.
    #[serde(skip)]
    pub headers: Arc<[String]>,
    /// Decoded, trimmed cell values.
    pub values: Vec<String>,
}

impl Row {
    /// Returns the value for the column named `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == name)
            .and_then(|i| self.value_at(i))
    }

    /// Returns the value at column index `index`, if within range.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    /// Number of fields carried by this row.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.values.len()
    }

    /// Builds the `header -> value` map view of this row.
    #[must_use]
    pub fn fields(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

/// A row after the column mapping has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedRow {
    pub row_number: u64,
    pub sku: String,
    pub name: String,
    pub price: String,
    pub stock: String,
    /// Every field of the source row, keyed by header.
    pub raw: BTreeMap<String, String>,
}

/// An extracted row whose stock value has been parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRow {
    pub row_number: u64,
    pub sku: String,
    pub name: String,
    pub price: String,
    /// `None` when the source cell was blank and stock updates are off.
    pub stock: Option<i64>,
}

impl CanonicalRow {
    /// Human-readable reference used on operation results.
    #[must_use]
    pub fn reference(&self) -> String {
        if self.sku.is_empty() {
            format!("row {}", self.row_number)
        } else {
            format!("row {} ({})", self.row_number, self.sku)
        }
    }
}

// ── Catalog ─────────────────────────────────────────────────────────

/// A sellable unit in the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub product_id: String,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub title: String,
    /// Current price in the platform's money format (e.g. `"10.00"`).
    pub price: String,
    pub inventory_item_id: Option<String>,
    /// Available quantity at the run's location, when known.
    pub current_quantity: Option<i64>,
}

/// A remote product with its variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub title: String,
    pub variants: Vec<Variant>,
}

/// Point-in-time view of the remote catalog for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    pub products: Vec<Product>,
}

impl CatalogSnapshot {
    #[must_use]
    pub const fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    /// Iterates every `(product, variant)` pair in catalog order.
    pub fn variants(&self) -> impl Iterator<Item = (&Product, &Variant)> {
        self.products
            .iter()
            .flat_map(|p| p.variants.iter().map(move |v| (p, v)))
    }

    #[must_use]
    pub fn variant_count(&self) -> usize {
        self.products.iter().map(|p| p.variants.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variant_count() == 0
    }
}

/// A stock location on the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: String,
    pub name: String,
}

// ── Matching ────────────────────────────────────────────────────────

/// Which strategy produced a match.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchMethod {
    Sku,
    Name,
    Barcode,
    Prefix,
}

/// How much a match should be trusted.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Confidence {
    Exact,
    Partial,
    Low,
}

/// Outcome of matching one row against the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub variant_id: Option<String>,
    pub method: Option<MatchMethod>,
    pub confidence: Confidence,
}

impl MatchResult {
    /// The result for a row no strategy could resolve.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            variant_id: None,
            method: None,
            confidence: Confidence::Low,
        }
    }

    #[must_use]
    pub fn found(variant_id: &str, method: MatchMethod, confidence: Confidence) -> Self {
        Self {
            variant_id: Some(variant_id.to_owned()),
            method: Some(method),
            confidence,
        }
    }

    #[must_use]
    pub const fn is_match(&self) -> bool {
        self.variant_id.is_some()
    }
}

// ── Planning ────────────────────────────────────────────────────────

/// The two kinds of remote mutation the pipeline performs.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Price,
    Inventory,
}

/// An old or new value carried by a planned operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationValue {
    Quantity(i64),
    Money(String),
}

impl OperationValue {
    #[must_use]
    pub const fn as_quantity(&self) -> Option<i64> {
        match self {
            Self::Quantity(q) => Some(*q),
            Self::Money(_) => None,
        }
    }
}

impl fmt::Display for OperationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quantity(q) => write!(f, "{q}"),
            Self::Money(m) => f.write_str(m),
        }
    }
}

/// A proposed change shown before anything is written remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedOperation {
    /// Run-local id, e.g. `price-3` or `inventory-12`.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub sku: String,
    pub product_title: String,
    pub variant_title: String,
    pub old_value: Option<OperationValue>,
    pub new_value: OperationValue,
}

/// One variant's new price inside a product batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub operation_id: String,
    pub variant_id: String,
    pub sku: String,
    pub variant_title: String,
    pub row_reference: String,
    pub old_price: String,
    pub new_price: String,
}

/// All price changes for one product, sent as a single bulk mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBatch {
    pub product_id: String,
    pub product_title: String,
    pub updates: Vec<PriceUpdate>,
}

/// A coalesced stock change for one inventory item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryUpdate {
    pub operation_id: String,
    pub inventory_item_id: String,
    pub variant_id: String,
    pub sku: String,
    pub product_title: String,
    pub variant_title: String,
    pub row_reference: String,
    pub old_quantity: Option<i64>,
    pub quantity: i64,
}

// ── Rate limiting ───────────────────────────────────────────────────

/// Rate-limit usage reported by the platform for one call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub percentage: f64,
}

impl RateLimitInfo {
    /// Builds the info from a `used/limit` pair.
    #[must_use]
    pub fn from_usage(used: u32, limit: u32) -> Self {
        let percentage = if limit == 0 {
            0.0
        } else {
            (f64::from(used) / f64::from(limit) * 100.0).round()
        };
        Self {
            used,
            limit,
            remaining: limit.saturating_sub(used),
            percentage,
        }
    }
}
