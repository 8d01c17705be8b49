//! Resolves source rows to catalog variants.
//!
//! [`CatalogIndex`] is built once per run from a borrowed
//! [`CatalogSnapshot`]. [`Matcher`] then walks the strategy chain for each
//! row: SKU, exact title, truncated title, unique title prefix, and finally
//! the product+variant combo or barcode.

use std::collections::HashMap;

use stock_sync_models::{
    CatalogSnapshot, Confidence, MatchMethod, MatchMode, MatchResult, Product, Variant,
};

use crate::normalize::{normalize_text, truncate_name};

/// Lookup tables over one catalog snapshot.
#[derive(Debug)]
pub struct CatalogIndex<'a> {
    by_sku: HashMap<&'a str, &'a Variant>,
    by_title: HashMap<String, Vec<&'a Variant>>,
    by_combo: HashMap<String, &'a Variant>,
    by_id: HashMap<&'a str, (&'a Product, &'a Variant)>,
    duplicate_skus: usize,
}

impl<'a> CatalogIndex<'a> {
    #[must_use]
    pub fn build(snapshot: &'a CatalogSnapshot) -> Self {
        let mut by_sku: HashMap<&'a str, &'a Variant> = HashMap::new();
        let mut by_title: HashMap<String, Vec<&'a Variant>> = HashMap::new();
        let mut by_combo: HashMap<String, &'a Variant> = HashMap::new();
        let mut by_id = HashMap::new();
        let mut duplicate_skus = 0;

        for (product, variant) in snapshot.variants() {
            if let Some(sku) = variant.sku.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                if let Some(previous) = by_sku.insert(sku, variant) {
                    duplicate_skus += 1;
                    log::debug!(
                        "[matching] SKU {sku} shared by {} and {}; keeping {}",
                        previous.id,
                        variant.id,
                        variant.id
                    );
                }
            }

            by_title
                .entry(normalize_text(&product.title))
                .or_default()
                .push(variant);

            by_combo.insert(
                normalize_text(&format!("{} {}", product.title, variant.title)),
                variant,
            );
            if let Some(barcode) = variant
                .barcode
                .as_deref()
                .map(str::trim)
                .filter(|b| !b.is_empty())
            {
                by_combo.insert(barcode.to_owned(), variant);
            }

            by_id.insert(variant.id.as_str(), (product, variant));
        }

        if duplicate_skus > 0 {
            log::warn!(
                "[matching] {duplicate_skus} duplicate SKU(s) in catalog; the later variant wins"
            );
        }

        Self {
            by_sku,
            by_title,
            by_combo,
            by_id,
            duplicate_skus,
        }
    }

    /// Number of SKUs that appeared on more than one variant.
    #[must_use]
    pub const fn duplicate_skus(&self) -> usize {
        self.duplicate_skus
    }

    #[must_use]
    pub fn by_sku(&self, sku: &str) -> Option<&'a Variant> {
        self.by_sku.get(sku.trim()).copied()
    }

    /// Looks up a variant by its product and variant titles.
    #[must_use]
    pub fn by_titles(&self, product_title: &str, variant_title: &str) -> Option<&'a Variant> {
        self.by_combo
            .get(&normalize_text(&format!("{product_title} {variant_title}")))
            .copied()
    }

    #[must_use]
    pub fn by_id(&self, variant_id: &str) -> Option<(&'a Product, &'a Variant)> {
        self.by_id.get(variant_id).copied()
    }

    fn first_in_title(&self, key: &str) -> Option<&'a Variant> {
        self.by_title.get(key).and_then(|v| v.first().copied())
    }

    /// The single title bucket starting with `prefix`, if exactly one does.
    fn unique_prefix(&self, prefix: &str) -> Option<&'a Variant> {
        let mut candidates = self
            .by_title
            .iter()
            .filter(|(title, _)| title.starts_with(prefix));
        match (candidates.next(), candidates.next()) {
            (Some((_, variants)), None) => variants.first().copied(),
            _ => None,
        }
    }

    fn by_combo_or_barcode(&self, name: &str) -> Option<&'a Variant> {
        self.by_combo
            .get(&normalize_text(name))
            .or_else(|| self.by_combo.get(name.trim()))
            .copied()
    }
}

/// Runs the matching strategy chain against a [`CatalogIndex`].
#[derive(Debug)]
pub struct Matcher<'a> {
    index: CatalogIndex<'a>,
    mode: MatchMode,
}

impl<'a> Matcher<'a> {
    #[must_use]
    pub fn new(snapshot: &'a CatalogSnapshot, mode: MatchMode) -> Self {
        Self {
            index: CatalogIndex::build(snapshot),
            mode,
        }
    }

    #[must_use]
    pub const fn index(&self) -> &CatalogIndex<'a> {
        &self.index
    }

    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Matches one row.
    ///
    /// A non-empty SKU is authoritative: if it is not in the catalog the row
    /// is a no-match regardless of mode. The name strategies only run in
    /// [`MatchMode::FullChain`] for rows without a SKU.
    #[must_use]
    pub fn match_row(&self, sku: &str, name: &str) -> MatchResult {
        let sku = sku.trim();
        if !sku.is_empty() {
            return self.index.by_sku(sku).map_or_else(MatchResult::none, |v| {
                MatchResult::found(&v.id, MatchMethod::Sku, Confidence::Exact)
            });
        }

        match self.mode {
            MatchMode::SkuOnly => MatchResult::none(),
            MatchMode::FullChain => self.match_name(name),
        }
    }

    fn match_name(&self, name: &str) -> MatchResult {
        let name = name.trim();
        if name.is_empty() {
            return MatchResult::none();
        }

        let normalized = normalize_text(name);
        if let Some(v) = self.index.first_in_title(&normalized) {
            return MatchResult::found(&v.id, MatchMethod::Name, Confidence::Exact);
        }

        let truncated = normalize_text(truncate_name(name));
        if !truncated.is_empty() {
            if let Some(v) = self.index.first_in_title(&truncated) {
                return MatchResult::found(&v.id, MatchMethod::Name, Confidence::Partial);
            }
        }

        let prefix = if truncated.is_empty() {
            &normalized
        } else {
            &truncated
        };
        if let Some(v) = self.index.unique_prefix(prefix) {
            return MatchResult::found(&v.id, MatchMethod::Prefix, Confidence::Low);
        }

        self.index
            .by_combo_or_barcode(name)
            .map_or_else(MatchResult::none, |v| {
                MatchResult::found(&v.id, MatchMethod::Barcode, Confidence::Exact)
            })
    }

    /// Looks up the product and variant a match points at.
    #[must_use]
    pub fn resolve(&self, result: &MatchResult) -> Option<(&'a Product, &'a Variant)> {
        result
            .variant_id
            .as_deref()
            .and_then(|id| self.index.by_id(id))
    }
}
