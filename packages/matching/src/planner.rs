//! Turns extracted rows into planned price and inventory operations.

use stock_sync_models::{
    CanonicalRow, CatalogSnapshot, Confidence, ExtractedRow, InventoryUpdate, MatchMethod,
    MatchMode, OperationKind, OperationResult, OperationStatus, OperationValue, PlannedOperation,
    PriceBatch, PriceUpdate, Product, RunConfig, UnmatchedReason, UnmatchedRow, Variant,
};

use crate::coalesce::coalesce;
use crate::matcher::Matcher;
use crate::values::{normalize_price, parse_stock, prices_equal};

/// Which updates to plan and how to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    pub update_prices: bool,
    pub update_inventory: bool,
    pub match_mode: MatchMode,
}

impl PlanOptions {
    #[must_use]
    pub const fn from_config(config: &RunConfig) -> Self {
        Self {
            update_prices: config.update_prices,
            update_inventory: config.update_inventory,
            match_mode: config.match_mode,
        }
    }
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            update_prices: true,
            update_inventory: true,
            match_mode: MatchMode::default(),
        }
    }
}

/// A row that resolved to a catalog variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRow {
    pub row_number: u64,
    pub sku: String,
    pub variant_id: String,
    pub method: MatchMethod,
    pub confidence: Confidence,
}

/// Everything the executor needs, plus the bookkeeping for the result.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Price operations first, then inventory operations.
    pub planned: Vec<PlannedOperation>,
    /// One batch per product, in the order products were first seen.
    pub price_batches: Vec<PriceBatch>,
    /// Coalesced inventory updates, in first-seen order.
    pub inventory_updates: Vec<InventoryUpdate>,
    pub matched: Vec<MatchedRow>,
    pub unmatched: Vec<UnmatchedRow>,
    /// Updates that could not be planned for a matched row.
    pub skipped: Vec<OperationResult>,
    pub duplicate_price_updates: usize,
    pub duplicate_inventory_items: usize,
    /// Updates dropped because the value already matched the catalog.
    pub unchanged: usize,
    pub rows_seen: u64,
}

impl SyncPlan {
    /// Whether there is nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.planned.is_empty()
    }

    #[must_use]
    pub fn price_update_count(&self) -> usize {
        self.price_batches.iter().map(|b| b.updates.len()).sum()
    }
}

#[derive(Debug)]
struct PendingPrice<'a> {
    product: &'a Product,
    variant: &'a Variant,
    row_reference: String,
    sku: String,
    new_price: String,
}

#[derive(Debug)]
struct PendingInventory<'a> {
    product: &'a Product,
    variant: &'a Variant,
    inventory_item_id: String,
    row_reference: String,
    sku: String,
    quantity: i64,
}

/// Accumulates rows one at a time and produces a [`SyncPlan`].
///
/// The catalog snapshot is only borrowed; nothing here mutates it.
#[derive(Debug)]
pub struct UpdatePlanner<'a> {
    matcher: Matcher<'a>,
    options: PlanOptions,
    prices: Vec<(&'a str, PendingPrice<'a>)>,
    inventory: Vec<(&'a str, PendingInventory<'a>)>,
    matched: Vec<MatchedRow>,
    unmatched: Vec<UnmatchedRow>,
    skipped: Vec<OperationResult>,
    rows_seen: u64,
}

impl<'a> UpdatePlanner<'a> {
    #[must_use]
    pub fn new(snapshot: &'a CatalogSnapshot, options: PlanOptions) -> Self {
        Self {
            matcher: Matcher::new(snapshot, options.match_mode),
            options,
            prices: Vec::new(),
            inventory: Vec::new(),
            matched: Vec::new(),
            unmatched: Vec::new(),
            skipped: Vec::new(),
            rows_seen: 0,
        }
    }

    #[must_use]
    pub const fn matcher(&self) -> &Matcher<'a> {
        &self.matcher
    }

    #[must_use]
    pub const fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    #[must_use]
    pub fn matched_count(&self) -> usize {
        self.matched.len()
    }

    /// Records a row that never reached matching.
    pub fn reject(&mut self, row_number: u64, sku: &str, name: &str, reason: UnmatchedReason) {
        self.rows_seen += 1;
        self.push_unmatched(row_number, sku, name, reason);
    }

    fn push_unmatched(&mut self, row_number: u64, sku: &str, name: &str, reason: UnmatchedReason) {
        log::debug!("[matching] row {row_number} unmatched: {reason}");
        self.unmatched.push(UnmatchedRow {
            row_number,
            sku: sku.to_owned(),
            name: name.to_owned(),
            reason,
        });
    }

    /// Validates, matches, and queues updates for one row.
    ///
    /// Problems with the row are recorded as unmatched; they never fail the
    /// plan.
    pub fn push_row(&mut self, row: ExtractedRow) {
        self.rows_seen += 1;
        let ExtractedRow {
            row_number,
            sku,
            name,
            price,
            stock,
            ..
        } = row;
        let sku = sku.trim().to_owned();

        if self.options.update_prices && price.trim().is_empty() {
            self.push_unmatched(row_number, &sku, &name, UnmatchedReason::MissingPrice);
            return;
        }
        if self.options.update_inventory && stock.trim().is_empty() {
            self.push_unmatched(row_number, &sku, &name, UnmatchedReason::MissingStock);
            return;
        }

        let stock = if self.options.update_inventory {
            match parse_stock(&stock) {
                Ok(quantity) => Some(quantity),
                Err(e) => {
                    log::debug!("[inventory] row {row_number}: {e}");
                    self.push_unmatched(row_number, &sku, &name, UnmatchedReason::InvalidStock);
                    return;
                }
            }
        } else {
            parse_stock(&stock).ok()
        };

        let canonical = CanonicalRow {
            row_number,
            sku,
            name,
            price,
            stock,
        };

        let result = self.matcher.match_row(&canonical.sku, &canonical.name);
        if !result.is_match() {
            self.push_unmatched(
                row_number,
                &canonical.sku,
                &canonical.name,
                UnmatchedReason::NoMatch,
            );
            return;
        }
        let (Some((product, variant)), Some(method)) = (self.matcher.resolve(&result), result.method)
        else {
            log::warn!(
                "[matching] row {row_number} matched {:?} but it is not in the catalog",
                result.variant_id
            );
            self.push_unmatched(
                row_number,
                &canonical.sku,
                &canonical.name,
                UnmatchedReason::VariantMissing,
            );
            return;
        };

        let new_price = if self.options.update_prices {
            match normalize_price(&canonical.price) {
                Ok(p) => Some(p),
                Err(e) => {
                    log::debug!("[price] row {row_number}: {e}");
                    self.push_unmatched(
                        row_number,
                        &canonical.sku,
                        &canonical.name,
                        UnmatchedReason::InvalidPrice,
                    );
                    return;
                }
            }
        } else {
            None
        };

        self.matched.push(MatchedRow {
            row_number,
            sku: canonical.sku.clone(),
            variant_id: variant.id.clone(),
            method,
            confidence: result.confidence,
        });

        let row_reference = canonical.reference();
        let sku = if canonical.sku.is_empty() {
            variant.sku.clone().unwrap_or_default()
        } else {
            canonical.sku.clone()
        };

        if let Some(new_price) = new_price {
            self.prices.push((
                variant.id.as_str(),
                PendingPrice {
                    product,
                    variant,
                    row_reference: row_reference.clone(),
                    sku: sku.clone(),
                    new_price,
                },
            ));
        }

        if let (true, Some(quantity)) = (self.options.update_inventory, canonical.stock) {
            match variant.inventory_item_id.as_deref() {
                Some(item) => self.inventory.push((
                    item,
                    PendingInventory {
                        product,
                        variant,
                        inventory_item_id: item.to_owned(),
                        row_reference,
                        sku,
                        quantity,
                    },
                )),
                None => {
                    log::warn!(
                        "[inventory] {row_reference}: variant {} has no inventory item, skipping",
                        variant.id
                    );
                    self.skipped.push(OperationResult {
                        kind: OperationKind::Inventory,
                        row_reference,
                        variant_id: variant.id.clone(),
                        status: OperationStatus::Skipped,
                        old_value: variant.current_quantity.map(|q| q.to_string()),
                        new_value: Some(quantity.to_string()),
                        message: Some("Variant has no inventory item".to_string()),
                        error_code: None,
                    });
                }
            }
        }
    }

    /// Coalesces duplicates, drops unchanged values, and assigns ids.
    #[must_use]
    pub fn finish(self) -> SyncPlan {
        let mut plan = SyncPlan {
            matched: self.matched,
            unmatched: self.unmatched,
            skipped: self.skipped,
            rows_seen: self.rows_seen,
            ..SyncPlan::default()
        };

        let prices = coalesce(self.prices);
        if prices.duplicate_keys > 0 {
            log::info!(
                "[price] {} variant(s) had duplicate price rows, last row wins",
                prices.duplicate_keys
            );
        }
        plan.duplicate_price_updates = prices.duplicate_keys;

        let mut price_counter = 0;
        for (_, pending) in prices.items {
            if prices_equal(&pending.new_price, &pending.variant.price) {
                plan.unchanged += 1;
                continue;
            }
            price_counter += 1;
            let operation_id = format!("price-{price_counter}");

            plan.planned.push(PlannedOperation {
                id: operation_id.clone(),
                kind: OperationKind::Price,
                sku: pending.sku.clone(),
                product_title: pending.product.title.clone(),
                variant_title: pending.variant.title.clone(),
                old_value: Some(OperationValue::Money(pending.variant.price.clone())),
                new_value: OperationValue::Money(pending.new_price.clone()),
            });

            let update = PriceUpdate {
                operation_id,
                variant_id: pending.variant.id.clone(),
                sku: pending.sku,
                variant_title: pending.variant.title.clone(),
                row_reference: pending.row_reference,
                old_price: pending.variant.price.clone(),
                new_price: pending.new_price,
            };
            match plan
                .price_batches
                .iter_mut()
                .find(|b| b.product_id == pending.product.id)
            {
                Some(batch) => batch.updates.push(update),
                None => plan.price_batches.push(PriceBatch {
                    product_id: pending.product.id.clone(),
                    product_title: pending.product.title.clone(),
                    updates: vec![update],
                }),
            }
        }

        let inventory = coalesce(self.inventory);
        if inventory.duplicate_keys > 0 {
            log::info!(
                "[inventory] {} item(s) had duplicate stock rows, last row wins",
                inventory.duplicate_keys
            );
        }
        plan.duplicate_inventory_items = inventory.duplicate_keys;

        let mut inventory_counter = 0;
        for (_, pending) in inventory.items {
            if pending.variant.current_quantity == Some(pending.quantity) {
                plan.unchanged += 1;
                continue;
            }
            inventory_counter += 1;
            let operation_id = format!("inventory-{inventory_counter}");

            plan.planned.push(PlannedOperation {
                id: operation_id.clone(),
                kind: OperationKind::Inventory,
                sku: pending.sku.clone(),
                product_title: pending.product.title.clone(),
                variant_title: pending.variant.title.clone(),
                old_value: pending.variant.current_quantity.map(OperationValue::Quantity),
                new_value: OperationValue::Quantity(pending.quantity),
            });
            plan.inventory_updates.push(InventoryUpdate {
                operation_id,
                inventory_item_id: pending.inventory_item_id,
                variant_id: pending.variant.id.clone(),
                sku: pending.sku,
                product_title: pending.product.title.clone(),
                variant_title: pending.variant.title.clone(),
                row_reference: pending.row_reference,
                old_quantity: pending.variant.current_quantity,
                quantity: pending.quantity,
            });
        }

        log::info!(
            "[matching] {} row(s), {} matched, {} unmatched, {} operation(s) planned, {} unchanged",
            plan.rows_seen,
            plan.matched.len(),
            plan.unmatched.len(),
            plan.planned.len(),
            plan.unchanged
        );

        plan
    }
}
