//! Applies planned price and inventory updates in batches.
//!
//! Price updates go out one bulk call per product, inventory updates in
//! chunks of [`INVENTORY_BATCH_SIZE`]. Rejections of single items inside a
//! batch fail only those items. A batch that fails outright after retries
//! fails its own items and the executor moves on, except for authorization
//! failures, which stop execution.
//!
//! Cancellation is checked between batches; a call already in flight runs to
//! completion.

use stock_sync_models::{
    ErrorCode, InventoryUpdate, OperationKind, OperationResult, OperationStatus, PriceBatch,
    PriceUpdate, RateLimitInfo,
};
use tokio_util::sync::CancellationToken;

use crate::RemoteError;
use crate::client::{BatchOutcome, CatalogClient, ItemError};

/// Maximum items per inventory mutation.
pub const INVENTORY_BATCH_SIZE: usize = 250;

/// Outcome of one execution phase.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub operations: Vec<OperationResult>,
    /// Last rate-limit usage seen during the phase.
    pub rate_limit: Option<RateLimitInfo>,
    /// Set when the token was cancelled before every batch was sent.
    pub cancelled: bool,
    /// Authorization failure that stopped the phase.
    pub aborted: Option<RemoteError>,
}

impl ExecutionReport {
    #[must_use]
    pub fn count(&self, status: OperationStatus) -> usize {
        self.operations.iter().filter(|o| o.status == status).count()
    }
}

/// Identifies one item of a batch for result attribution.
struct BatchItem<'a> {
    id: &'a str,
    variant_id: &'a str,
    row_reference: &'a str,
    old_value: Option<String>,
    new_value: String,
}

impl BatchItem<'_> {
    fn result(
        &self,
        kind: OperationKind,
        status: OperationStatus,
        message: Option<String>,
        error_code: Option<ErrorCode>,
    ) -> OperationResult {
        OperationResult {
            kind,
            row_reference: self.row_reference.to_owned(),
            variant_id: self.variant_id.to_owned(),
            status,
            old_value: self.old_value.clone(),
            new_value: Some(self.new_value.clone()),
            message,
            error_code,
        }
    }
}

/// Sends batches through a [`CatalogClient`].
pub struct RemoteExecutor<'a> {
    client: &'a dyn CatalogClient,
    cancel: CancellationToken,
}

impl<'a> RemoteExecutor<'a> {
    #[must_use]
    pub fn new(client: &'a dyn CatalogClient, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    /// Applies price batches in order.
    ///
    /// `on_progress(done, total)` is called after every batch with counts of
    /// price updates.
    pub async fn execute_prices(
        &self,
        batches: &[PriceBatch],
        mut on_progress: impl FnMut(usize, usize) + Send,
    ) -> ExecutionReport {
        let total: usize = batches.iter().map(|b| b.updates.len()).sum();
        let mut report = ExecutionReport::default();
        let mut done = 0;

        for (position, batch) in batches.iter().enumerate() {
            let remaining = || {
                batches[position..]
                    .iter()
                    .flat_map(|b| b.updates.iter().map(price_item))
            };

            if self.cancel.is_cancelled() {
                log::warn!(
                    "[price] cancelled before batch {}/{}",
                    position + 1,
                    batches.len()
                );
                skip_all(&mut report, OperationKind::Price, remaining(), &Skip::Cancelled);
                report.cancelled = true;
                break;
            }

            log::debug!(
                "[price] batch {}/{}: {} ({} variant(s))",
                position + 1,
                batches.len(),
                batch.product_title,
                batch.updates.len()
            );
            let items: Vec<BatchItem<'_>> = batch.updates.iter().map(price_item).collect();
            let outcome = self
                .client
                .apply_price_batch(&batch.product_id, &batch.updates)
                .await;
            record(&mut report, OperationKind::Price, &items, outcome);
            let abort = report.aborted.as_ref().map(|e| Skip::Aborted(e.to_string()));
            if let Some(reason) = abort {
                let rest = remaining().skip(items.len());
                skip_all(&mut report, OperationKind::Price, rest, &reason);
                break;
            }

            done += items.len();
            on_progress(done, total);
        }

        report
    }

    /// Applies inventory updates at `location_id` in chunks.
    pub async fn execute_inventory(
        &self,
        location_id: &str,
        updates: &[InventoryUpdate],
        mut on_progress: impl FnMut(usize, usize) + Send,
    ) -> ExecutionReport {
        let total = updates.len();
        let chunk_count = total.div_ceil(INVENTORY_BATCH_SIZE);
        let mut report = ExecutionReport::default();
        let mut done = 0;

        for (position, chunk) in updates.chunks(INVENTORY_BATCH_SIZE).enumerate() {
            if self.cancel.is_cancelled() {
                log::warn!(
                    "[inventory] cancelled before batch {}/{chunk_count}",
                    position + 1
                );
                let remaining = updates[done..].iter().map(inventory_item);
                skip_all(&mut report, OperationKind::Inventory, remaining, &Skip::Cancelled);
                report.cancelled = true;
                break;
            }

            log::debug!(
                "[inventory] batch {}/{chunk_count}: {} item(s)",
                position + 1,
                chunk.len()
            );
            let items: Vec<BatchItem<'_>> = chunk.iter().map(inventory_item).collect();
            let outcome = self.client.apply_inventory_batch(location_id, chunk).await;
            record(&mut report, OperationKind::Inventory, &items, outcome);
            done += chunk.len();

            let abort = report.aborted.as_ref().map(|e| Skip::Aborted(e.to_string()));
            if let Some(reason) = abort {
                let remaining = updates[done..].iter().map(inventory_item);
                skip_all(&mut report, OperationKind::Inventory, remaining, &reason);
                break;
            }
            on_progress(done, total);
        }

        report
    }
}

/// Turns one batch outcome into per-item results. Authorization failures
/// are kept on the report so the caller stops.
fn record(
    report: &mut ExecutionReport,
    kind: OperationKind,
    items: &[BatchItem<'_>],
    outcome: Result<BatchOutcome, RemoteError>,
) {
    match outcome {
        Ok(outcome) => {
            if let Some(info) = outcome.metadata.rate_limit {
                report.rate_limit = Some(info);
            }
            report
                .operations
                .extend(attribute(kind, items, &outcome.item_errors));
        }
        Err(e) => {
            log::error!("[{kind}] batch of {} failed: {e}", items.len());
            let code = e.code();
            let message = e.to_string();
            report.operations.extend(items.iter().map(|item| {
                item.result(kind, OperationStatus::Failed, Some(message.clone()), Some(code))
            }));
            if e.is_authorization() {
                report.aborted = Some(e);
            }
        }
    }
}

/// Why items were never sent.
enum Skip {
    Cancelled,
    Aborted(String),
}

fn price_item(u: &PriceUpdate) -> BatchItem<'_> {
    BatchItem {
        id: &u.variant_id,
        variant_id: &u.variant_id,
        row_reference: &u.row_reference,
        old_value: Some(u.old_price.clone()),
        new_value: u.new_price.clone(),
    }
}

fn inventory_item(u: &InventoryUpdate) -> BatchItem<'_> {
    BatchItem {
        id: &u.inventory_item_id,
        variant_id: &u.variant_id,
        row_reference: &u.row_reference,
        old_value: u.old_quantity.map(|q| q.to_string()),
        new_value: u.quantity.to_string(),
    }
}

fn skip_all<'a>(
    report: &mut ExecutionReport,
    kind: OperationKind,
    items: impl Iterator<Item = BatchItem<'a>>,
    reason: &Skip,
) {
    let (message, code) = match reason {
        Skip::Cancelled => ("Cancelled".to_string(), ErrorCode::SyncCancelled),
        Skip::Aborted(cause) => (format!("Not sent: {cause}"), ErrorCode::InternalUnexpected),
    };
    report.operations.extend(items.map(|item| {
        item.result(
            kind,
            OperationStatus::Skipped,
            Some(message.clone()),
            Some(code),
        )
    }));
}

/// Matches user errors to batch items by id or position.
///
/// Errors that point at no item fail the whole batch when nothing else was
/// attributed; otherwise they are only logged.
fn attribute(
    kind: OperationKind,
    items: &[BatchItem<'_>],
    errors: &[ItemError],
) -> Vec<OperationResult> {
    let mut attributed = vec![false; errors.len()];
    let mut per_item: Vec<Option<&ItemError>> = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let hit = errors
            .iter()
            .enumerate()
            .find(|(_, e)| e.refers_to(index, item.id));
        if let Some((i, _)) = hit {
            attributed[i] = true;
        }
        per_item.push(hit.map(|(_, e)| e));
    }

    let unattributed: Vec<&ItemError> = errors
        .iter()
        .zip(&attributed)
        .filter(|(_, a)| !**a)
        .map(|(e, _)| e)
        .collect();
    let batch_error = if !unattributed.is_empty() && attributed.iter().all(|a| !a) {
        Some(
            unattributed
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        )
    } else {
        for e in &unattributed {
            log::warn!("[{kind}] unattributed error: {}", e.message);
        }
        None
    };

    items
        .iter()
        .zip(per_item)
        .map(|(item, error)| match (error, &batch_error) {
            (Some(e), _) => item.result(
                kind,
                OperationStatus::Failed,
                Some(e.message.clone()),
                Some(ErrorCode::RemoteUserError),
            ),
            (None, Some(message)) => item.result(
                kind,
                OperationStatus::Failed,
                Some(message.clone()),
                Some(ErrorCode::RemoteUserError),
            ),
            (None, None) => item.result(kind, OperationStatus::Success, None, None),
        })
        .collect()
}
