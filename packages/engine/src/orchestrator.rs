//! Sequences one sync run from source file to remote updates.
//!
//! Stages and the percent reported on entry:
//!
//! | Stage                 | Percent  |
//! |-----------------------|----------|
//! | `idle` (open source)  | 0        |
//! | `loading-catalog`     | 10       |
//! | `matching`            | 30       |
//! | `planning`            | 45       |
//! | `executing-prices`    | 50 - 75  |
//! | `executing-inventory` | 75 - 100 |
//! | `done`                | 100      |
//!
//! Cancellation is polled between stages, every [`YIELD_EVERY_ROWS`] rows
//! while matching, and between executor batches. Every started run ends
//! with exactly one [`SyncEventSink::complete`] call, failures included.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use stock_sync_matching::{CatalogIndex, PlanOptions, SyncPlan, UpdatePlanner};
use stock_sync_models::{
    CatalogSnapshot, ErrorCode, HistoryEntry, InventoryUpdate, Location, LogCategory, LogLevel,
    OperationKind, OperationStatus, PlannedOperation, RunConfig, SyncLogEntry, SyncProgress,
    SyncResult, SyncStage, UnmatchedReason,
};
use stock_sync_remote::{CatalogClient, CatalogConnector, ExecutionReport, RemoteExecutor};
use stock_sync_source::extract::FieldExtractor;
use stock_sync_source::{RowSource, SourcePreview};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::SyncEventSink;
use crate::guard::RunSlot;
use crate::history::HistorySink;
use crate::{SyncError, validators};

/// Rows read between yields to the runtime and cancellation checks.
pub const YIELD_EVERY_ROWS: usize = 500;

const PRICES_START: u8 = 50;
const INVENTORY_START: u8 = 75;
const DONE: u8 = 100;

/// Runs the pipeline and reports what happened.
///
/// Only one run or smoke test executes at a time per orchestrator; a
/// second request while one is active fails with
/// [`SyncError::AlreadyRunning`] and emits no result.
pub struct SyncOrchestrator {
    connector: Arc<dyn CatalogConnector>,
    sink: Arc<dyn SyncEventSink>,
    history: Option<Arc<dyn HistorySink>>,
    slot: RunSlot,
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(connector: Arc<dyn CatalogConnector>, sink: Arc<dyn SyncEventSink>) -> Self {
        Self {
            connector,
            sink,
            history: None,
            slot: RunSlot::new(),
        }
    }

    /// Records every finished run, successful or not, in `history`.
    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    /// Whether a run or smoke test is in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.slot.is_busy()
    }

    /// Reads the first `limit` rows of a source file. No network access.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Source`] if the file cannot be read.
    pub fn preview(path: &Path, limit: usize) -> Result<SourcePreview, SyncError> {
        Ok(stock_sync_source::preview(path, limit)?)
    }

    /// Runs the whole pipeline up to planning without touching the shop.
    ///
    /// # Errors
    ///
    /// Same as [`Self::run`].
    pub async fn plan(
        &self,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<SyncResult, SyncError> {
        let mut config = config.clone();
        config.dry_run = true;
        self.run(&config, cancel).await
    }

    /// Runs one sync.
    ///
    /// A run whose batches partly fail still returns `Ok` with a
    /// `partial_success` result.
    ///
    /// # Errors
    ///
    /// * [`SyncError::AlreadyRunning`] if another run is active
    /// * [`SyncError::Cancelled`] if `cancel` fired before the run finished
    /// * configuration, source, catalog-load, and authorization failures
    ///
    /// In every case except `AlreadyRunning` the partial result has already
    /// been sent to the sink and history.
    pub async fn run(
        &self,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<SyncResult, SyncError> {
        let _permit = self.slot.try_acquire().ok_or(SyncError::AlreadyRunning)?;
        let mut result = SyncResult::start(&Uuid::new_v4().to_string(), config.dry_run);

        log::info!(
            "[sync] run {} started for {}{}",
            result.run_id,
            config.source_path.display(),
            if config.dry_run { " (dry run)" } else { "" }
        );
        let outcome = self.run_pipeline(config, &cancel, &mut result).await;
        self.finish(config, result, outcome, true)
    }

    /// Applies a single inventory update taken from `planned` to check that
    /// writes go through.
    ///
    /// The candidate is the first inventory operation with a positive new
    /// quantity. It is resolved again against a freshly loaded catalog, by
    /// SKU when it has one and otherwise by product and variant title.
    ///
    /// # Errors
    ///
    /// * [`SyncError::SmokeTestNoCandidate`] if `planned` has no candidate
    /// * [`SyncError::SmokeTestVariantNotFound`] if it no longer resolves
    /// * the same run-level failures as [`Self::run`]
    pub async fn smoke_test(
        &self,
        config: &RunConfig,
        planned: &[PlannedOperation],
        cancel: CancellationToken,
    ) -> Result<SyncResult, SyncError> {
        let _permit = self.slot.try_acquire().ok_or(SyncError::AlreadyRunning)?;
        let mut result = SyncResult::start(&Uuid::new_v4().to_string(), false);

        let outcome = self
            .smoke_pipeline(config, planned, &cancel, &mut result)
            .await;
        self.finish(config, result, outcome, false)
    }

    // ── Pipeline ────────────────────────────────────────────────────

    async fn run_pipeline(
        &self,
        config: &RunConfig,
        cancel: &CancellationToken,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        self.enter(result, SyncStage::Idle, 0, "Opening source file");
        validators::validate_run_config(config)?;
        let extractor = FieldExtractor::new(&config.mapping)?;

        let source = stock_sync_source::open(&config.source_path)?;
        self.log(
            LogLevel::Info,
            LogCategory::Source,
            format!(
                "Opened {} ({} columns, {})",
                config.source_path.display(),
                source.headers().len(),
                source.encoding()
            ),
        );
        if let Err(e) = extractor.indexes().check_headers(source.headers().len()) {
            self.log(
                LogLevel::Warn,
                LogCategory::Source,
                format!("{e}; rows without that column will be reported as unmatched"),
            );
        }
        checkpoint(cancel)?;

        self.enter(result, SyncStage::LoadingCatalog, 10, "Loading catalog");
        let client = self.connector.connect(&config.credentials)?;
        let location = self.resolve_location(client.as_ref(), config).await?;
        let snapshot = self.load_catalog(client.as_ref(), config, result).await?;
        checkpoint(cancel)?;

        self.enter(result, SyncStage::Matching, 30, "Matching rows");
        let plan = self
            .match_rows(source, &extractor, &snapshot, config, cancel)
            .await?;

        self.enter(result, SyncStage::Planning, 45, "Planning updates");
        let SyncPlan {
            planned,
            price_batches,
            inventory_updates,
            matched,
            unmatched,
            skipped,
            duplicate_price_updates,
            duplicate_inventory_items,
            unchanged,
            rows_seen,
        } = plan;

        result.total_rows = rows_seen;
        result.total_matched = matched.len() as u64;
        self.sink.preview_ready(&planned);
        result.set_planned(planned);
        result.unmatched = unmatched;
        result.record_all(skipped);

        self.emit(
            SyncLogEntry::new(
                LogLevel::Info,
                LogCategory::Matching,
                format!(
                    "{} of {} rows matched, {} update(s) planned",
                    result.total_matched, result.total_rows, result.total_planned
                ),
            )
            .with_context(json!({
                "unmatched": result.unmatched.len(),
                "unchanged": unchanged,
                "duplicatePriceUpdates": duplicate_price_updates,
                "duplicateInventoryItems": duplicate_inventory_items,
                "skipped": result.total_skipped,
            })),
        );

        if config.dry_run {
            self.enter(result, SyncStage::Done, DONE, "Dry run complete");
            return Ok(());
        }

        // A cancelled token makes both phases record their operations as
        // skipped without sending anything; the run ends at the checkpoint
        // below.
        let executor = RemoteExecutor::new(client.as_ref(), cancel.clone());

        if !price_batches.is_empty() {
            self.enter(
                result,
                SyncStage::ExecutingPrices,
                PRICES_START,
                "Updating prices",
            );
            let report = executor
                .execute_prices(&price_batches, |done, total| {
                    self.progress(
                        SyncStage::ExecutingPrices,
                        scaled(PRICES_START, INVENTORY_START, done, total),
                        format!("Updated {done} of {total} price(s)"),
                    );
                })
                .await;
            let outcome = self.absorb(result, OperationKind::Price, report);
            if !matches!(outcome, Err(SyncError::Cancelled)) {
                outcome?;
            }
        }

        if !inventory_updates.is_empty() {
            let Some(location) = location else {
                return Err(SyncError::config(
                    ErrorCode::ConfigLocationMissing,
                    "No inventory location is configured",
                ));
            };
            self.enter(
                result,
                SyncStage::ExecutingInventory,
                INVENTORY_START,
                format!("Updating stock at {}", location.name),
            );
            let report = executor
                .execute_inventory(&location.id, &inventory_updates, |done, total| {
                    self.progress(
                        SyncStage::ExecutingInventory,
                        scaled(INVENTORY_START, DONE, done, total),
                        format!("Updated {done} of {total} stock level(s)"),
                    );
                })
                .await;
            self.absorb(result, OperationKind::Inventory, report)?;
        }
        checkpoint(cancel)?;

        self.enter(result, SyncStage::Done, DONE, "Sync complete");
        Ok(())
    }

    async fn smoke_pipeline(
        &self,
        config: &RunConfig,
        planned: &[PlannedOperation],
        cancel: &CancellationToken,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        let candidate = planned
            .iter()
            .find(|op| {
                op.kind == OperationKind::Inventory
                    && op.new_value.as_quantity().is_some_and(|q| q > 0)
            })
            .ok_or(SyncError::SmokeTestNoCandidate)?;
        let location_id = validators::validate_location_id(config.location_id.as_deref())?;
        log::info!(
            "[sync] smoke test with {} ({} {})",
            candidate.id,
            candidate.product_title,
            candidate.variant_title
        );

        self.enter(result, SyncStage::LoadingCatalog, 10, "Loading catalog");
        let client = self.connector.connect(&config.credentials)?;
        let location = client.find_location(location_id).await?;
        let snapshot = self.load_catalog(client.as_ref(), config, result).await?;
        checkpoint(cancel)?;

        self.enter(result, SyncStage::Planning, 45, "Resolving test variant");
        let index = CatalogIndex::build(&snapshot);
        let not_found = || SyncError::SmokeTestVariantNotFound {
            reference: if candidate.sku.trim().is_empty() {
                format!("{} / {}", candidate.product_title, candidate.variant_title)
            } else {
                candidate.sku.clone()
            },
        };
        let variant = if candidate.sku.trim().is_empty() {
            index.by_titles(&candidate.product_title, &candidate.variant_title)
        } else {
            index.by_sku(&candidate.sku)
        }
        .ok_or_else(not_found)?;
        let inventory_item_id = variant.inventory_item_id.clone().ok_or_else(not_found)?;
        let quantity = candidate
            .new_value
            .as_quantity()
            .ok_or(SyncError::SmokeTestNoCandidate)?;

        let update = InventoryUpdate {
            operation_id: candidate.id.clone(),
            inventory_item_id,
            variant_id: variant.id.clone(),
            sku: candidate.sku.clone(),
            product_title: candidate.product_title.clone(),
            variant_title: candidate.variant_title.clone(),
            row_reference: format!("smoke test ({})", candidate.id),
            old_quantity: variant.current_quantity,
            quantity,
        };
        result.set_planned(vec![candidate.clone()]);

        self.enter(
            result,
            SyncStage::ExecutingInventory,
            INVENTORY_START,
            format!("Setting stock at {}", location.name),
        );
        let executor = RemoteExecutor::new(client.as_ref(), cancel.clone());
        let report = executor
            .execute_inventory(&location.id, std::slice::from_ref(&update), |_, _| {})
            .await;
        self.absorb(result, OperationKind::Inventory, report)?;

        self.enter(result, SyncStage::Done, DONE, "Smoke test complete");
        Ok(())
    }

    /// Confirms the configured location exists when stock will be written.
    async fn resolve_location(
        &self,
        client: &dyn CatalogClient,
        config: &RunConfig,
    ) -> Result<Option<Location>, SyncError> {
        if !config.update_inventory || config.dry_run {
            return Ok(None);
        }
        let location_id = validators::validate_location_id(config.location_id.as_deref())?;
        let location = client.find_location(location_id).await?;
        self.log(
            LogLevel::Info,
            LogCategory::Inventory,
            format!("Using location {} ({})", location.name, location.id),
        );
        Ok(Some(location))
    }

    async fn load_catalog(
        &self,
        client: &dyn CatalogClient,
        config: &RunConfig,
        result: &mut SyncResult,
    ) -> Result<CatalogSnapshot, SyncError> {
        let fetched = client.load_catalog(config.location_id.as_deref()).await?;
        if let Some(info) = fetched.metadata.rate_limit {
            result.rate_limit = Some(info);
        }

        let snapshot = fetched.value;
        if snapshot.is_empty() {
            return Err(SyncError::CatalogEmpty);
        }
        self.log(
            LogLevel::Info,
            LogCategory::Remote,
            format!(
                "Loaded {} product(s) with {} variant(s)",
                snapshot.products.len(),
                snapshot.variant_count()
            ),
        );
        Ok(snapshot)
    }

    async fn match_rows(
        &self,
        source: Box<dyn RowSource>,
        extractor: &FieldExtractor,
        snapshot: &CatalogSnapshot,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> Result<SyncPlan, SyncError> {
        let mut planner = UpdatePlanner::new(snapshot, PlanOptions::from_config(config));

        for (read, row) in source.enumerate() {
            let row = row?;
            match extractor.extract(&row) {
                Ok(extracted) => planner.push_row(extracted),
                Err(rejection) => {
                    log::debug!(
                        "[matching] row {}: column {} for {} missing ({} fields)",
                        rejection.row_number,
                        rejection.index,
                        rejection.field,
                        rejection.field_count
                    );
                    planner.reject(
                        rejection.row_number,
                        &rejection.sku,
                        &rejection.name,
                        UnmatchedReason::MappingOutOfRange,
                    );
                }
            }

            let read = read + 1;
            if read % YIELD_EVERY_ROWS == 0 {
                tokio::task::yield_now().await;
                checkpoint(cancel)?;
                self.progress(
                    SyncStage::Matching,
                    30,
                    format!("Matched {} of {read} rows", planner.matched_count()),
                );
            }
        }

        Ok(planner.finish())
    }

    /// Folds an executor report into the result. Authorization aborts and
    /// cancellation end the run.
    fn absorb(
        &self,
        result: &mut SyncResult,
        kind: OperationKind,
        report: ExecutionReport,
    ) -> Result<(), SyncError> {
        let category = match kind {
            OperationKind::Price => LogCategory::Price,
            OperationKind::Inventory => LogCategory::Inventory,
        };
        let succeeded = report.count(OperationStatus::Success);
        let failed = report.count(OperationStatus::Failed);
        let skipped = report.count(OperationStatus::Skipped);

        let ExecutionReport {
            operations,
            rate_limit,
            cancelled,
            aborted,
        } = report;
        if rate_limit.is_some() {
            result.rate_limit = rate_limit;
        }
        result.record_all(operations);

        let level = if failed == 0 {
            LogLevel::Success
        } else {
            LogLevel::Warn
        };
        self.log(
            level,
            category,
            format!("{kind} updates: {succeeded} succeeded, {failed} failed, {skipped} skipped"),
        );

        if let Some(e) = aborted {
            return Err(e.into());
        }
        if cancelled {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Finalizes the result, emits it, and records history.
    fn finish(
        &self,
        config: &RunConfig,
        mut result: SyncResult,
        outcome: Result<(), SyncError>,
        record_history: bool,
    ) -> Result<SyncResult, SyncError> {
        let error = outcome.err();
        match &error {
            Some(SyncError::Cancelled) => {
                self.enter(&mut result, SyncStage::Cancelled, DONE, "Sync cancelled");
                self.log(LogLevel::Warn, LogCategory::Sync, "Sync cancelled");
            }
            Some(e) => self.log(
                LogLevel::Error,
                LogCategory::Sync,
                format!("Sync failed: {e}"),
            ),
            None => {}
        }

        result.finalize(error.as_ref().map(SyncError::report));
        log::info!(
            "[sync] run {} ended: {} in {}ms",
            result.run_id,
            result.status,
            result.duration_ms
        );
        self.sink.complete(&result);

        if record_history {
            self.record_history(config, &result);
        }

        match error {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    fn record_history(&self, config: &RunConfig, result: &SyncResult) {
        let Some(history) = &self.history else {
            return;
        };
        let entry = HistoryEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: result.finished_at.unwrap_or(result.started_at),
            source_file_name: config
                .source_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            result: result.clone(),
            config_summary: config.summary(),
        };
        if let Err(e) = history.record(entry) {
            log::warn!("[history] failed to record run {}: {e}", result.run_id);
            self.log(
                LogLevel::Warn,
                LogCategory::History,
                format!("Run history could not be saved: {e}"),
            );
        }
    }

    // ── Events ──────────────────────────────────────────────────────

    fn enter(
        &self,
        result: &mut SyncResult,
        stage: SyncStage,
        percent: u8,
        message: impl Into<String>,
    ) {
        result.stage = stage;
        self.progress(stage, percent, message);
    }

    fn progress(&self, stage: SyncStage, percent: u8, message: impl Into<String>) {
        self.sink.progress(&SyncProgress {
            stage,
            percent: percent.min(DONE),
            message: message.into(),
        });
    }

    fn log(&self, level: LogLevel, category: LogCategory, message: impl Into<String>) {
        self.emit(SyncLogEntry::new(level, category, message));
    }

    fn emit(&self, entry: SyncLogEntry) {
        self.sink.log(&entry);
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

/// Maps `done / total` onto `[from, to]`.
fn scaled(from: u8, to: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return to;
    }
    let span = usize::from(to.saturating_sub(from));
    let offset = (span * done.min(total)) / total;
    from.saturating_add(u8::try_from(offset).unwrap_or(u8::MAX))
        .min(to)
}

#[cfg(test)]
mod tests {
    use stock_sync_models::{ColumnMapping, OperationValue, RunStatus, Severity};
    use tokio::sync::Notify;

    use super::*;
    use crate::history::JsonHistoryStore;
    use crate::testing::{
        FakeClient, FakeConnector, LOCATION_ID, RecordingSink, catalog, csv_file, run_config,
    };

    const ROWS: &[&str] = &[
        "sku,name,price,stock",
        "W-S,Widget small,11.50,5",
        "W-L,Widget large,12.00,3",
        "G-1,Gadget,5.00,7",
        "NOPE,Unknown,1.00,1",
    ];

    fn orchestrator(client: &Arc<FakeClient>, sink: &Arc<RecordingSink>) -> SyncOrchestrator {
        SyncOrchestrator::new(Arc::new(FakeConnector(client.clone())), sink.clone())
    }

    #[test]
    fn scaling_stays_in_range() {
        assert_eq!(scaled(50, 75, 0, 4), 50);
        assert_eq!(scaled(50, 75, 2, 4), 62);
        assert_eq!(scaled(50, 75, 4, 4), 75);
        assert_eq!(scaled(75, 100, 9, 4), 100);
        assert_eq!(scaled(75, 100, 0, 0), 100);
    }

    #[tokio::test]
    async fn full_run_applies_changed_values() {
        let file = csv_file(ROWS);
        let client = Arc::new(FakeClient::new(catalog()));
        let sink = Arc::new(RecordingSink::default());

        let result = orchestrator(&client, &sink)
            .run(&run_config(file.path().to_path_buf()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.stage, SyncStage::Done);
        assert_eq!(result.total_rows, 4);
        assert_eq!(result.total_matched, 3);
        assert_eq!(result.unmatched.len(), 1);
        assert_eq!(result.unmatched[0].reason, UnmatchedReason::NoMatch);

        // One changed price (W-S) and two changed stock levels (W-S, W-L).
        assert_eq!(result.total_planned, 3);
        assert_eq!(result.total_success, 3);
        assert_eq!(result.total_executed, 3);

        let prices = client.price_calls.lock().unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].0, "p1");
        assert_eq!(prices[0].1[0].new_price, "11.50");

        let inventory = client.inventory_calls.lock().unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory[0].0, LOCATION_ID);
        assert_eq!(inventory[0].1.len(), 2);

        let progress = sink.progress.lock().unwrap();
        assert!(progress.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(progress.last().map(|p| p.percent), Some(100));
        assert_eq!(sink.results.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_plans_without_mutations() {
        let file = csv_file(ROWS);
        let client = Arc::new(FakeClient::new(catalog()));
        let sink = Arc::new(RecordingSink::default());

        let result = orchestrator(&client, &sink)
            .plan(&run_config(file.path().to_path_buf()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::DryRun);
        assert_eq!(result.stage, SyncStage::Done);
        assert_eq!(result.total_planned, 3);
        assert_eq!(result.planned.len(), 3);
        assert_eq!(result.total_executed, 0);
        assert_eq!(client.mutation_count(), 0);
        assert_eq!(*sink.previews.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn out_of_range_mapping_rejects_rows() {
        let file = csv_file(&["sku,name,price,stock", "W-S,Widget,11.50,5", "G-1,Gadget,6.00,1"]);
        let client = Arc::new(FakeClient::new(catalog()));
        let sink = Arc::new(RecordingSink::default());
        let mut config = run_config(file.path().to_path_buf());
        config.mapping = ColumnMapping::new("A", "B", "C", "E");

        let result = orchestrator(&client, &sink)
            .run(&config, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total_rows, 2);
        assert_eq!(result.total_planned, 0);
        assert_eq!(result.unmatched.len(), 2);
        assert!(
            result
                .unmatched
                .iter()
                .all(|u| u.reason == UnmatchedReason::MappingOutOfRange)
        );
        assert_eq!(result.unmatched[0].sku, "W-S");
        assert_eq!(client.mutation_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_run_executes_nothing() {
        let file = csv_file(ROWS);
        let client = Arc::new(FakeClient::new(catalog()));
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator(&client, &sink)
            .run(&run_config(file.path().to_path_buf()), cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(client.mutation_count(), 0);

        let results = sink.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, RunStatus::Cancelled);
        assert_eq!(results[0].stage, SyncStage::Cancelled);
        assert_eq!(results[0].total_executed, 0);
    }

    #[tokio::test]
    async fn cancel_before_catalog_is_ready_sends_nothing() {
        let file = csv_file(ROWS);
        let gate = Arc::new(Notify::new());
        let client = Arc::new(FakeClient {
            snapshot: catalog(),
            gate: Some(gate.clone()),
            ..FakeClient::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonHistoryStore::new(dir.path().join("history.json"), 10));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Arc::new(orchestrator(&client, &sink).with_history(store.clone()));
        let cancel = CancellationToken::new();

        let run = {
            let orchestrator = orchestrator.clone();
            let config = run_config(file.path().to_path_buf());
            let cancel = cancel.clone();
            tokio::spawn(async move { orchestrator.run(&config, cancel).await })
        };
        while !orchestrator.is_running() {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        gate.notify_one();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(client.mutation_count(), 0);
        assert_eq!(*sink.previews.lock().unwrap(), 0);

        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result.status, RunStatus::Cancelled);
        assert_eq!(entries[0].result.total_executed, 0);
    }

    #[tokio::test]
    async fn cancel_after_planning_skips_every_operation() {
        let file = csv_file(ROWS);
        let client = Arc::new(FakeClient::new(catalog()));
        let cancel = CancellationToken::new();
        let sink = Arc::new(RecordingSink {
            cancel_on_preview: Some(cancel.clone()),
            ..RecordingSink::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonHistoryStore::new(dir.path().join("history.json"), 10));

        let err = orchestrator(&client, &sink)
            .with_history(store.clone())
            .run(&run_config(file.path().to_path_buf()), cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(client.mutation_count(), 0);

        let results = sink.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.stage, SyncStage::Cancelled);
        assert_eq!(result.total_planned, 3);
        assert_eq!(result.total_executed, 0);
        assert_eq!(result.total_skipped, 3);
        assert!(result.operations.iter().all(|op| {
            op.status == OperationStatus::Skipped && op.error_code == Some(ErrorCode::SyncCancelled)
        }));

        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result.status, RunStatus::Cancelled);
        assert_eq!(entries[0].result.total_skipped, 3);
    }

    #[tokio::test]
    async fn empty_catalog_is_fatal() {
        let file = csv_file(ROWS);
        let client = Arc::new(FakeClient::default());
        let sink = Arc::new(RecordingSink::default());

        let err = orchestrator(&client, &sink)
            .run(&run_config(file.path().to_path_buf()), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::CatalogEmpty));
        assert_eq!(err.severity(), Severity::Fatal);
        let results = sink.results.lock().unwrap();
        assert_eq!(results[0].status, RunStatus::Failed);
        assert_eq!(
            results[0].error.as_ref().map(|e| e.code),
            Some(ErrorCode::CatalogEmpty)
        );
    }

    #[tokio::test]
    async fn unauthorized_catalog_load_fails_the_run() {
        let file = csv_file(ROWS);
        let client = Arc::new(FakeClient {
            snapshot: catalog(),
            unauthorized: true,
            ..FakeClient::default()
        });
        let sink = Arc::new(RecordingSink::default());

        let err = orchestrator(&client, &sink)
            .run(&run_config(file.path().to_path_buf()), CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::RemoteUnauthorized);
        assert!(err.requires_attention());
        assert_eq!(sink.results.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_one_is_active() {
        let file = csv_file(ROWS);
        let gate = Arc::new(Notify::new());
        let client = Arc::new(FakeClient {
            snapshot: catalog(),
            gate: Some(gate.clone()),
            ..FakeClient::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Arc::new(orchestrator(&client, &sink));
        let config = run_config(file.path().to_path_buf());

        let first = {
            let orchestrator = orchestrator.clone();
            let config = config.clone();
            tokio::spawn(async move { orchestrator.run(&config, CancellationToken::new()).await })
        };
        while !orchestrator.is_running() {
            tokio::task::yield_now().await;
        }

        let err = orchestrator
            .run(&config, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadyRunning));
        assert!(sink.results.lock().unwrap().is_empty());

        gate.notify_one();
        let result = first.await.unwrap().unwrap();
        assert_eq!(result.status, RunStatus::Success);
        assert!(!orchestrator.is_running());
        assert_eq!(sink.results.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finished_runs_are_recorded_in_history() {
        let file = csv_file(ROWS);
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonHistoryStore::new(dir.path().join("history.json"), 10));
        let client = Arc::new(FakeClient::new(catalog()));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(&client, &sink).with_history(store.clone());
        let config = run_config(file.path().to_path_buf());

        orchestrator
            .plan(&config, CancellationToken::new())
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        orchestrator.run(&config, cancel).await.unwrap_err();

        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].result.status, RunStatus::Cancelled);
        assert_eq!(entries[1].result.status, RunStatus::DryRun);
        assert!(entries[1].config_summary.dry_run);
        assert!(entries[0].source_file_name.ends_with(".csv"));
    }

    #[tokio::test]
    async fn smoke_test_applies_first_positive_stock_update() {
        let file = csv_file(ROWS);
        let client = Arc::new(FakeClient::new(catalog()));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(&client, &sink);
        let config = run_config(file.path().to_path_buf());

        let preview = orchestrator
            .plan(&config, CancellationToken::new())
            .await
            .unwrap();
        let result = orchestrator
            .smoke_test(&config, &preview.planned, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.total_planned, 1);
        assert_eq!(result.total_success, 1);
        assert!(client.price_calls.lock().unwrap().is_empty());

        let inventory = client.inventory_calls.lock().unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory[0].1.len(), 1);
        assert_eq!(inventory[0].1[0].inventory_item_id, "item-v1");
        assert_eq!(inventory[0].1[0].quantity, 5);
    }

    #[tokio::test]
    async fn smoke_test_needs_a_positive_candidate() {
        let file = csv_file(ROWS);
        let client = Arc::new(FakeClient::new(catalog()));
        let sink = Arc::new(RecordingSink::default());
        let config = run_config(file.path().to_path_buf());
        let planned = vec![PlannedOperation {
            id: "inventory-1".to_owned(),
            kind: OperationKind::Inventory,
            sku: "W-S".to_owned(),
            product_title: "Widget".to_owned(),
            variant_title: "Small".to_owned(),
            old_value: Some(OperationValue::Quantity(2)),
            new_value: OperationValue::Quantity(0),
        }];

        let err = orchestrator(&client, &sink)
            .smoke_test(&config, &planned, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SmokeTestNoCandidate));
        assert_eq!(client.mutation_count(), 0);
    }

    #[tokio::test]
    async fn smoke_test_falls_back_to_titles() {
        let file = csv_file(ROWS);
        let client = Arc::new(FakeClient::new(catalog()));
        let sink = Arc::new(RecordingSink::default());
        let config = run_config(file.path().to_path_buf());
        let candidate = |sku: &str, product: &str| PlannedOperation {
            id: "inventory-1".to_owned(),
            kind: OperationKind::Inventory,
            sku: sku.to_owned(),
            product_title: product.to_owned(),
            variant_title: "Large".to_owned(),
            old_value: None,
            new_value: OperationValue::Quantity(4),
        };
        let orchestrator = orchestrator(&client, &sink);

        orchestrator
            .smoke_test(&config, &[candidate("", "Widget")], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            client.inventory_calls.lock().unwrap()[0].1[0].variant_id,
            "v2"
        );

        let err = orchestrator
            .smoke_test(&config, &[candidate("", "Nothing")], CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SmokeTestVariantNotFound);
    }

    #[tokio::test]
    async fn smoke_test_with_unknown_sku_does_not_match_titles() {
        let file = csv_file(ROWS);
        let client = Arc::new(FakeClient::new(catalog()));
        let sink = Arc::new(RecordingSink::default());
        let config = run_config(file.path().to_path_buf());
        let planned = vec![PlannedOperation {
            id: "inventory-1".to_owned(),
            kind: OperationKind::Inventory,
            sku: "GONE-1".to_owned(),
            product_title: "Widget".to_owned(),
            variant_title: "Large".to_owned(),
            old_value: None,
            new_value: OperationValue::Quantity(4),
        }];

        let err = orchestrator(&client, &sink)
            .smoke_test(&config, &planned, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::SmokeTestVariantNotFound { ref reference } if reference == "GONE-1"
        ));
        assert_eq!(client.mutation_count(), 0);
    }
}
