//! In-memory collaborators for orchestrator and scheduler tests.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stock_sync_models::{
    CatalogSnapshot, ColumnMapping, InventoryUpdate, Location, MatchMode, PriceUpdate, Product,
    RunConfig, ShopCredentials, SyncLogEntry, SyncProgress, SyncResult, Variant,
};
use stock_sync_remote::{
    BatchOutcome, CallMetadata, CatalogClient, CatalogConnector, Fetched, RemoteError,
};
use tokio::sync::Notify;

use crate::SyncEventSink;

pub const LOCATION_ID: &str = "gid://shopify/Location/1";

pub fn variant(id: &str, sku: &str, title: &str, price: &str, quantity: i64) -> Variant {
    Variant {
        id: id.to_owned(),
        product_id: String::new(),
        sku: Some(sku.to_owned()),
        barcode: None,
        title: title.to_owned(),
        price: price.to_owned(),
        inventory_item_id: Some(format!("item-{id}")),
        current_quantity: Some(quantity),
    }
}

pub fn product(id: &str, title: &str, mut variants: Vec<Variant>) -> Product {
    for v in &mut variants {
        id.clone_into(&mut v.product_id);
    }
    Product {
        id: id.to_owned(),
        title: title.to_owned(),
        variants,
    }
}

/// Two products: a widget with two sizes and a single-variant gadget.
pub fn catalog() -> CatalogSnapshot {
    CatalogSnapshot::new(vec![
        product(
            "p1",
            "Widget",
            vec![
                variant("v1", "W-S", "Small", "10.00", 2),
                variant("v2", "W-L", "Large", "12.00", 0),
            ],
        ),
        product("p2", "Gadget", vec![variant("v3", "G-1", "Default", "5.00", 7)]),
    ])
}

/// Writes `lines` to a temporary `.csv` file.
pub fn csv_file(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".csv")
        .tempfile()
        .unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file.flush().unwrap();
    file
}

pub fn run_config(path: PathBuf) -> RunConfig {
    RunConfig {
        source_path: path,
        mapping: ColumnMapping::new("A", "B", "C", "D"),
        credentials: ShopCredentials::new("https://demo.myshopify.com", "token-123456"),
        location_id: Some(LOCATION_ID.to_owned()),
        update_prices: true,
        update_inventory: true,
        dry_run: false,
        match_mode: MatchMode::SkuOnly,
    }
}

/// A catalog client that records every mutation it receives.
#[derive(Default)]
pub struct FakeClient {
    pub snapshot: CatalogSnapshot,
    pub price_calls: Mutex<Vec<(String, Vec<PriceUpdate>)>>,
    pub inventory_calls: Mutex<Vec<(String, Vec<InventoryUpdate>)>>,
    /// When set, `load_catalog` waits for a notification first.
    pub gate: Option<Arc<Notify>>,
    pub unauthorized: bool,
}

impl FakeClient {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            snapshot,
            ..Self::default()
        }
    }

    pub fn mutation_count(&self) -> usize {
        self.price_calls.lock().unwrap().len() + self.inventory_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CatalogClient for FakeClient {
    async fn load_catalog(
        &self,
        _location_id: Option<&str>,
    ) -> Result<Fetched<CatalogSnapshot>, RemoteError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.unauthorized {
            return Err(RemoteError::Unauthorized);
        }
        Ok(Fetched {
            value: self.snapshot.clone(),
            metadata: CallMetadata::default(),
        })
    }

    async fn load_locations(&self) -> Result<Fetched<Vec<Location>>, RemoteError> {
        Ok(Fetched {
            value: vec![Location {
                id: LOCATION_ID.to_owned(),
                name: "Main store".to_owned(),
            }],
            metadata: CallMetadata::default(),
        })
    }

    async fn apply_price_batch(
        &self,
        product_id: &str,
        updates: &[PriceUpdate],
    ) -> Result<BatchOutcome, RemoteError> {
        self.price_calls
            .lock()
            .unwrap()
            .push((product_id.to_owned(), updates.to_vec()));
        Ok(BatchOutcome::default())
    }

    async fn apply_inventory_batch(
        &self,
        location_id: &str,
        updates: &[InventoryUpdate],
    ) -> Result<BatchOutcome, RemoteError> {
        self.inventory_calls
            .lock()
            .unwrap()
            .push((location_id.to_owned(), updates.to_vec()));
        Ok(BatchOutcome::default())
    }
}

/// Hands out the same [`FakeClient`] for any credentials.
pub struct FakeConnector(pub Arc<FakeClient>);

impl CatalogConnector for FakeConnector {
    fn connect(
        &self,
        _credentials: &ShopCredentials,
    ) -> Result<Arc<dyn CatalogClient>, RemoteError> {
        let client: Arc<dyn CatalogClient> = self.0.clone();
        Ok(client)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub progress: Mutex<Vec<SyncProgress>>,
    pub logs: Mutex<Vec<SyncLogEntry>>,
    pub previews: Mutex<usize>,
    pub results: Mutex<Vec<SyncResult>>,
    /// Cancelled once the plan is ready, before anything is executed.
    pub cancel_on_preview: Option<tokio_util::sync::CancellationToken>,
}

impl SyncEventSink for RecordingSink {
    fn progress(&self, progress: &SyncProgress) {
        self.progress.lock().unwrap().push(progress.clone());
    }

    fn log(&self, entry: &SyncLogEntry) {
        self.logs.lock().unwrap().push(entry.clone());
    }

    fn preview_ready(&self, _planned: &[stock_sync_models::PlannedOperation]) {
        *self.previews.lock().unwrap() += 1;
        if let Some(token) = &self.cancel_on_preview {
            token.cancel();
        }
    }

    fn complete(&self, result: &SyncResult) {
        self.results.lock().unwrap().push(result.clone());
    }
}
