//! Catalog client trait and its GraphQL implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use stock_sync_models::{
    CatalogSnapshot, InventoryUpdate, Location, PriceUpdate, Product, ShopCredentials, Variant,
};

use crate::RemoteError;
use crate::queries;
use crate::rate_limit::CallMetadata;
use crate::retry::{self, RetryPolicy};

/// Header the admin API reads the access token from.
const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A value together with the usage metadata of the call that produced it.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub metadata: CallMetadata,
}

/// A per-item rejection inside a bulk mutation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemError {
    /// Path to the offending input, e.g. `["variants", "0", "price"]`.
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl ItemError {
    /// Whether this error points at the item at `index` with id `id`.
    #[must_use]
    pub fn refers_to(&self, index: usize, id: &str) -> bool {
        let index = index.to_string();
        self.field
            .iter()
            .flatten()
            .any(|segment| segment == &index || segment.contains(id))
    }
}

/// Result of one bulk mutation that reached the platform.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub item_errors: Vec<ItemError>,
    pub metadata: CallMetadata,
}

/// Operations on the remote catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Loads every product and variant, with available quantities at
    /// `location_id` when given.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if any page cannot be fetched.
    async fn load_catalog(
        &self,
        location_id: Option<&str>,
    ) -> Result<Fetched<CatalogSnapshot>, RemoteError>;

    /// # Errors
    ///
    /// Returns [`RemoteError`] if the request fails.
    async fn load_locations(&self) -> Result<Fetched<Vec<Location>>, RemoteError>;

    /// Looks up a single location.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::LocationNotFound`] if the shop has no such
    /// location.
    async fn find_location(&self, location_id: &str) -> Result<Location, RemoteError> {
        self.load_locations()
            .await?
            .value
            .into_iter()
            .find(|l| l.id == location_id)
            .ok_or_else(|| RemoteError::LocationNotFound {
                location_id: location_id.to_owned(),
            })
    }

    /// Sets new prices on variants of one product in a single call.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the call itself fails. Rejections of
    /// individual variants are reported in [`BatchOutcome::item_errors`].
    async fn apply_price_batch(
        &self,
        product_id: &str,
        updates: &[PriceUpdate],
    ) -> Result<BatchOutcome, RemoteError>;

    /// Sets absolute available quantities at `location_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the call itself fails.
    async fn apply_inventory_batch(
        &self,
        location_id: &str,
        updates: &[InventoryUpdate],
    ) -> Result<BatchOutcome, RemoteError>;
}

/// Builds a [`CatalogClient`] bound to a set of credentials.
pub trait CatalogConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the client cannot be constructed.
    fn connect(&self, credentials: &ShopCredentials) -> Result<Arc<dyn CatalogClient>, RemoteError>;
}

/// Connector producing [`GraphqlClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphqlConnector {
    policy: RetryPolicy,
}

impl GraphqlConnector {
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl CatalogConnector for GraphqlConnector {
    fn connect(&self, credentials: &ShopCredentials) -> Result<Arc<dyn CatalogClient>, RemoteError> {
        Ok(Arc::new(
            GraphqlClient::new(credentials.clone())?.with_policy(self.policy),
        ))
    }
}

// ── Response shapes ─────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<T> {
    page_info: Option<PageInfo>,
    nodes: Vec<T>,
}

impl<T> Connection<T> {
    fn next_cursor(&self) -> Option<String> {
        self.page_info
            .as_ref()
            .filter(|p| p.has_next_page)
            .and_then(|p| p.end_cursor.clone())
    }
}

#[derive(Deserialize)]
struct ProductNode {
    id: String,
    title: String,
    variants: Connection<VariantNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariantNode {
    id: String,
    sku: Option<String>,
    barcode: Option<String>,
    title: String,
    price: Value,
    inventory_item: Option<InventoryItemNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InventoryItemNode {
    id: String,
    #[serde(default)]
    inventory_level: Option<InventoryLevelNode>,
}

#[derive(Deserialize)]
struct InventoryLevelNode {
    quantities: Vec<QuantityNode>,
}

#[derive(Deserialize)]
struct QuantityNode {
    name: String,
    quantity: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutationPayload {
    #[serde(default)]
    user_errors: Vec<ItemError>,
}

impl VariantNode {
    fn into_variant(self, product_id: &str) -> Variant {
        let price = match self.price {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        let (inventory_item_id, current_quantity) = match self.inventory_item {
            Some(item) => {
                let available = item.inventory_level.and_then(|level| {
                    level
                        .quantities
                        .into_iter()
                        .find(|q| q.name == "available")
                        .map(|q| q.quantity)
                });
                (Some(item.id), available)
            }
            None => (None, None),
        };
        Variant {
            id: self.id,
            product_id: product_id.to_owned(),
            sku: self.sku.filter(|s| !s.is_empty()),
            barcode: self.barcode.filter(|b| !b.is_empty()),
            title: self.title,
            price,
            inventory_item_id,
            current_quantity,
        }
    }
}

/// Pulls `data.<pointer>` out of a response and deserializes it.
fn extract<T: DeserializeOwned>(body: &Value, pointer: &str) -> Result<T, RemoteError> {
    let value = body
        .pointer(pointer)
        .filter(|v| !v.is_null())
        .ok_or_else(|| RemoteError::InvalidResponse {
            message: format!("missing {pointer}"),
        })?;
    Ok(T::deserialize(value)?)
}

// ── GraphQL client ──────────────────────────────────────────────────

/// [`CatalogClient`] over the GraphQL admin API.
pub struct GraphqlClient {
    client: reqwest::Client,
    credentials: ShopCredentials,
    policy: RetryPolicy,
}

impl std::fmt::Debug for GraphqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlClient")
            .field("credentials", &self.credentials)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl GraphqlClient {
    /// # Errors
    ///
    /// Returns [`RemoteError::Http`] if the HTTP client cannot be built.
    pub fn new(credentials: ShopCredentials) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            credentials,
            policy: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs one GraphQL document with retries.
    ///
    /// # Errors
    ///
    /// See [`retry::send_graphql`].
    pub async fn execute(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<(Value, CallMetadata), RemoteError> {
        let url = self.credentials.graphql_url();
        let payload = json!({ "query": query, "variables": variables });
        retry::send_graphql(&self.policy, || {
            self.client
                .post(&url)
                .header(ACCESS_TOKEN_HEADER, &self.credentials.access_token)
                .json(&payload)
        })
        .await
    }

    async fn remaining_variants(
        &self,
        product_id: &str,
        mut cursor: Option<String>,
        location_id: Option<&str>,
        variants: &mut Vec<Variant>,
    ) -> Result<CallMetadata, RemoteError> {
        let mut metadata = CallMetadata::default();
        while let Some(after) = cursor.take() {
            let (query, variables) = location_id.map_or_else(
                || {
                    (
                        queries::PRODUCT_VARIANTS_NO_LOCATION,
                        json!({ "id": product_id, "first": queries::VARIANTS_PAGE_SIZE, "after": after }),
                    )
                },
                |location| {
                    (
                        queries::PRODUCT_VARIANTS,
                        json!({
                            "id": product_id,
                            "first": queries::VARIANTS_PAGE_SIZE,
                            "after": after,
                            "locationId": location,
                        }),
                    )
                },
            );
            let (body, meta) = self.execute(query, variables).await?;
            metadata = metadata.merge(meta);

            let page: Connection<VariantNode> = extract(&body, "/data/product/variants")?;
            cursor = page.next_cursor();
            variants.extend(page.nodes.into_iter().map(|v| v.into_variant(product_id)));
        }
        Ok(metadata)
    }
}

#[async_trait]
impl CatalogClient for GraphqlClient {
    async fn load_catalog(
        &self,
        location_id: Option<&str>,
    ) -> Result<Fetched<CatalogSnapshot>, RemoteError> {
        let mut products = Vec::new();
        let mut metadata = CallMetadata::default();
        let mut after: Option<String> = None;
        let mut page_number = 0;

        loop {
            page_number += 1;
            let (query, variables) = match location_id {
                Some(location) => (
                    queries::CATALOG_PAGE,
                    json!({
                        "first": queries::PRODUCTS_PAGE_SIZE,
                        "after": after,
                        "variantsFirst": queries::VARIANTS_PAGE_SIZE,
                        "locationId": location,
                    }),
                ),
                None => (
                    queries::CATALOG_PAGE_NO_LOCATION,
                    json!({
                        "first": queries::PRODUCTS_PAGE_SIZE,
                        "after": after,
                        "variantsFirst": queries::VARIANTS_PAGE_SIZE,
                    }),
                ),
            };
            let (body, meta) = self.execute(query, variables).await?;
            metadata = metadata.merge(meta);

            let page: Connection<ProductNode> = extract(&body, "/data/products")?;
            let next = page.next_cursor();
            log::debug!(
                "[remote] catalog page {page_number}: {} product(s)",
                page.nodes.len()
            );

            for node in page.nodes {
                let variant_cursor = node.variants.next_cursor();
                let mut variants: Vec<Variant> = node
                    .variants
                    .nodes
                    .into_iter()
                    .map(|v| v.into_variant(&node.id))
                    .collect();
                if variant_cursor.is_some() {
                    let meta = self
                        .remaining_variants(&node.id, variant_cursor, location_id, &mut variants)
                        .await?;
                    metadata = metadata.merge(meta);
                }
                products.push(Product {
                    id: node.id,
                    title: node.title,
                    variants,
                });
            }

            match next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        let snapshot = CatalogSnapshot::new(products);
        log::info!(
            "[remote] loaded {} product(s), {} variant(s) in {page_number} page(s)",
            snapshot.products.len(),
            snapshot.variant_count()
        );
        Ok(Fetched {
            value: snapshot,
            metadata,
        })
    }

    async fn load_locations(&self) -> Result<Fetched<Vec<Location>>, RemoteError> {
        let mut locations = Vec::new();
        let mut metadata = CallMetadata::default();
        let mut after: Option<String> = None;

        loop {
            let (body, meta) = self
                .execute(
                    queries::LOCATIONS,
                    json!({ "first": queries::LOCATIONS_PAGE_SIZE, "after": after }),
                )
                .await?;
            metadata = metadata.merge(meta);

            let page: Connection<Location> = extract(&body, "/data/locations")?;
            let next = page.next_cursor();
            locations.extend(page.nodes);
            match next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        log::debug!("[remote] loaded {} location(s)", locations.len());
        Ok(Fetched {
            value: locations,
            metadata,
        })
    }

    async fn find_location(&self, location_id: &str) -> Result<Location, RemoteError> {
        let (body, _) = self
            .execute(queries::LOCATION, json!({ "id": location_id }))
            .await?;
        match body.pointer("/data/location") {
            Some(v) if !v.is_null() => Ok(Location::deserialize(v)?),
            _ => Err(RemoteError::LocationNotFound {
                location_id: location_id.to_owned(),
            }),
        }
    }

    async fn apply_price_batch(
        &self,
        product_id: &str,
        updates: &[PriceUpdate],
    ) -> Result<BatchOutcome, RemoteError> {
        let variants: Vec<Value> = updates
            .iter()
            .map(|u| json!({ "id": u.variant_id, "price": u.new_price }))
            .collect();
        let (body, metadata) = self
            .execute(
                queries::PRODUCT_VARIANTS_BULK_UPDATE,
                json!({ "productId": product_id, "variants": variants }),
            )
            .await?;
        let payload: MutationPayload = extract(&body, "/data/productVariantsBulkUpdate")?;
        Ok(BatchOutcome {
            item_errors: payload.user_errors,
            metadata,
        })
    }

    async fn apply_inventory_batch(
        &self,
        location_id: &str,
        updates: &[InventoryUpdate],
    ) -> Result<BatchOutcome, RemoteError> {
        let quantities: Vec<Value> = updates
            .iter()
            .map(|u| {
                json!({
                    "inventoryItemId": u.inventory_item_id,
                    "locationId": location_id,
                    "quantity": u.quantity,
                })
            })
            .collect();
        let input = json!({
            "name": "available",
            "reason": "correction",
            "ignoreCompareQuantity": true,
            "quantities": quantities,
        });
        let (body, metadata) = self
            .execute(queries::INVENTORY_SET_QUANTITIES, json!({ "input": input }))
            .await?;
        let payload: MutationPayload = extract(&body, "/data/inventorySetQuantities")?;
        Ok(BatchOutcome {
            item_errors: payload.user_errors,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> GraphqlClient {
        let credentials = ShopCredentials::new(&server.uri(), "shpat_test_token");
        GraphqlClient::new(credentials)
            .unwrap()
            .with_policy(RetryPolicy::immediate(2))
    }

    #[test]
    fn item_errors_attribute_by_index_or_id() {
        let by_index = ItemError {
            field: Some(vec!["variants".into(), "1".into(), "price".into()]),
            message: "bad".into(),
            code: None,
        };
        assert!(by_index.refers_to(1, "gid://shopify/ProductVariant/9"));
        assert!(!by_index.refers_to(0, "gid://shopify/ProductVariant/8"));

        let by_id = ItemError {
            field: Some(vec!["gid://shopify/InventoryItem/5".into()]),
            message: "bad".into(),
            code: None,
        };
        assert!(by_id.refers_to(3, "gid://shopify/InventoryItem/5"));

        let unattributed = ItemError {
            field: None,
            message: "bad".into(),
            code: None,
        };
        assert!(!unattributed.refers_to(0, "x"));
    }

    #[tokio::test]
    async fn loads_catalog_with_quantities() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/api/2025-10/graphql.json"))
            .and(header("X-Shopify-Access-Token", "shpat_test_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Shopify-Shop-Api-Call-Limit", "4/40")
                    .set_body_json(json!({
                        "data": {
                            "products": {
                                "pageInfo": { "hasNextPage": false, "endCursor": null },
                                "nodes": [{
                                    "id": "gid://shopify/Product/1",
                                    "title": "Shirt",
                                    "variants": {
                                        "pageInfo": { "hasNextPage": false, "endCursor": null },
                                        "nodes": [{
                                            "id": "gid://shopify/ProductVariant/1",
                                            "sku": "SKU-001",
                                            "barcode": "",
                                            "title": "M",
                                            "price": "10.00",
                                            "inventoryItem": {
                                                "id": "gid://shopify/InventoryItem/1",
                                                "inventoryLevel": {
                                                    "quantities": [
                                                        { "name": "available", "quantity": 7 }
                                                    ]
                                                }
                                            }
                                        }]
                                    }
                                }]
                            }
                        }
                    })),
            )
            .mount(&server)
            .await;

        let fetched = client_for(&server)
            .load_catalog(Some("gid://shopify/Location/1"))
            .await
            .unwrap();
        let snapshot = fetched.value;
        assert_eq!(snapshot.variant_count(), 1);
        let variant = &snapshot.products[0].variants[0];
        assert_eq!(variant.sku.as_deref(), Some("SKU-001"));
        assert_eq!(variant.barcode, None);
        assert_eq!(variant.current_quantity, Some(7));
        assert_eq!(variant.product_id, "gid://shopify/Product/1");
        assert_eq!(fetched.metadata.rate_limit.map(|r| r.used), Some(4));
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client_for(&server).load_locations().await.unwrap_err();
        assert!(matches!(err, RemoteError::Unauthorized));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_errors_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).load_locations().await.unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Server {
                status: 503,
                attempts: 3
            }
        ));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn throttled_graphql_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{ "message": "Throttled", "extensions": { "code": "THROTTLED" } }]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "locations": { "nodes": [
                    { "id": "gid://shopify/Location/1", "name": "Main" }
                ] } }
            })))
            .mount(&server)
            .await;

        let locations = client_for(&server).load_locations().await.unwrap().value;
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].name, "Main");
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn locations_follow_page_cursors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "locations": {
                    "pageInfo": { "hasNextPage": true, "endCursor": "cursor-1" },
                    "nodes": [{ "id": "gid://shopify/Location/1", "name": "Main" }]
                } }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "locations": {
                    "pageInfo": { "hasNextPage": false, "endCursor": "cursor-2" },
                    "nodes": [{ "id": "gid://shopify/Location/2", "name": "Warehouse" }]
                } }
            })))
            .mount(&server)
            .await;

        let locations = client_for(&server).load_locations().await.unwrap().value;
        let names: Vec<&str> = locations.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["Main", "Warehouse"]);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let first: Value = serde_json::from_slice(&requests[0].body).unwrap();
        let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(first.pointer("/variables/after"), Some(&Value::Null));
        assert_eq!(
            second.pointer("/variables/after").and_then(Value::as_str),
            Some("cursor-1")
        );
    }

    #[tokio::test]
    async fn missing_location_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "location": null } })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .find_location("gid://shopify/Location/404")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::LocationNotFound { .. }));
    }
}
