//! GraphQL documents sent to the admin API.

/// Products per catalog page.
pub const PRODUCTS_PAGE_SIZE: u32 = 250;

/// Variants fetched per product. Products with more variants are paged
/// separately through [`PRODUCT_VARIANTS`].
pub const VARIANTS_PAGE_SIZE: u32 = 100;

/// One page of products with their variants and the quantity available at
/// `$locationId`.
pub const CATALOG_PAGE: &str = r#"
query CatalogPage($first: Int!, $after: String, $variantsFirst: Int!, $locationId: ID!) {
  products(first: $first, after: $after) {
    pageInfo { hasNextPage endCursor }
    nodes {
      id
      title
      variants(first: $variantsFirst) {
        pageInfo { hasNextPage endCursor }
        nodes {
          id
          sku
          barcode
          title
          price
          inventoryItem {
            id
            inventoryLevel(locationId: $locationId) {
              quantities(names: ["available"]) { name quantity }
            }
          }
        }
      }
    }
  }
}
"#;

/// Catalog page used when no location is configured.
pub const CATALOG_PAGE_NO_LOCATION: &str = r"
query CatalogPage($first: Int!, $after: String, $variantsFirst: Int!) {
  products(first: $first, after: $after) {
    pageInfo { hasNextPage endCursor }
    nodes {
      id
      title
      variants(first: $variantsFirst) {
        pageInfo { hasNextPage endCursor }
        nodes {
          id
          sku
          barcode
          title
          price
          inventoryItem { id }
        }
      }
    }
  }
}
";

/// Remaining variants of a single product.
pub const PRODUCT_VARIANTS: &str = r#"
query ProductVariants($id: ID!, $first: Int!, $after: String, $locationId: ID!) {
  product(id: $id) {
    variants(first: $first, after: $after) {
      pageInfo { hasNextPage endCursor }
      nodes {
        id
        sku
        barcode
        title
        price
        inventoryItem {
          id
          inventoryLevel(locationId: $locationId) {
            quantities(names: ["available"]) { name quantity }
          }
        }
      }
    }
  }
}
"#;

/// Remaining variants of a single product, without location data.
pub const PRODUCT_VARIANTS_NO_LOCATION: &str = r"
query ProductVariants($id: ID!, $first: Int!, $after: String) {
  product(id: $id) {
    variants(first: $first, after: $after) {
      pageInfo { hasNextPage endCursor }
      nodes {
        id
        sku
        barcode
        title
        price
        inventoryItem { id }
      }
    }
  }
}
";

/// Locations per page.
pub const LOCATIONS_PAGE_SIZE: u32 = 50;

pub const LOCATIONS: &str = r"
query Locations($first: Int!, $after: String) {
  locations(first: $first, after: $after) {
    pageInfo { hasNextPage endCursor }
    nodes { id name }
  }
}
";

pub const LOCATION: &str = r"
query Location($id: ID!) {
  location(id: $id) { id name }
}
";

/// Bulk price update for the variants of one product.
pub const PRODUCT_VARIANTS_BULK_UPDATE: &str = r"
mutation ProductVariantsBulkUpdate($productId: ID!, $variants: [ProductVariantsBulkInput!]!) {
  productVariantsBulkUpdate(productId: $productId, variants: $variants, allowPartialUpdates: true) {
    productVariants { id price }
    userErrors { field message code }
  }
}
";

/// Absolute stock levels for a batch of inventory items.
pub const INVENTORY_SET_QUANTITIES: &str = r"
mutation InventorySetQuantities($input: InventorySetQuantitiesInput!) {
  inventorySetQuantities(input: $input) {
    inventoryAdjustmentGroup { reason }
    userErrors { field message code }
  }
}
";
