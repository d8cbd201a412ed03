//! Upstream payload shapes.
//!
//! Orders and order-items responses use `PascalCase` keys; catalog and
//! solicitation responses use camelCase. Identifiers the pipeline cannot work
//! without (`AmazonOrderId`, `PurchaseDate`, `OrderItemId`) are required, so a
//! malformed payload fails at deserialization instead of leaking empty fields
//! further in. Numeric fields are kept loose (`serde_json::Value`) because the
//! upstream sends them as numbers on some marketplaces and strings on others;
//! the parser degrades unusable values to zero.

use serde::{Deserialize, Serialize};

/// Top-level envelope shared by the orders-family endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub payload: Option<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrdersPayload {
    #[serde(default)]
    pub orders: Vec<RawOrder>,
    pub next_token: Option<String>,
    pub created_before: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderItemsPayload {
    #[serde(default)]
    pub order_items: Vec<RawOrderItem>,
    pub next_token: Option<String>,
    pub amazon_order_id: Option<String>,
}

/// One order as returned by the orders list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawOrder {
    pub amazon_order_id: String,
    pub purchase_date: String,
    pub last_update_date: Option<String>,
    pub order_status: Option<String>,
    pub fulfillment_channel: Option<String>,
    pub order_total: Option<RawMoney>,
    pub number_of_items_shipped: Option<serde_json::Value>,
    pub number_of_items_unshipped: Option<serde_json::Value>,
    pub buyer_info: Option<RawBuyerInfo>,
    pub shipping_address: Option<RawShippingAddress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawMoney {
    pub currency_code: Option<String>,
    pub amount: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawBuyerInfo {
    pub buyer_email: Option<String>,
    pub buyer_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawShippingAddress {
    pub name: Option<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub state_or_region: Option<String>,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawOrderItem {
    pub order_item_id: String,
    #[serde(rename = "ASIN")]
    pub asin: Option<String>,
    pub seller_sku: Option<String>,
    pub title: Option<String>,
    pub quantity_ordered: Option<serde_json::Value>,
    pub item_price: Option<RawMoney>,
}

/// Catalog item detail. Only the summary, image, and product-type
/// sections requested via `includedData` are modelled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub asin: String,
    #[serde(default)]
    pub summaries: Vec<CatalogSummary>,
    #[serde(default)]
    pub images: Vec<CatalogImageSet>,
    #[serde(default)]
    pub product_types: Vec<CatalogProductType>,
}

impl CatalogItem {
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.summaries
            .iter()
            .find_map(|s| s.item_name.as_deref())
            .filter(|t| !t.trim().is_empty())
    }

    #[must_use]
    pub fn brand(&self) -> Option<&str> {
        self.summaries.iter().find_map(|s| s.brand.as_deref())
    }

    #[must_use]
    pub fn manufacturer(&self) -> Option<&str> {
        self.summaries.iter().find_map(|s| s.manufacturer.as_deref())
    }

    /// The `MAIN` image variant, falling back to the first image listed.
    #[must_use]
    pub fn main_image(&self) -> Option<&str> {
        let images = self.images.iter().flat_map(|set| set.images.iter());
        images
            .clone()
            .find(|i| i.variant.as_deref() == Some("MAIN"))
            .or_else(|| images.clone().next())
            .map(|i| i.link.as_str())
    }

    #[must_use]
    pub fn product_type(&self) -> Option<&str> {
        self.product_types
            .iter()
            .find_map(|p| p.product_type.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSummary {
    pub marketplace_id: Option<String>,
    pub item_name: Option<String>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogImageSet {
    pub marketplace_id: Option<String>,
    #[serde(default)]
    pub images: Vec<CatalogImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogImage {
    pub variant: Option<String>,
    pub link: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogProductType {
    pub marketplace_id: Option<String>,
    pub product_type: Option<String>,
}

/// Response of the solicitation-actions lookup. Eligibility is signalled by
/// the presence of the review action link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolicitationActions {
    #[serde(rename = "_links", default)]
    pub links: SolicitationLinks,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolicitationLinks {
    #[serde(default)]
    pub actions: Vec<SolicitationLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolicitationLink {
    pub href: Option<String>,
    pub name: String,
}

/// Action name that means "a review request may be sent now".
pub const REVIEW_ACTION: &str = "productReviewAndSellerFeedback";

impl SolicitationActions {
    #[must_use]
    pub fn offers_review_request(&self) -> bool {
        self.links.actions.iter().any(|a| a.name == REVIEW_ACTION)
    }
}

/// Filters for one orders-list page request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrdersQuery {
    pub created_after: Option<chrono::DateTime<chrono::Utc>>,
    pub created_before: Option<chrono::DateTime<chrono::Utc>>,
    pub statuses: Vec<String>,
    /// Clamped to the upstream ceiling of 100.
    pub max_results: u32,
    pub next_token: Option<String>,
}

/// One page of the orders list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrdersPage {
    pub orders: Vec<RawOrder>,
    pub next_token: Option<String>,
}
