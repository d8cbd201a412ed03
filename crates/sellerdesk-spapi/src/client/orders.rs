use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Url;

use super::SpApiClient;
use crate::error::SpApiError;
use crate::pacing::Endpoint;
use crate::types::{Envelope, OrderItemsPayload, OrdersPage, OrdersPayload, OrdersQuery, RawOrderItem};

/// Upstream ceiling on `MaxResultsPerPage`.
pub const MAX_ORDERS_PER_PAGE: u32 = 100;

/// Guards against a cycling continuation token on the order-items endpoint.
const MAX_ITEM_PAGES: usize = 10;

impl SpApiClient {
    /// Fetches one page of the orders list.
    ///
    /// # Errors
    ///
    /// Any [`SpApiError`] from the request, or [`SpApiError::Deserialize`] if
    /// the payload does not match the orders shape.
    pub async fn get_orders_page(&self, query: &OrdersQuery) -> Result<OrdersPage, SpApiError> {
        let url = self.orders_url(query)?;
        let envelope: Envelope<OrdersPayload> = self
            .get_json(Endpoint::Orders, url, || "orders page".to_string())
            .await?;
        let payload = envelope.payload.unwrap_or_default();
        Ok(OrdersPage {
            orders: payload.orders,
            next_token: payload.next_token.filter(|t| !t.is_empty()),
        })
    }

    /// Fetches every line item of one order, following the item list's own
    /// continuation token.
    ///
    /// # Errors
    ///
    /// Any [`SpApiError`] from a page request. A failure on a later page
    /// discards the items already read for this order.
    pub async fn get_order_items(&self, order_id: &str) -> Result<Vec<RawOrderItem>, SpApiError> {
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;

        for _ in 0..MAX_ITEM_PAGES {
            let mut query: Vec<(&str, &str)> = Vec::new();
            if let Some(token) = next_token.as_deref() {
                query.push(("NextToken", token));
            }
            let url = self.build_url(&["orders", "v0", "orders", order_id, "orderItems"], &query)?;
            let envelope: Envelope<OrderItemsPayload> = self
                .get_json(Endpoint::OrderItems, url, || format!("order items for {order_id}"))
                .await?;
            let payload = envelope.payload.unwrap_or_default();
            items.extend(payload.order_items);

            match payload.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => return Ok(items),
            }
        }

        tracing::warn!(order_id, max_pages = MAX_ITEM_PAGES, "order items page cap reached");
        Ok(items)
    }

    pub(super) fn orders_url(&self, query: &OrdersQuery) -> Result<Url, SpApiError> {
        let page_size = query.max_results.clamp(1, MAX_ORDERS_PER_PAGE).to_string();
        let created_after = query.created_after.map(iso8601);
        let created_before = query.created_before.map(iso8601);
        let statuses = query.statuses.join(",");

        let mut params: Vec<(&str, &str)> = vec![
            ("MarketplaceIds", self.marketplace_id.as_str()),
            ("MaxResultsPerPage", page_size.as_str()),
        ];
        if let Some(after) = created_after.as_deref() {
            params.push(("CreatedAfter", after));
        }
        if let Some(before) = created_before.as_deref() {
            params.push(("CreatedBefore", before));
        }
        if !statuses.is_empty() {
            params.push(("OrderStatuses", statuses.as_str()));
        }
        if let Some(token) = query.next_token.as_deref() {
            params.push(("NextToken", token));
        }

        self.build_url(&["orders", "v0", "orders"], &params)
    }
}

fn iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
