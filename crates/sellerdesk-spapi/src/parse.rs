//! Conversion of upstream payloads into the domain model.
//!
//! Parsing never fails on bad numbers: counts, amounts, and quantities that
//! are missing or unparseable degrade to zero. Unknown status codes pass
//! through unchanged. Dates are the one hard requirement; an order whose
//! purchase date cannot be read is rejected so it never enters the store
//! with a fabricated timestamp.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sellerdesk_core::{
    BuyerInfo, Customer, FulfillmentChannel, ItemState, Money, Order, OrderItem, OrderStatus,
    ReviewState, ShippingAddress,
};
use thiserror::Error;

use crate::types::{RawMoney, RawOrder, RawOrderItem, RawShippingAddress};

/// Currency assumed when the upstream omits one.
pub const DEFAULT_CURRENCY: &str = "JPY";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("order {order_id}: unreadable purchase date \"{value}\"")]
    PurchaseDate { order_id: String, value: String },
}

/// Builds an [`Order`] with a single placeholder item. Line items are
/// filled in later by enrichment.
///
/// # Errors
///
/// Returns [`ParseError::PurchaseDate`] if `PurchaseDate` is not RFC 3339.
pub fn parse_order(raw: &RawOrder) -> Result<Order, ParseError> {
    let purchase_date =
        parse_timestamp(&raw.purchase_date).ok_or_else(|| ParseError::PurchaseDate {
            order_id: raw.amazon_order_id.clone(),
            value: raw.purchase_date.clone(),
        })?;

    let status = OrderStatus::from_code(raw.order_status.as_deref().unwrap_or("Pending"));
    if !status.is_known() {
        tracing::debug!(
            order_id = %raw.amazon_order_id,
            status = status.label(),
            "unknown order status code, passing through"
        );
    }

    let buyer_info = raw.buyer_info.as_ref().map(|b| BuyerInfo {
        buyer_email: non_blank(b.buyer_email.as_deref()),
        buyer_name: non_blank(b.buyer_name.as_deref()),
    });
    let shipping_address = raw.shipping_address.as_ref().map(parse_address);
    let customer = Customer {
        name: shipping_address
            .as_ref()
            .and_then(|a| a.name.clone())
            .or_else(|| buyer_info.as_ref().and_then(|b| b.buyer_name.clone())),
        email: None,
    };

    Ok(Order {
        id: raw.amazon_order_id.clone(),
        purchase_date,
        last_update_date: raw.last_update_date.as_deref().and_then(parse_timestamp),
        status,
        fulfillment_channel: FulfillmentChannel::from_code(raw.fulfillment_channel.as_deref()),
        total: parse_money(raw.order_total.as_ref()),
        items_shipped: count_or_zero(raw.number_of_items_shipped.as_ref()),
        items_unshipped: count_or_zero(raw.number_of_items_unshipped.as_ref()),
        customer,
        buyer_info,
        shipping_address,
        items: vec![OrderItem::placeholder(&raw.amazon_order_id)],
        review: ReviewState::default(),
        enrichment_error: None,
    })
}

/// Builds a resolved [`OrderItem`]. The unit price is the line total
/// divided by the ordered quantity.
#[must_use]
pub fn parse_order_item(raw: &RawOrderItem) -> OrderItem {
    let quantity = count_or_zero(raw.quantity_ordered.as_ref());
    let line_total = parse_money(raw.item_price.as_ref()).amount;
    let unit_price = if quantity > 0 {
        line_total / Decimal::from(quantity)
    } else {
        line_total
    };

    OrderItem {
        id: raw.order_item_id.clone(),
        title: raw
            .title
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        asin: non_blank(raw.asin.as_deref()),
        sku: non_blank(raw.seller_sku.as_deref()),
        quantity,
        unit_price,
        image_url: None,
        brand: None,
        manufacturer: None,
        product_type: None,
        state: ItemState::Resolved,
    }
}

fn parse_address(raw: &RawShippingAddress) -> ShippingAddress {
    ShippingAddress {
        name: non_blank(raw.name.as_deref()),
        address_line1: non_blank(raw.address_line1.as_deref()),
        city: non_blank(raw.city.as_deref()),
        state_or_region: non_blank(raw.state_or_region.as_deref()),
        postal_code: non_blank(raw.postal_code.as_deref()),
        country_code: non_blank(raw.country_code.as_deref()),
    }
}

fn parse_money(raw: Option<&RawMoney>) -> Money {
    let currency = raw
        .and_then(|m| non_blank(m.currency_code.as_deref()))
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    let amount = raw
        .and_then(|m| m.amount.as_ref())
        .and_then(decimal_from_value)
        .unwrap_or(Decimal::ZERO);
    Money { amount, currency }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn decimal_from_value(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Reads a non-negative integer count, degrading anything else to zero.
pub(crate) fn count_or_zero(value: Option<&serde_json::Value>) -> u32 {
    let parsed = match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.and_then(|n| u32::try_from(n).ok()).unwrap_or(0)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
#[path = "parse_test.rs"]
mod tests;
