//! Marketplace order domain model shared by the client, pipeline, and server.
//!
//! Every type here serializes to the camelCase JSON shape the dashboard UI
//! and the on-disk snapshots use.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));

/// Normalized order status. Serialized as its display label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum OrderStatus {
    Pending,
    Unshipped,
    PartiallyShipped,
    Shipped,
    InTransit,
    Completed,
    Canceled,
    Unfulfillable,
    InvoiceUnconfirmed,
    PendingAvailability,
    /// Upstream code with no entry in the translation table, kept verbatim.
    Other(String),
}

impl OrderStatus {
    /// Translates a raw upstream status code. Unknown codes become
    /// [`OrderStatus::Other`] carrying the code unchanged.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "Pending" => Self::Pending,
            "Unshipped" => Self::Unshipped,
            "PartiallyShipped" => Self::PartiallyShipped,
            "Shipped" => Self::Shipped,
            "InTransit" => Self::InTransit,
            "Completed" => Self::Completed,
            "Canceled" => Self::Canceled,
            "Unfulfillable" => Self::Unfulfillable,
            "InvoiceUnconfirmed" => Self::InvoiceUnconfirmed,
            "PendingAvailability" => Self::PendingAvailability,
            other => Self::Other(other.to_string()),
        }
    }

    /// Dashboard display label.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Pending => "保留中",
            Self::Unshipped => "未発送",
            Self::PartiallyShipped => "一部発送済み",
            Self::Shipped => "発送済み",
            Self::InTransit => "配送中",
            Self::Completed => "完了",
            Self::Canceled => "キャンセル済み",
            Self::Unfulfillable => "出荷不可",
            Self::InvoiceUnconfirmed => "請求書未確認",
            Self::PendingAvailability => "予約注文",
            Self::Other(code) => code,
        }
    }

    /// Accepts either a display label (as written to snapshots) or a raw
    /// upstream code.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        const LABELED: [OrderStatus; 10] = [
            OrderStatus::Pending,
            OrderStatus::Unshipped,
            OrderStatus::PartiallyShipped,
            OrderStatus::Shipped,
            OrderStatus::InTransit,
            OrderStatus::Completed,
            OrderStatus::Canceled,
            OrderStatus::Unfulfillable,
            OrderStatus::InvoiceUnconfirmed,
            OrderStatus::PendingAvailability,
        ];
        LABELED
            .into_iter()
            .find(|s| s.label() == label)
            .unwrap_or_else(|| Self::from_code(label))
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Statuses after which the buyer has (or is about to have) the goods.
    #[must_use]
    pub fn permits_review_request(&self) -> bool {
        matches!(self, Self::Shipped | Self::InTransit | Self::Completed)
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Other(code) => code,
            known => known.label().to_string(),
        }
    }
}

impl From<String> for OrderStatus {
    fn from(label: String) -> Self {
        Self::from_label(&label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FulfillmentChannel {
    /// Fulfilled by the marketplace network.
    #[serde(rename = "AFN")]
    Afn,
    /// Fulfilled by the merchant.
    #[serde(rename = "MFN")]
    Mfn,
}

impl FulfillmentChannel {
    /// Anything other than the network code is merchant-fulfilled.
    #[must_use]
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some(c) if c.eq_ignore_ascii_case("AFN") => Self::Afn,
            _ => Self::Mfn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    #[must_use]
    pub fn zero(currency: &str) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency: currency.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyerInfo {
    pub buyer_email: Option<String>,
    pub buyer_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub name: Option<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub state_or_region: Option<String>,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
}

/// How far a line item has progressed through enrichment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Placeholder inserted by the parser; items not fetched yet.
    #[default]
    Pending,
    /// Item lookup hit the upstream quota; retried on a later sync.
    QuotaExceeded,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: String,
    pub title: String,
    pub asin: Option<String>,
    pub sku: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub image_url: Option<String>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    pub product_type: Option<String>,
    #[serde(default)]
    pub state: ItemState,
}

impl OrderItem {
    /// Stand-in item shown until enrichment fetches the real line items.
    #[must_use]
    pub fn placeholder(order_id: &str) -> Self {
        Self::stub(order_id, "loading", "読み込み中...", ItemState::Pending)
    }

    /// Stand-in item for an order whose item lookup was throttled.
    #[must_use]
    pub fn quota_exceeded(order_id: &str) -> Self {
        Self::stub(
            order_id,
            "quota",
            "API制限のため未取得 (次回同期で再取得)",
            ItemState::QuotaExceeded,
        )
    }

    fn stub(order_id: &str, suffix: &str, title: &str, state: ItemState) -> Self {
        Self {
            id: format!("{order_id}-{suffix}"),
            title: title.to_string(),
            asin: None,
            sku: None,
            quantity: 0,
            unit_price: Decimal::ZERO,
            image_url: None,
            brand: None,
            manufacturer: None,
            product_type: None,
            state,
        }
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.state != ItemState::Resolved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRequestStatus {
    Pending,
    Sent,
    Failed,
    Eligible,
    NotEligible,
    Error,
}

/// Why an order is or is not currently open for a review solicitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolicitationReason {
    Eligible,
    /// Inside the upstream waiting period after delivery.
    TooEarly,
    /// Upstream offered no solicitation action for an unknown reason.
    NotOffered,
    /// The eligibility lookup itself failed.
    CheckFailed,
    AlreadyRequested,
    /// Past the solicitation window; will never become eligible.
    WindowClosed,
}

impl SolicitationReason {
    /// Terminal reasons stop any further eligibility rechecks.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::AlreadyRequested | Self::WindowClosed)
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Eligible => "レビューリクエスト送信可能",
            Self::TooEarly => "配送後の待機期間中のため、まだ送信できません",
            Self::NotOffered => "現在レビューリクエストを送信できません",
            Self::CheckFailed => "送信可否の確認に失敗しました",
            Self::AlreadyRequested => "レビューリクエストは送信済みです",
            Self::WindowClosed => "送信可能期間を過ぎています",
        }
    }
}

/// Locally tracked review-solicitation state. Never regressed by a refetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewState {
    #[serde(rename = "reviewRequestSent", default)]
    pub request_sent: bool,
    #[serde(rename = "reviewRequestSentAt")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(rename = "reviewRequestStatus")]
    pub status: Option<ReviewRequestStatus>,
    /// `None` means eligibility was never checked.
    pub solicitation_eligible: Option<bool>,
    pub solicitation_reason: Option<String>,
    pub solicitation_reason_code: Option<SolicitationReason>,
    pub solicitation_checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub purchase_date: DateTime<Utc>,
    pub last_update_date: Option<DateTime<Utc>>,
    pub status: OrderStatus,
    pub fulfillment_channel: FulfillmentChannel,
    pub total: Money,
    pub items_shipped: u32,
    pub items_unshipped: u32,
    #[serde(default)]
    pub customer: Customer,
    pub buyer_info: Option<BuyerInfo>,
    pub shipping_address: Option<ShippingAddress>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(flatten)]
    pub review: ReviewState,
    /// Set when enrichment failed and this record is a degraded copy.
    pub enrichment_error: Option<String>,
}

impl Order {
    /// The address a review request can be delivered to: the top-level
    /// customer email, falling back to the buyer-info email.
    #[must_use]
    pub fn contact_email(&self) -> Option<&str> {
        let customer = self.customer.email.as_deref();
        let buyer = self
            .buyer_info
            .as_ref()
            .and_then(|b| b.buyer_email.as_deref());
        [customer, buyer]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|e| EMAIL_RE.is_match(e))
    }

    #[must_use]
    pub fn buyer_name(&self) -> Option<&str> {
        self.customer
            .name
            .as_deref()
            .or_else(|| self.buyer_info.as_ref().and_then(|b| b.buyer_name.as_deref()))
            .filter(|n| !n.trim().is_empty())
    }

    /// True when at least one item came back from the item lookup.
    #[must_use]
    pub fn has_resolved_items(&self) -> bool {
        self.items.iter().any(|i| !i.is_placeholder())
    }

    /// True when the items still need (re)fetching.
    #[must_use]
    pub fn needs_enrichment(&self) -> bool {
        self.items.is_empty() || self.items.iter().all(OrderItem::is_placeholder)
    }

    /// Records the outcome of an upstream eligibility lookup. A sent
    /// request keeps its `Sent` status.
    pub fn record_solicitation_check(
        &mut self,
        eligible: bool,
        reason: SolicitationReason,
        checked_at: DateTime<Utc>,
    ) {
        self.review.solicitation_eligible = Some(eligible);
        self.review.solicitation_reason = Some(reason.description().to_string());
        self.review.solicitation_reason_code = Some(reason);
        self.review.solicitation_checked_at = Some(checked_at);
        if !self.review.request_sent {
            self.review.status = Some(if eligible {
                ReviewRequestStatus::Eligible
            } else {
                ReviewRequestStatus::NotEligible
            });
        }
    }

    pub fn mark_review_sent(&mut self, sent_at: DateTime<Utc>) {
        self.review.request_sent = true;
        self.review.sent_at = Some(sent_at);
        self.review.status = Some(ReviewRequestStatus::Sent);
        self.review.solicitation_eligible = Some(false);
        self.review.solicitation_reason_code = Some(SolicitationReason::AlreadyRequested);
        self.review.solicitation_reason =
            Some(SolicitationReason::AlreadyRequested.description().to_string());
    }

    pub fn mark_review_failed(&mut self) {
        if !self.review.request_sent {
            self.review.status = Some(ReviewRequestStatus::Failed);
        }
    }

    /// Turns this order into the degraded copy returned when enrichment fails.
    pub fn degrade(&mut self, reason: impl Into<String>) {
        self.review.status = Some(ReviewRequestStatus::Error);
        self.enrichment_error = Some(reason.into());
    }
}

/// The unit stored in the cache and the durable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedOrderCollection {
    pub orders: Vec<Order>,
    pub last_updated: DateTime<Utc>,
    pub total_count: usize,
    pub data_fetched_at: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub next_token: Option<String>,
}

impl CachedOrderCollection {
    /// Builds a collection, dropping duplicate identifiers. Returns the
    /// identifiers that were collapsed so the caller can log them.
    #[must_use]
    pub fn new(orders: Vec<Order>, last_updated: DateTime<Utc>) -> (Self, Vec<String>) {
        let (orders, duplicates) = dedupe_orders(orders);
        let collection = Self {
            total_count: orders.len(),
            orders,
            last_updated,
            data_fetched_at: None,
            valid_until: None,
            next_token: None,
        };
        (collection, duplicates)
    }

    #[must_use]
    pub fn empty(last_updated: DateTime<Utc>) -> Self {
        Self::new(Vec::new(), last_updated).0
    }

    /// Re-runs the dedupe pass and refreshes `total_count`.
    pub fn normalize(&mut self) -> Vec<String> {
        let (orders, duplicates) = dedupe_orders(std::mem::take(&mut self.orders));
        self.orders = orders;
        self.total_count = self.orders.len();
        duplicates
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == id)
    }
}

/// Collapses orders sharing an identifier. The first occurrence keeps its
/// position; the last occurrence supplies the data. Returns the deduplicated
/// list and one entry per discarded duplicate.
#[must_use]
pub fn dedupe_orders(orders: Vec<Order>) -> (Vec<Order>, Vec<String>) {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(orders.len());
    let mut out: Vec<Order> = Vec::with_capacity(orders.len());
    let mut duplicates = Vec::new();

    for order in orders {
        if let Some(&idx) = positions.get(&order.id) {
            duplicates.push(order.id.clone());
            out[idx] = order;
        } else {
            positions.insert(order.id.clone(), out.len());
            out.push(order);
        }
    }

    (out, duplicates)
}

#[cfg(test)]
#[path = "orders_test.rs"]
mod tests;
