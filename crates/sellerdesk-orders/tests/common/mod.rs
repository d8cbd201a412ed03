//! In-process `MarketplaceApi` fake shared by the pipeline and service tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{Duration, SecondsFormat, Utc};
use sellerdesk_spapi::types::{
    CatalogImage, CatalogImageSet, CatalogSummary, RawBuyerInfo, RawMoney, SolicitationLink,
    SolicitationLinks,
};
use sellerdesk_spapi::{
    CatalogItem, Endpoint, MarketplaceApi, OrdersPage, OrdersQuery, RawOrder, RawOrderItem,
    SolicitationActions, SpApiError, REVIEW_ACTION,
};
use serde_json::json;

/// A scripted upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fail {
    Status(u16),
    Throttled,
    Auth,
}

impl Fail {
    fn error(self, endpoint: Endpoint) -> SpApiError {
        match self {
            Fail::Status(status) => SpApiError::UnexpectedStatus {
                endpoint,
                status,
                body: "scripted failure".to_string(),
            },
            Fail::Throttled => SpApiError::RateLimited {
                endpoint,
                retry_after_secs: Some(2),
                body: "QuotaExceeded".to_string(),
            },
            Fail::Auth => SpApiError::Auth {
                status: Some(400),
                message: "invalid_grant".to_string(),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeApi {
    pages: Mutex<VecDeque<Result<OrdersPage, Fail>>>,
    /// When the script runs out, keep returning pages of this many fresh
    /// orders, each with a continuation token.
    endless_page_size: Option<usize>,
    generated: AtomicUsize,
    item_failures: Mutex<HashMap<String, Fail>>,
    eligible: Mutex<HashSet<String>>,
    solicitation_failures: Mutex<HashMap<String, Fail>>,
    create_failures: Mutex<HashMap<String, Fail>>,
    queries: Mutex<Vec<OrdersQuery>>,
    created: Mutex<Vec<String>>,
    pub orders_calls: AtomicUsize,
    pub item_calls: AtomicUsize,
    pub catalog_calls: AtomicUsize,
    pub solicitation_calls: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endless(page_size: usize) -> Self {
        Self {
            endless_page_size: Some(page_size),
            ..Self::default()
        }
    }

    pub fn push_page(&self, page: OrdersPage) -> &Self {
        self.pages.lock().unwrap().push_back(Ok(page));
        self
    }

    pub fn push_page_failure(&self, fail: Fail) -> &Self {
        self.pages.lock().unwrap().push_back(Err(fail));
        self
    }

    pub fn fail_items(&self, order_id: &str, fail: Fail) {
        self.item_failures
            .lock()
            .unwrap()
            .insert(order_id.to_string(), fail);
    }

    pub fn mark_eligible(&self, order_id: &str) {
        self.eligible.lock().unwrap().insert(order_id.to_string());
    }

    pub fn fail_solicitation_check(&self, order_id: &str, fail: Fail) {
        self.solicitation_failures
            .lock()
            .unwrap()
            .insert(order_id.to_string(), fail);
    }

    pub fn fail_create(&self, order_id: &str, fail: Fail) {
        self.create_failures
            .lock()
            .unwrap()
            .insert(order_id.to_string(), fail);
    }

    pub fn queries(&self) -> Vec<OrdersQuery> {
        self.queries.lock().unwrap().clone()
    }

    /// Order ids a solicitation was created for, in call order.
    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn generated_page(&self, size: usize) -> OrdersPage {
        let start = self.generated.fetch_add(size, Ordering::SeqCst);
        OrdersPage {
            orders: (start..start + size)
                .map(|n| raw_order(&format!("gen-{n:05}"), 7))
                .collect(),
            next_token: Some(format!("token-{}", start + size)),
        }
    }
}

impl MarketplaceApi for FakeApi {
    async fn get_orders_page(&self, query: &OrdersQuery) -> Result<OrdersPage, SpApiError> {
        self.orders_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());
        let scripted = self.pages.lock().unwrap().pop_front();
        match (scripted, self.endless_page_size) {
            (Some(Ok(page)), _) => Ok(page),
            (Some(Err(fail)), _) => Err(fail.error(Endpoint::Orders)),
            (None, Some(size)) => Ok(self.generated_page(size)),
            (None, None) => Ok(OrdersPage::default()),
        }
    }

    async fn get_order_items(&self, order_id: &str) -> Result<Vec<RawOrderItem>, SpApiError> {
        self.item_calls.fetch_add(1, Ordering::SeqCst);
        let fail = self.item_failures.lock().unwrap().get(order_id).copied();
        if let Some(fail) = fail {
            return Err(fail.error(Endpoint::OrderItems));
        }
        Ok(vec![raw_item(order_id, &asin_for(order_id))])
    }

    async fn get_catalog_item(&self, asin: &str) -> Result<CatalogItem, SpApiError> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        Ok(catalog_item(asin))
    }

    async fn get_solicitation_actions(
        &self,
        order_id: &str,
    ) -> Result<SolicitationActions, SpApiError> {
        self.solicitation_calls.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .solicitation_failures
            .lock()
            .unwrap()
            .get(order_id)
            .copied();
        if let Some(fail) = fail {
            return Err(fail.error(Endpoint::Solicitations));
        }
        let eligible = self.eligible.lock().unwrap().contains(order_id);
        let actions = if eligible {
            vec![SolicitationLink {
                href: Some(format!("/solicitations/v1/orders/{order_id}/solicitations/{REVIEW_ACTION}")),
                name: REVIEW_ACTION.to_string(),
            }]
        } else {
            Vec::new()
        };
        Ok(SolicitationActions {
            links: SolicitationLinks { actions },
        })
    }

    async fn create_review_solicitation(&self, order_id: &str) -> Result<(), SpApiError> {
        let fail = self.create_failures.lock().unwrap().get(order_id).copied();
        if let Some(fail) = fail {
            return Err(fail.error(Endpoint::Solicitations));
        }
        self.created.lock().unwrap().push(order_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn asin_for(order_id: &str) -> String {
    format!("B0{}", order_id.replace('-', ""))
}

/// A shipped order purchased `days_ago` days ago with a buyer email.
pub fn raw_order(id: &str, days_ago: i64) -> RawOrder {
    let purchased = Utc::now() - Duration::days(days_ago);
    RawOrder {
        amazon_order_id: id.to_string(),
        purchase_date: purchased.to_rfc3339_opts(SecondsFormat::Secs, true),
        last_update_date: None,
        order_status: Some("Shipped".to_string()),
        fulfillment_channel: Some("AFN".to_string()),
        order_total: Some(RawMoney {
            currency_code: Some("JPY".to_string()),
            amount: Some(json!("2480")),
        }),
        number_of_items_shipped: Some(json!(1)),
        number_of_items_unshipped: Some(json!(0)),
        buyer_info: Some(RawBuyerInfo {
            buyer_email: Some(format!("{id}@marketplace.amazon.co.jp")),
            buyer_name: Some("山田 太郎".to_string()),
        }),
        shipping_address: None,
    }
}

pub fn raw_orders(prefix: &str, count: usize) -> Vec<RawOrder> {
    (0..count)
        .map(|n| raw_order(&format!("{prefix}-{n:04}"), 7))
        .collect()
}

pub fn page(orders: Vec<RawOrder>, next_token: Option<&str>) -> OrdersPage {
    OrdersPage {
        orders,
        next_token: next_token.map(ToOwned::to_owned),
    }
}

pub fn raw_item(order_id: &str, asin: &str) -> RawOrderItem {
    RawOrderItem {
        order_item_id: format!("{order_id}-item"),
        asin: Some(asin.to_string()),
        seller_sku: Some("SKU-1".to_string()),
        title: None,
        quantity_ordered: Some(json!(2)),
        item_price: Some(RawMoney {
            currency_code: Some("JPY".to_string()),
            amount: Some(json!("2480")),
        }),
    }
}

pub fn catalog_item(asin: &str) -> CatalogItem {
    CatalogItem {
        asin: asin.to_string(),
        summaries: vec![CatalogSummary {
            marketplace_id: Some("A1VC38T7YXB528".to_string()),
            item_name: Some(format!("カタログ商品 {asin}")),
            brand: Some("テストブランド".to_string()),
            manufacturer: None,
        }],
        images: vec![CatalogImageSet {
            marketplace_id: None,
            images: vec![CatalogImage {
                variant: Some("MAIN".to_string()),
                link: format!("https://m.media-amazon.com/images/I/{asin}.jpg"),
                height: Some(500),
                width: Some(500),
            }],
        }],
        product_types: Vec::new(),
    }
}
