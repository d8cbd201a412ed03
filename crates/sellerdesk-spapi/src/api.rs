use std::future::Future;
use std::sync::Arc;

use crate::client::SpApiClient;
use crate::error::SpApiError;
use crate::types::{CatalogItem, OrdersPage, OrdersQuery, RawOrderItem, SolicitationActions};

/// The upstream calls the order pipeline depends on.
///
/// [`SpApiClient`] is the production implementation; pipeline tests supply
/// in-process fakes. Implementations are responsible for their own pacing.
pub trait MarketplaceApi: Send + Sync + 'static {
    fn get_orders_page(
        &self,
        query: &OrdersQuery,
    ) -> impl Future<Output = Result<OrdersPage, SpApiError>> + Send;

    fn get_order_items(
        &self,
        order_id: &str,
    ) -> impl Future<Output = Result<Vec<RawOrderItem>, SpApiError>> + Send;

    fn get_catalog_item(
        &self,
        asin: &str,
    ) -> impl Future<Output = Result<CatalogItem, SpApiError>> + Send;

    fn get_solicitation_actions(
        &self,
        order_id: &str,
    ) -> impl Future<Output = Result<SolicitationActions, SpApiError>> + Send;

    fn create_review_solicitation(
        &self,
        order_id: &str,
    ) -> impl Future<Output = Result<(), SpApiError>> + Send;
}

impl MarketplaceApi for SpApiClient {
    async fn get_orders_page(&self, query: &OrdersQuery) -> Result<OrdersPage, SpApiError> {
        SpApiClient::get_orders_page(self, query).await
    }

    async fn get_order_items(&self, order_id: &str) -> Result<Vec<RawOrderItem>, SpApiError> {
        SpApiClient::get_order_items(self, order_id).await
    }

    async fn get_catalog_item(&self, asin: &str) -> Result<CatalogItem, SpApiError> {
        SpApiClient::get_catalog_item(self, asin).await
    }

    async fn get_solicitation_actions(
        &self,
        order_id: &str,
    ) -> Result<SolicitationActions, SpApiError> {
        SpApiClient::get_solicitation_actions(self, order_id).await
    }

    async fn create_review_solicitation(&self, order_id: &str) -> Result<(), SpApiError> {
        SpApiClient::create_review_solicitation(self, order_id).await
    }
}

impl<T: MarketplaceApi> MarketplaceApi for Arc<T> {
    fn get_orders_page(
        &self,
        query: &OrdersQuery,
    ) -> impl Future<Output = Result<OrdersPage, SpApiError>> + Send {
        (**self).get_orders_page(query)
    }

    fn get_order_items(
        &self,
        order_id: &str,
    ) -> impl Future<Output = Result<Vec<RawOrderItem>, SpApiError>> + Send {
        (**self).get_order_items(order_id)
    }

    fn get_catalog_item(
        &self,
        asin: &str,
    ) -> impl Future<Output = Result<CatalogItem, SpApiError>> + Send {
        (**self).get_catalog_item(asin)
    }

    fn get_solicitation_actions(
        &self,
        order_id: &str,
    ) -> impl Future<Output = Result<SolicitationActions, SpApiError>> + Send {
        (**self).get_solicitation_actions(order_id)
    }

    fn create_review_solicitation(
        &self,
        order_id: &str,
    ) -> impl Future<Output = Result<(), SpApiError>> + Send {
        (**self).create_review_solicitation(order_id)
    }
}
