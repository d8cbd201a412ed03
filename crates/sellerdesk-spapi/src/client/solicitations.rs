use reqwest::Method;

use super::SpApiClient;
use crate::error::SpApiError;
use crate::pacing::Endpoint;
use crate::types::{SolicitationActions, REVIEW_ACTION};

impl SpApiClient {
    /// Lists the solicitation actions currently available for an order.
    ///
    /// # Errors
    ///
    /// Any [`SpApiError`] from the request, or [`SpApiError::Deserialize`] if
    /// the body does not carry an actions list.
    pub async fn get_solicitation_actions(
        &self,
        order_id: &str,
    ) -> Result<SolicitationActions, SpApiError> {
        let url = self.build_url(
            &["solicitations", "v1", "orders", order_id],
            &[("marketplaceIds", self.marketplace_id.as_str())],
        )?;
        self.get_json(Endpoint::Solicitations, url, || {
            format!("solicitation actions for {order_id}")
        })
        .await
    }

    /// Submits the review-and-feedback solicitation for an order.
    ///
    /// # Errors
    ///
    /// Any [`SpApiError`] from the request. The upstream answers non-2xx
    /// when the order is not (or no longer) eligible.
    pub async fn create_review_solicitation(&self, order_id: &str) -> Result<(), SpApiError> {
        let url = self.build_url(
            &["solicitations", "v1", "orders", order_id, "solicitations", REVIEW_ACTION],
            &[("marketplaceIds", self.marketplace_id.as_str())],
        )?;
        self.execute(Endpoint::Solicitations, Method::POST, url)
            .await
            .map(|_| ())
    }
}
