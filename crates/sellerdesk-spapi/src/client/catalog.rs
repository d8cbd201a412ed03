use super::SpApiClient;
use crate::error::SpApiError;
use crate::pacing::Endpoint;
use crate::types::CatalogItem;

const INCLUDED_DATA: &str = "summaries,images,productTypes";

impl SpApiClient {
    /// Looks up catalog detail (title, images, brand, product type) for one
    /// product identifier.
    ///
    /// # Errors
    ///
    /// Any [`SpApiError`] from the request, or [`SpApiError::Deserialize`] if
    /// the body is not a catalog item.
    pub async fn get_catalog_item(&self, asin: &str) -> Result<CatalogItem, SpApiError> {
        let url = self.build_url(
            &["catalog", "2022-04-01", "items", asin],
            &[
                ("marketplaceIds", self.marketplace_id.as_str()),
                ("includedData", INCLUDED_DATA),
            ],
        )?;
        self.get_json(Endpoint::Catalog, url, || format!("catalog item {asin}"))
            .await
    }
}
