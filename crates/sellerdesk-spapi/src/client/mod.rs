//! HTTP client for the marketplace selling-partner API.
//!
//! Every call goes through [`SpApiClient::execute`], which attaches a cached
//! access token, waits on the endpoint's pacer, and maps non-2xx responses to
//! typed errors. Nothing is retried here: callers decide whether a failure
//! degrades one order, stops a page loop, or fails the operation.

mod catalog;
mod orders;
mod solicitations;

use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode, Url};
use sellerdesk_core::{AppConfig, PacingSettings};
use serde::de::DeserializeOwned;

use crate::error::SpApiError;
use crate::pacing::{Endpoint, EndpointPacers};
use crate::token::{Credentials, TokenProvider};

/// Upstream error bodies are truncated to this many characters in errors.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Everything needed to construct an [`SpApiClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub token_url: String,
    pub marketplace_id: String,
    pub credentials: Credentials,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub pacing: PacingSettings,
}

impl ClientOptions {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.spapi_endpoint.clone(),
            token_url: config.spapi_token_url.clone(),
            marketplace_id: config.spapi_marketplace_id.clone(),
            credentials: Credentials {
                refresh_token: config.spapi_refresh_token.clone(),
                client_id: config.spapi_client_id.clone(),
                client_secret: config.spapi_client_secret.clone(),
            },
            timeout_secs: config.request_timeout_secs,
            user_agent: config.user_agent.clone(),
            pacing: config.pacing,
        }
    }
}

/// Rate-limited client for the orders, order-items, catalog, and
/// solicitations endpoints.
#[derive(Debug)]
pub struct SpApiClient {
    client: Client,
    base_url: Url,
    marketplace_id: String,
    tokens: TokenProvider,
    pacers: EndpointPacers,
}

impl SpApiClient {
    /// # Errors
    ///
    /// Returns [`SpApiError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`SpApiError::InvalidBaseUrl`] if the
    /// configured endpoint is not an absolute URL.
    pub fn new(options: ClientOptions) -> Result<Self, SpApiError> {
        let pacers = EndpointPacers::new(options.pacing);
        Self::with_pacers(options, pacers)
    }

    /// # Errors
    ///
    /// Same as [`SpApiClient::new`].
    pub fn from_config(config: &AppConfig) -> Result<Self, SpApiError> {
        Self::new(ClientOptions::from_config(config))
    }

    /// Builds a client with explicit pacers (for tests against a mock server).
    ///
    /// # Errors
    ///
    /// Same as [`SpApiClient::new`].
    pub fn with_pacers(options: ClientOptions, pacers: EndpointPacers) -> Result<Self, SpApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(&options.user_agent)
            .build()?;

        let normalised = format!("{}/", options.base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| SpApiError::InvalidBaseUrl {
            url: options.base_url.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SpApiError::InvalidBaseUrl {
                url: options.base_url,
                reason: "URL cannot be used as a base".to_string(),
            });
        }

        Ok(Self {
            client,
            base_url,
            marketplace_id: options.marketplace_id,
            tokens: TokenProvider::new(&options.token_url, options.credentials),
            pacers,
        })
    }

    /// Joins percent-encoded path segments onto the base URL and appends
    /// query parameters.
    fn build_url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, SpApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SpApiError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: "URL cannot be used as a base".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    /// Sends one paced, authenticated request and returns the raw body of a
    /// 2xx response.
    ///
    /// # Errors
    ///
    /// - [`SpApiError::Auth`] if no access token could be obtained.
    /// - [`SpApiError::RateLimited`] on HTTP 429.
    /// - [`SpApiError::UnexpectedStatus`] on any other non-2xx status.
    /// - [`SpApiError::Http`] on network failure or timeout.
    async fn execute(
        &self,
        endpoint: Endpoint,
        method: Method,
        url: Url,
    ) -> Result<String, SpApiError> {
        let token = self.tokens.access_token(&self.client).await?;
        self.pacers.acquire(endpoint).await;

        tracing::debug!(%endpoint, %method, path = url.path(), "upstream request");
        let response = self
            .client
            .request(method, url)
            .header("x-amz-access-token", token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(SpApiError::RateLimited {
                endpoint,
                retry_after_secs,
                body: truncate_body(body),
            });
        }

        let body = response.text().await?;
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                // A rejected token may be revoked early; force a refresh next time.
                self.tokens.invalidate().await;
            }
            return Err(SpApiError::UnexpectedStatus {
                endpoint,
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }

        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        url: Url,
        context: impl FnOnce() -> String,
    ) -> Result<T, SpApiError> {
        let body = self.execute(endpoint, Method::GET, url).await?;
        decode(&body, context)
    }
}

fn decode<T: DeserializeOwned>(
    body: &str,
    context: impl FnOnce() -> String,
) -> Result<T, SpApiError> {
    serde_json::from_str(body).map_err(|source| SpApiError::Deserialize {
        context: context(),
        source,
    })
}

fn truncate_body(body: String) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body;
    }
    let mut truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
#[path = "../client_test.rs"]
mod tests;
