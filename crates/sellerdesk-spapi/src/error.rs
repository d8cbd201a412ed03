use thiserror::Error;

use crate::pacing::Endpoint;

#[derive(Debug, Error)]
pub enum SpApiError {
    /// Network, TLS, or timeout failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The token endpoint rejected the refresh. Fatal for the current operation.
    #[error("access token refresh failed: {message}")]
    Auth { status: Option<u16>, message: String },

    #[error("rate limited by {endpoint} (HTTP 429): {body}")]
    RateLimited {
        endpoint: Endpoint,
        retry_after_secs: Option<u64>,
        body: String,
    },

    #[error("unexpected HTTP status {status} from {endpoint}: {body}")]
    UnexpectedStatus {
        endpoint: Endpoint,
        status: u16,
        body: String,
    },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid base URL \"{url}\": {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

impl SpApiError {
    /// The upstream quota/rate limit was hit (HTTP 429).
    #[must_use]
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Upstream HTTP status, when the failure carried one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::Auth { status, .. } => *status,
            Self::RateLimited { .. } => Some(429),
            Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::Deserialize { .. } | Self::InvalidBaseUrl { .. } => None,
        }
    }

    /// Transient conditions (5xx, network) that a later attempt may not hit.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
