//! Cached access-token helper for the Login-with-Amazon token endpoint.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::SpApiError;

/// Tokens within this margin of expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Refresh-token grant credentials.
#[derive(Clone)]
pub struct Credentials {
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("refresh_token", &"[redacted]")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug)]
pub struct TokenProvider {
    token_url: String,
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    #[must_use]
    pub fn new(token_url: &str, credentials: Credentials) -> Self {
        Self {
            token_url: token_url.to_owned(),
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Returns a usable access token, refreshing it first when absent or
    /// close to expiry. Concurrent callers share a single refresh.
    ///
    /// # Errors
    ///
    /// Returns [`SpApiError::Auth`] when the token endpoint rejects the
    /// refresh or answers with an unreadable body.
    pub async fn access_token(&self, client: &Client) -> Result<String, SpApiError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        let fresh = self.refresh(client).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Drops the cached token so the next call refreshes.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn refresh(&self, client: &Client) -> Result<CachedToken, SpApiError> {
        tracing::debug!(token_url = %self.token_url, "refreshing access token");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];

        let response = client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| SpApiError::Auth {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| SpApiError::Auth {
            status: Some(status.as_u16()),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(SpApiError::Auth {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| SpApiError::Auth {
            status: Some(status.as_u16()),
            message: format!("unreadable token response: {e}"),
        })?;

        Ok(CachedToken {
            value: parsed.access_token,
            expires_at: Utc::now() + Duration::seconds(parsed.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_near_expiry_is_stale() {
        let now = Utc::now();
        let token = CachedToken {
            value: "t".to_string(),
            expires_at: now + Duration::seconds(30),
        };
        assert!(!token.is_fresh(now));
    }

    #[test]
    fn token_well_before_expiry_is_fresh() {
        let now = Utc::now();
        let token = CachedToken {
            value: "t".to_string(),
            expires_at: now + Duration::seconds(3600),
        };
        assert!(token.is_fresh(now));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials {
            refresh_token: "Atzr|secret".to_string(),
            client_id: "amzn1.application".to_string(),
            client_secret: "shh".to_string(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("Atzr|secret"));
        assert!(!rendered.contains("shh"));
        assert!(rendered.contains("amzn1.application"));
    }
}
