use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sellerdesk_core::PacingSettings;
use subtle::{Choice, ConstantTimeEq};
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::api::ApiError;

pub const API_KEYS_VAR: &str = "SELLERDESK_API_KEYS";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;
const BUDGET_WINDOW: Duration = Duration::from_secs(60);
const LOCAL_REQUESTS_PER_WINDOW: usize = 120;

/// Request ID stored as a request extension and echoed in response meta.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    /// Reuses a caller-supplied id made of `[A-Za-z0-9._:-]`, up to 128
    /// bytes. Anything else gets a fresh `UUIDv4`.
    fn from_header(value: Option<&HeaderValue>) -> Self {
        let supplied = value
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| {
                !v.is_empty()
                    && v.len() <= MAX_REQUEST_ID_LEN
                    && v
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'-'))
            });
        Self(supplied.map_or_else(|| Uuid::new_v4().to_string(), ToOwned::to_owned))
    }
}

fn request_id_of(req: &Request) -> String {
    req.extensions()
        .get::<RequestId>()
        .map_or_else(|| Uuid::new_v4().to_string(), |id| id.0.clone())
}

/// Bearer keys accepted on the protected routes.
#[derive(Clone)]
pub struct AuthState {
    api_keys: Arc<Vec<String>>,
    pub enabled: bool,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("keys", &self.api_keys.len())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl AuthState {
    /// Reads comma-separated keys from `SELLERDESK_API_KEYS`.
    pub fn from_env(is_development: bool) -> anyhow::Result<Self> {
        let raw = std::env::var(API_KEYS_VAR).unwrap_or_default();
        Self::from_keys(&raw, is_development)
    }

    /// Without keys, auth is off in development and startup fails elsewhere.
    pub fn from_keys(raw: &str, is_development: bool) -> anyhow::Result<Self> {
        let mut keys: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        keys.sort();
        keys.dedup();

        if keys.is_empty() {
            anyhow::ensure!(
                is_development,
                "{API_KEYS_VAR} is required outside development; the order API can send review requests"
            );
            tracing::warn!("{API_KEYS_VAR} not set; order API is open in development");
        }

        Ok(Self {
            enabled: !keys.is_empty(),
            api_keys: Arc::new(keys),
        })
    }

    /// Compares against every configured key without short-circuiting.
    fn allows(&self, token: &str) -> bool {
        let matched = self
            .api_keys
            .iter()
            .fold(Choice::from(0), |acc, key| {
                acc | key.as_bytes().ct_eq(token.as_bytes())
            });
        matched.into()
    }
}

/// Which budget a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Served from the local store or cache.
    Local,
    /// Reaches the marketplace: every POST, and listings with `refresh=true`.
    Upstream,
}

impl RouteClass {
    fn of(req: &Request) -> Self {
        let refresh = req
            .uri()
            .query()
            .is_some_and(|q| q.split('&').any(|pair| pair == "refresh=true"));
        if req.method() == Method::POST || refresh {
            Self::Upstream
        } else {
            Self::Local
        }
    }
}

#[derive(Debug)]
struct Window {
    started_at: Instant,
    count: usize,
}

#[derive(Debug)]
struct Budget {
    max_requests: usize,
    window: Duration,
    state: Mutex<Window>,
}

impl Budget {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            state: Mutex::new(Window {
                started_at: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Counts one request, or returns how long until the window resets.
    async fn take(&self) -> Result<(), Duration> {
        let mut window = self.state.lock().await;
        let elapsed = window.started_at.elapsed();
        if elapsed >= self.window {
            window.started_at = Instant::now();
            window.count = 0;
        } else if window.count >= self.max_requests {
            return Err(self.window.saturating_sub(elapsed));
        }
        window.count += 1;
        Ok(())
    }
}

/// Fixed-window request budgets, one per [`RouteClass`].
#[derive(Debug, Clone)]
pub struct RateLimitState {
    local: Arc<Budget>,
    upstream: Arc<Budget>,
}

impl RateLimitState {
    #[must_use]
    pub fn new(local_max: usize, upstream_max: usize, window: Duration) -> Self {
        Self {
            local: Arc::new(Budget::new(local_max, window)),
            upstream: Arc::new(Budget::new(upstream_max, window)),
        }
    }

    /// The upstream budget admits no more calls per minute than the slowest
    /// per-call endpoint can serve.
    #[must_use]
    pub fn from_pacing(pacing: &PacingSettings) -> Self {
        let slowest_ms = pacing
            .order_items_ms
            .max(pacing.solicitations_ms)
            .max(pacing.catalog_ms)
            .max(1);
        let window_ms = u64::try_from(BUDGET_WINDOW.as_millis()).unwrap_or(u64::MAX);
        let upstream_max = usize::try_from(window_ms / slowest_ms).unwrap_or(usize::MAX);
        tracing::debug!(upstream_max, slowest_ms, "derived upstream request budget");
        Self::new(LOCAL_REQUESTS_PER_WINDOW, upstream_max, BUDGET_WINDOW)
    }

    fn budget(&self, class: RouteClass) -> &Budget {
        match class {
            RouteClass::Local => &self.local,
            RouteClass::Upstream => &self.upstream,
        }
    }
}

/// Assigns the [`RequestId`], runs the request inside a span carrying it,
/// and echoes it in the `x-request-id` response header.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = RequestId::from_header(req.headers().get(REQUEST_ID_HEADER));
    let span = tracing::info_span!("api_request", request_id = %id.0);
    let header_value = HeaderValue::from_str(&id.0).ok();
    req.extensions_mut().insert(id);

    let mut res = next.run(req).instrument(span).await;
    if let Some(val) = header_value {
        res.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    res
}

pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    req: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(req).await;
    }

    let token = extract_bearer_token(req.headers().get(header::AUTHORIZATION));
    match token {
        Some(token) if auth.allows(token) => next.run(req).await,
        _ => {
            tracing::debug!(path = %req.uri().path(), "rejected request without a valid bearer token");
            ApiError::new(
                request_id_of(&req),
                "unauthorized",
                "missing or invalid bearer token",
            )
            .into_response()
        }
    }
}

/// Rejects a request with 429 and `Retry-After` once its class's budget for
/// the current window is spent.
pub async fn enforce_rate_limit(
    State(rate_limit): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let class = RouteClass::of(&req);
    match rate_limit.budget(class).take().await {
        Ok(()) => next.run(req).await,
        Err(retry_in) => {
            let retry_after = retry_in.as_secs().max(1);
            tracing::warn!(?class, retry_after, "request budget exhausted");
            let message = match class {
                RouteClass::Upstream => {
                    "too many marketplace-bound requests; the upstream rate limits would be exceeded"
                }
                RouteClass::Local => "too many requests",
            };
            let mut res =
                ApiError::new(request_id_of(&req), "rate_limited", message).into_response();
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            res
        }
    }
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;

    fn request(method: Method, uri: &str) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    #[test]
    fn extract_bearer_token_accepts_valid_header() {
        let header = HeaderValue::from_static("Bearer test-token");
        assert_eq!(extract_bearer_token(Some(&header)), Some("test-token"));
    }

    #[test]
    fn extract_bearer_token_rejects_non_bearer_header() {
        let header = HeaderValue::from_static("Basic abc123");
        assert_eq!(extract_bearer_token(Some(&header)), None);
    }

    #[test]
    fn auth_state_disables_when_no_keys_in_dev() {
        let state = AuthState::from_keys("", true).expect("dev should allow missing keys");
        assert!(!state.enabled);
    }

    #[test]
    fn auth_state_requires_keys_outside_dev() {
        assert!(AuthState::from_keys(" , ", false).is_err());
    }

    #[test]
    fn auth_state_matches_any_configured_key() {
        let state = AuthState::from_keys("alpha, beta ,alpha", false).expect("keys");
        assert!(state.enabled);
        assert!(state.allows("alpha"));
        assert!(state.allows("beta"));
        assert!(!state.allows("alph"));
        assert!(!state.allows("alpha-beta"));
        assert!(!state.allows(""));
    }

    // -----------------------------------------------------------------------
    // RequestId
    // -----------------------------------------------------------------------

    #[test]
    fn caller_request_id_is_reused_when_well_formed() {
        let header = HeaderValue::from_static(" order-sync:2026-10-17.1 ");
        assert_eq!(
            RequestId::from_header(Some(&header)).0,
            "order-sync:2026-10-17.1"
        );
    }

    #[test]
    fn malformed_request_id_is_replaced() {
        let too_long = HeaderValue::from_str(&"a".repeat(MAX_REQUEST_ID_LEN + 1)).expect("header");
        for header in [
            HeaderValue::from_static("has space"),
            HeaderValue::from_static("<script>"),
            HeaderValue::from_static(""),
            too_long,
        ] {
            let id = RequestId::from_header(Some(&header)).0;
            assert!(Uuid::parse_str(&id).is_ok(), "{header:?} gave {id}");
        }
        assert!(Uuid::parse_str(&RequestId::from_header(None).0).is_ok());
    }

    // -----------------------------------------------------------------------
    // Budgets
    // -----------------------------------------------------------------------

    #[test]
    fn posts_and_refreshes_draw_from_the_upstream_budget() {
        assert_eq!(
            RouteClass::of(&request(Method::POST, "/api/v1/orders/sync")),
            RouteClass::Upstream
        );
        assert_eq!(
            RouteClass::of(&request(Method::GET, "/api/v1/orders?maxResults=5&refresh=true")),
            RouteClass::Upstream
        );
        assert_eq!(
            RouteClass::of(&request(Method::GET, "/api/v1/orders?refresh=false")),
            RouteClass::Local
        );
        assert_eq!(
            RouteClass::of(&request(Method::GET, "/api/v1/jobs/sync")),
            RouteClass::Local
        );
    }

    #[test]
    fn upstream_budget_follows_the_slowest_pacing() {
        let state = RateLimitState::from_pacing(&PacingSettings::default());
        // Order items are paced at 2s, so 30 per minute.
        assert_eq!(state.upstream.max_requests, 30);
        assert_eq!(state.local.max_requests, LOCAL_REQUESTS_PER_WINDOW);

        let slow = PacingSettings {
            solicitations_ms: 90_000,
            ..PacingSettings::default()
        };
        assert_eq!(RateLimitState::from_pacing(&slow).upstream.max_requests, 1);
    }

    #[tokio::test]
    async fn budgets_are_spent_independently() {
        let state = RateLimitState::new(2, 1, Duration::from_secs(60));
        assert!(state.budget(RouteClass::Upstream).take().await.is_ok());
        let retry_in = state
            .budget(RouteClass::Upstream)
            .take()
            .await
            .expect_err("upstream budget spent");
        assert!(retry_in <= Duration::from_secs(60));

        assert!(state.budget(RouteClass::Local).take().await.is_ok());
        assert!(state.budget(RouteClass::Local).take().await.is_ok());
        assert!(state.budget(RouteClass::Local).take().await.is_err());
    }

    #[tokio::test]
    async fn budget_resets_after_the_window() {
        let budget = Budget::new(1, Duration::from_millis(20));
        assert!(budget.take().await.is_ok());
        assert!(budget.take().await.is_err());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(budget.take().await.is_ok());
    }
}
