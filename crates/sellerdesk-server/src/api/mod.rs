mod jobs;
mod orders;

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use sellerdesk_orders::{OrderService, OrdersError};
use sellerdesk_spapi::SpApiClient;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{
    enforce_rate_limit, request_id, require_bearer_auth, AuthState, RateLimitState, RequestId,
    REQUEST_ID_HEADER,
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrderService<SpApiClient>>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    store: &'static str,
    total_orders: usize,
    data_fetched_at: Option<DateTime<Utc>>,
    cache_entries: usize,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "upstream_auth_failed" | "upstream_error" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Maps a service failure onto the public error codes.
pub(super) fn map_orders_error(request_id: String, error: &OrdersError) -> ApiError {
    match error {
        OrdersError::Validation(message) => {
            ApiError::new(request_id, "validation_error", message.clone())
        }
        OrdersError::UnknownOrders(_) => ApiError::new(request_id, "not_found", error.to_string()),
        OrdersError::Upstream(e) if e.is_auth() => {
            tracing::error!(error = %e, "marketplace credentials rejected");
            ApiError::new(
                request_id,
                "upstream_auth_failed",
                "marketplace credentials were rejected; update the refresh token and client credentials",
            )
        }
        OrdersError::Upstream(e) => {
            tracing::warn!(error = %e, "marketplace request failed");
            ApiError::new(request_id, "upstream_error", e.to_string())
        }
        OrdersError::Snapshot { .. } | OrdersError::SnapshotFormat { .. } => {
            tracing::error!(error = %error, "order store unavailable");
            ApiError::new(request_id, "internal_error", "order store unavailable")
        }
    }
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

fn protected_router(auth: AuthState, rate_limit: RateLimitState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/orders", get(orders::list_orders))
        .route(
            "/api/v1/orders/review-request",
            get(orders::list_eligible).post(orders::send_review_requests),
        )
        .route(
            "/api/v1/orders/check-eligibility",
            post(orders::check_eligibility),
        )
        .route("/api/v1/orders/sync", post(orders::sync_orders))
        .route("/api/v1/jobs/{stream}", get(jobs::get_job))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    rate_limit,
                    enforce_rate_limit,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    auth,
                    require_bearer_auth,
                )),
        )
}

pub fn build_app(state: AppState, auth: AuthState, rate_limit: RateLimitState) -> Router {
    let public_routes = Router::new().route("/api/v1/health", get(health));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth, rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let meta = ResponseMeta::new(req_id.0);
    let report = state.service.health().await;

    if report.store_readable {
        (
            StatusCode::OK,
            Json(ApiResponse {
                data: HealthData {
                    status: "ok",
                    store: "ok",
                    total_orders: report.total_orders,
                    data_fetched_at: report.data_fetched_at,
                    cache_entries: report.cache_entries,
                },
                meta,
            }),
        )
    } else {
        tracing::warn!(
            error = report.store_error.as_deref().unwrap_or("unknown"),
            "health check: order store unreadable"
        );
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse {
                data: HealthData {
                    status: "degraded",
                    store: "unreadable",
                    total_orders: 0,
                    data_fetched_at: None,
                    cache_entries: report.cache_entries,
                },
                meta,
            }),
        )
    }
}
