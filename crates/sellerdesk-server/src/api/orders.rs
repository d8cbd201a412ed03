//! Order listing, review dispatch, eligibility, and sync handlers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use sellerdesk_core::Order;
use sellerdesk_orders::{
    EligibilityReport, JobProgress, ListOrdersQuery, OrderListing, SendOutcome, SendReviewRequest,
    SyncReport,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::middleware::RequestId;

use super::{map_orders_error, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CheckEligibilityRequest {
    #[serde(default)]
    pub order_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct SyncQuery {
    #[serde(default)]
    pub background: bool,
}

pub(super) async fn list_orders(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<OrderListing>>, ApiError> {
    let listing = state
        .service
        .list_orders(&query)
        .await
        .map_err(|e| map_orders_error(req_id.0.clone(), &e))?;

    if let Some(partial) = &listing.partial_error {
        tracing::warn!(
            request_id = %req_id.0,
            returned = listing.collection.total_count,
            error = %partial,
            "returning partial order listing"
        );
    }

    Ok(Json(ApiResponse {
        data: listing,
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn list_eligible(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<Order>>>, ApiError> {
    let orders = state
        .service
        .eligible_orders()
        .await
        .map_err(|e| map_orders_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: orders,
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn send_review_requests(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<SendReviewRequest>,
) -> Result<Json<ApiResponse<SendOutcome>>, ApiError> {
    let outcome = state
        .service
        .send_review_requests(&body)
        .await
        .map_err(|e| map_orders_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: outcome,
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn check_eligibility(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CheckEligibilityRequest>,
) -> Result<Json<ApiResponse<EligibilityReport>>, ApiError> {
    let report = state
        .service
        .check_eligibility(&body.order_ids)
        .await
        .map_err(|e| map_orders_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: report,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// Runs a sync inline, or starts it as a job with `?background=true`.
pub(super) async fn sync_orders(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<SyncQuery>,
) -> Result<Response, ApiError> {
    if query.background {
        let handle = state.service.start_sync().await;
        let progress: JobProgress = handle.progress();
        return Ok((
            StatusCode::ACCEPTED,
            Json(ApiResponse {
                data: progress,
                meta: ResponseMeta::new(req_id.0),
            }),
        )
            .into_response());
    }

    let report: SyncReport = state
        .service
        .sync(&CancellationToken::new(), None)
        .await
        .map_err(|e| map_orders_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: report,
        meta: ResponseMeta::new(req_id.0),
    })
    .into_response())
}
