use axum::{
    extract::{Path, State},
    Extension, Json,
};
use sellerdesk_orders::{JobProgress, JobStream};

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState, ResponseMeta};

pub(super) async fn get_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(stream): Path<String>,
) -> Result<Json<ApiResponse<JobProgress>>, ApiError> {
    let stream: JobStream = stream
        .parse()
        .map_err(|e: String| ApiError::new(req_id.0.clone(), "not_found", e))?;

    let progress = state.service.job_status(stream).await.ok_or_else(|| {
        ApiError::new(
            req_id.0.clone(),
            "not_found",
            format!("no {stream} job has run yet"),
        )
    })?;

    Ok(Json(ApiResponse {
        data: progress,
        meta: ResponseMeta::new(req_id.0),
    }))
}
