use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::{error::ApiResult, response::ApiResponse, routes::AppState};

/// 运行健康检查，存在逾期任务时返回503
pub async fn health_check(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.health_monitor.check().await?;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, ApiResponse::success(report)))
}
