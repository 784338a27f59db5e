use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::info;

use crate::{error::ApiResult, response::success, routes::AppState};

pub async fn queue_stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.queue.stats().await?))
}

/// 死信作业列表，最早进入的在前
pub async fn list_dead_letters(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.queue.dead_letters().await?))
}

/// 手动重放死信作业
pub async fn replay_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job = state.queue.replay_dead_letter(&id).await?;
    info!(job_id = %job.id, task = %job.task_name, "通过API重放死信作业");
    Ok(success(job))
}
