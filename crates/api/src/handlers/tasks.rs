use axum::{
    body::Bytes,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success},
    routes::AppState,
};

/// 临时提交请求，`payload` 缺省时使用任务的默认参数
#[derive(Debug, Default, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct NextRunResponse {
    pub task: String,
    pub next_run: Option<chrono::DateTime<chrono::Utc>>,
}

/// 为已注册任务提交一个临时作业，请求体可以为空
pub async fn submit_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        SubmitJobRequest::default()
    } else {
        serde_json::from_slice::<SubmitJobRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("请求体不是有效的JSON: {e}")))?
    };
    let job = state.scheduler.submit(&name, request.payload).await?;
    Ok(created(job))
}

pub async fn next_run(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let next_run = state.scheduler.next_run(&name).await?;
    Ok(success(NextRunResponse {
        task: name,
        next_run,
    }))
}
