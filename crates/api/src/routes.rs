use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use jobq_core::traits::JobQueue;
use jobq_dispatcher::{HealthMonitor, TaskScheduler};

use crate::handlers::{
    health::health_check,
    queue::{list_dead_letters, queue_stats, replay_dead_letter},
    tasks::{next_run, submit_job},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<TaskScheduler>,
    pub queue: Arc<dyn JobQueue>,
    pub health_monitor: Arc<HealthMonitor>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 队列与死信
        .route("/queue/stats", get(queue_stats))
        .route("/dead-letters", get(list_dead_letters))
        .route("/dead-letters/{id}/replay", post(replay_dead_letter))
        // 任务
        .route("/tasks/{name}/jobs", post(submit_job))
        .route("/tasks/{name}/next-run", get(next_run))
        .with_state(state)
}
