//! # jobq API
//!
//! 基于Axum的HTTP接口，暴露引擎的只读视图和少量管理操作：
//!
//! - `GET /health` - 运行健康报告，存在逾期任务时返回503
//! - `GET /queue/stats` - 各队列区域的作业数量
//! - `GET /dead-letters` - 死信作业列表
//! - `POST /dead-letters/{id}/replay` - 重放死信作业
//! - `POST /tasks/{name}/jobs` - 临时提交作业，请求体 `{"payload": ...}` 可选
//! - `GET /tasks/{name}/next-run` - 任务的下一次CRON执行时间
//!
//! 所有成功响应使用 `{success, data, message, timestamp}` 信封。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建带中间件的完整API应用
pub fn create_app(state: AppState) -> Router {
    create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(cors_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
