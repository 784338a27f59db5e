use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::JobContext;

/// 任务处理器
///
/// 投递语义是至少一次，处理器必须幂等或能容忍重复执行。
/// 返回的错误会以 `{:#}` 格式（包含错误链）记录为作业的 `last_error`。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()>;
}

/// 把异步闭包包装成处理器
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        (self.func)(ctx.clone()).await
    }
}

/// 便捷构造 `Arc<dyn TaskHandler>`
pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn TaskHandler>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler::new(func))
}
