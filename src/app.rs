use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};

use jobq_api::{create_app, AppState};
use jobq_core::config::{AppConfig, TaskConfig};
use jobq_core::traits::JobQueue;
use jobq_core::{Clock, OwnerToken, SystemClock, TaskRegistry};
use jobq_dispatcher::{HealthMonitor, TaskScheduler};
use jobq_infrastructure::{BackendFactory, Backends};
use jobq_worker::{builtin_handler, ExecutorSettings, JobExecutor, WorkerPool};

/// 注册配置文件中声明的任务，处理器按名称从内置处理器中查找
pub async fn register_config_tasks(registry: &TaskRegistry, tasks: &[TaskConfig]) -> Result<()> {
    for task in tasks {
        let handler = builtin_handler(&task.handler)
            .ok_or_else(|| anyhow!("任务 {} 使用了未知的处理器: {}", task.name, task.handler))?;
        let definition = task
            .to_definition()
            .with_context(|| format!("任务 {} 的定义无效", task.name))?;
        registry
            .register(definition, handler)
            .await
            .with_context(|| format!("注册任务 {} 失败", task.name))?;
    }
    Ok(())
}

/// 主应用程序：把调度器、Worker池、健康监控和HTTP接口装配到同一组后端上
pub struct Application {
    config: AppConfig,
    registry: Arc<TaskRegistry>,
    backends: Backends,
    scheduler: Arc<TaskScheduler>,
    pool: Arc<WorkerPool>,
    health_monitor: Arc<HealthMonitor>,
}

impl Application {
    /// 按配置连接存储后端并创建应用实例，任务需要事先注册到 `registry`
    pub async fn new(config: AppConfig, registry: Arc<TaskRegistry>) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backends = BackendFactory::create(&config, clock.clone())
            .await
            .context("创建存储后端失败")?;
        Ok(Self::with_backends(config, registry, backends, clock))
    }

    pub fn with_backends(
        config: AppConfig,
        registry: Arc<TaskRegistry>,
        backends: Backends,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let owner = config
            .scheduler
            .instance_id
            .as_deref()
            .map(OwnerToken::new)
            .unwrap_or_else(OwnerToken::current);
        info!(owner = %owner, tasks_configured = config.tasks.len(), "初始化应用程序");

        let scheduler = Arc::new(TaskScheduler::new(
            registry.clone(),
            backends.queue.clone(),
            backends.lock.clone(),
            clock.clone(),
            owner.child("scheduler"),
            config.scheduler.tick_interval(),
        ));
        let executor = JobExecutor::new(
            registry.clone(),
            backends.queue.clone(),
            backends.lock.clone(),
            backends.health.clone(),
            clock.clone(),
            owner.child("worker"),
            ExecutorSettings::from(&config.worker),
        );
        let pool = Arc::new(WorkerPool::new(
            executor,
            backends.queue.clone(),
            &config.worker,
        ));
        let health_monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            backends.health.clone(),
            clock,
        ));

        Self {
            config,
            registry,
            backends,
            scheduler,
            pool,
            health_monitor,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.backends.queue
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health_monitor
    }

    /// 运行调度器、Worker池和（可选的）HTTP接口，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let api_listener = if self.config.api.enabled {
            let listener = TcpListener::bind(&self.config.api.bind_address)
                .await
                .with_context(|| format!("绑定API地址失败: {}", self.config.api.bind_address))?;
            info!(address = %self.config.api.bind_address, "API服务器启动");
            Some(listener)
        } else {
            None
        };

        let scheduler_handle = {
            let scheduler = Arc::clone(&self.scheduler);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { scheduler.run(shutdown_rx).await })
        };

        let pool_handle = {
            let pool = Arc::clone(&self.pool);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { pool.run(shutdown_rx).await })
        };

        let api_handle = api_listener.map(|listener| {
            let app = create_app(AppState {
                scheduler: Arc::clone(&self.scheduler),
                queue: Arc::clone(&self.backends.queue),
                health_monitor: Arc::clone(&self.health_monitor),
            });
            let mut shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                let result = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.recv().await;
                    })
                    .await;
                if let Err(e) = result {
                    error!(error = %e, "API服务器运行失败");
                }
            })
        });

        if let Err(e) = scheduler_handle.await {
            error!(error = %e, "调度器任务异常退出");
        }
        if let Err(e) = pool_handle.await {
            error!(error = %e, "Worker池任务异常退出");
        }
        if let Some(handle) = api_handle {
            if let Err(e) = handle.await {
                error!(error = %e, "API服务器任务异常退出");
            }
        }

        info!("应用程序已停止");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TASKS: &str = r#"
[[tasks]]
name = "cleanup"
schedule = "0 3 * * *"
handler = "shell"
payload = { command = "true" }
lock_ttl_seconds = 600

[[tasks]]
name = "reindex"
handler = "shell"
"#;

    #[tokio::test]
    async fn test_register_config_tasks() {
        let config = AppConfig::from_toml(TASKS).unwrap();
        let registry = TaskRegistry::new();
        register_config_tasks(&registry, &config.tasks).await.unwrap();

        assert_eq!(registry.len().await, 2);
        let cleanup = registry.get("cleanup").await.unwrap();
        assert!(cleanup.definition.requires_lock());
    }

    #[tokio::test]
    async fn test_unknown_handler_is_rejected() {
        let config = AppConfig::from_toml(
            r#"
[[tasks]]
name = "report"
handler = "python"
"#,
        )
        .unwrap();
        let registry = TaskRegistry::new();
        let err = register_config_tasks(&registry, &config.tasks)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("python"));
    }
}
