use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::models::TaskDefinition;
use crate::traits::TaskHandler;
use crate::{SchedulerError, SchedulerResult};

/// 已注册的任务：定义加处理器
#[derive(Clone)]
pub struct RegisteredTask {
    pub definition: Arc<TaskDefinition>,
    pub handler: Arc<dyn TaskHandler>,
}

impl RegisteredTask {
    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

impl fmt::Debug for RegisteredTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTask")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// 任务注册表，调度器和Worker共享
///
/// 任务在启动时注册，注册后不可变；重新注册必须显式调用 `replace`。
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<BTreeMap<String, RegisteredTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册任务，名称重复或定义无效时立即失败
    pub async fn register(
        &self,
        definition: TaskDefinition,
        handler: Arc<dyn TaskHandler>,
    ) -> SchedulerResult<()> {
        definition.validate()?;
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&definition.name) {
            return Err(SchedulerError::DuplicateTask {
                name: definition.name,
            });
        }

        info!(
            task = %definition.name,
            schedule = ?definition.schedule,
            max_attempts = definition.max_attempts,
            "注册任务"
        );
        let name = definition.name.clone();
        tasks.insert(
            name,
            RegisteredTask {
                definition: Arc::new(definition),
                handler,
            },
        );
        Ok(())
    }

    /// 按名称替换任务定义，返回被替换的旧定义
    pub async fn replace(
        &self,
        definition: TaskDefinition,
        handler: Arc<dyn TaskHandler>,
    ) -> SchedulerResult<Option<RegisteredTask>> {
        definition.validate()?;
        info!(task = %definition.name, "替换任务定义");
        let name = definition.name.clone();
        let previous = self.tasks.write().await.insert(
            name,
            RegisteredTask {
                definition: Arc::new(definition),
                handler,
            },
        );
        Ok(previous)
    }

    pub async fn get(&self, name: &str) -> Option<RegisteredTask> {
        self.tasks.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tasks.read().await.contains_key(name)
    }

    /// 按名称排序的全部任务快照
    pub async fn snapshot(&self) -> Vec<RegisteredTask> {
        self.tasks.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::handler_fn;

    fn noop() -> Arc<dyn TaskHandler> {
        handler_fn(|_ctx| async { Ok(()) })
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = TaskRegistry::new();
        registry
            .register(TaskDefinition::cron("cleanup", "0 3 * * *").unwrap(), noop())
            .await
            .unwrap();
        registry
            .register(TaskDefinition::manual("adhoc"), noop())
            .await
            .unwrap();

        assert_eq!(registry.len().await, 2);
        assert!(registry.contains("cleanup").await);
        let names: Vec<String> = registry
            .snapshot()
            .await
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["adhoc", "cleanup"]);
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let registry = TaskRegistry::new();
        registry
            .register(TaskDefinition::manual("cleanup"), noop())
            .await
            .unwrap();
        let err = registry
            .register(TaskDefinition::manual("cleanup"), noop())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateTask { .. }));
    }

    #[tokio::test]
    async fn test_replace_swaps_definition() {
        let registry = TaskRegistry::new();
        registry
            .register(TaskDefinition::manual("cleanup"), noop())
            .await
            .unwrap();
        let previous = registry
            .replace(
                TaskDefinition::manual("cleanup").with_max_attempts(7),
                noop(),
            )
            .await
            .unwrap();
        assert_eq!(previous.unwrap().definition.max_attempts, 3);
        assert_eq!(
            registry.get("cleanup").await.unwrap().definition.max_attempts,
            7
        );
    }

    #[tokio::test]
    async fn test_invalid_definition_is_rejected() {
        let registry = TaskRegistry::new();
        let err = registry
            .register(TaskDefinition::manual("bad").with_max_attempts(0), noop())
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(registry.is_empty().await);
    }
}
