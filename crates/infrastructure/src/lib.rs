//! 作业队列、租约锁和健康记录的存储后端实现

pub mod backend_factory;
pub mod in_memory_health;
pub mod in_memory_lock;
pub mod in_memory_queue;
pub mod redis_store;

pub use backend_factory::{BackendFactory, Backends};
pub use in_memory_health::InMemoryHealthStore;
pub use in_memory_lock::InMemoryLockStore;
pub use in_memory_queue::{InMemoryJobQueue, InMemoryQueueConfig, VISIBILITY_TIMEOUT_ERROR};
