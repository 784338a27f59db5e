//! 引擎依赖的外部协作者接口
//!
//! 队列与锁的实现只需要底层存储提供原子比较交换（或等价的事务）原语。

pub mod health_store;
pub mod job_queue;
pub mod task_handler;
pub mod task_lock;

pub use health_store::*;
pub use job_queue::*;
pub use task_handler::*;
pub use task_lock::*;
