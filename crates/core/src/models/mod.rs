//! # 数据模型
//!
//! 定义定时任务执行引擎的核心数据结构。
//!
//! ## 核心模型
//!
//! ### TaskDefinition - 任务定义
//! 一个按名称注册的可调度工作单元，包含调度规则、最大尝试次数、执行锁租期和健康检查间隔。
//! 启动时注册，注册后不可变。
//!
//! ### Job - 作业
//! 任务的一次调度触发或一次临时提交，由队列持有，同一时刻最多被一个Worker执行。
//!
//! ### LockLease - 锁租约
//! 以键为单位的互斥租约，过期后任何持有者都可以通过原子比较交换回收。
//!
//! ### HealthRecord / HealthReport - 健康记录与报告
//! 每个任务最近一次成功执行的时间，以及据此计算出的逾期任务列表。
//!
//! ## 作业状态流转
//! ```text
//! Pending → InFlight → Succeeded
//!    ↑         ↓
//!    └──── (nack, 未耗尽) 
//!              ↓
//!         DeadLettered (尝试次数耗尽)
//! ```

pub mod health;
pub mod job;
pub mod lock;
pub mod task;

pub use health::*;
pub use job::*;
pub use lock::*;
pub use task::*;
