use std::time::Duration;

use async_trait::async_trait;

use crate::models::{Job, QueueStats};
use crate::Result;

/// 持久化作业队列
///
/// 投递语义为至少一次：`dequeue` 取出的作业在 `ack`/`nack` 之前不会从存储中删除，
/// 持有者崩溃后作业会在可见性超时后重新可见。实现内部负责串行化所有操作，
/// 调用方无需额外加锁。同一任务、同一状态的作业保持先进先出。
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// 作业进入待处理区域的末尾（若 `visible_at` 在未来则先进入延迟区域）
    async fn enqueue(&self, job: Job) -> Result<()>;

    /// 阻塞等待可用作业，超时返回 `None`
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>>;

    /// 成功：永久删除
    async fn ack(&self, job_id: &str) -> Result<()>;

    /// 失败：尝试次数加一，按退避延迟重新排队，或在耗尽后进入死信队列
    ///
    /// 返回状态变更后的作业。
    async fn nack(&self, job_id: &str, error: &str) -> Result<Job>;

    /// 不计入尝试次数的重新排队，用于执行锁竞争
    async fn release(&self, job_id: &str, delay: Duration) -> Result<()>;

    /// 延长执行中作业的可见性期限
    async fn touch(&self, job_id: &str) -> Result<()>;

    /// 管理性取消：尝试次数直接置为上限并移入死信队列
    async fn dead_letter(&self, job_id: &str, reason: &str) -> Result<Job>;

    /// 死信作业列表，最早进入的在前
    async fn dead_letters(&self) -> Result<Vec<Job>>;

    /// 手动重放死信作业：尝试次数清零后重新入队
    async fn replay_dead_letter(&self, job_id: &str) -> Result<Job>;

    async fn stats(&self) -> Result<QueueStats>;
}
