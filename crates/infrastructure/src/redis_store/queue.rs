use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, info};

use jobq_core::models::{Job, JobStatus, QueueStats};
use jobq_core::traits::JobQueue;
use jobq_core::{Clock, RetryPolicy, SchedulerError, SchedulerResult};

use super::codec::{job_from_fields, job_to_fields};
use super::{backend_error, millis, RedisKeys};
use crate::in_memory_queue::VISIBILITY_TIMEOUT_ERROR;

// KEYS: ready, delayed, inflight, dead
// ARGV: now_ms, visibility_ms, job_key_prefix, visibility_error
const DEQUEUE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local prefix = ARGV[3]

local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', now)
for _, id in ipairs(expired) do
    redis.call('ZREM', KEYS[3], id)
    local key = prefix .. id
    if redis.call('EXISTS', key) == 1 then
        local attempts = redis.call('HINCRBY', key, 'attempts', 1)
        local max_attempts = tonumber(redis.call('HGET', key, 'max_attempts'))
        redis.call('HSET', key, 'last_error', ARGV[4])
        if attempts >= max_attempts then
            redis.call('HSET', key, 'status', 'DEAD_LETTERED')
            redis.call('RPUSH', KEYS[4], id)
        else
            redis.call('HSET', key, 'status', 'PENDING', 'visible_at', now)
            redis.call('LPUSH', KEYS[1], id)
        end
    end
end

local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now)
for _, id in ipairs(due) do
    redis.call('ZREM', KEYS[2], id)
    redis.call('LPUSH', KEYS[1], id)
end

while true do
    local id = redis.call('RPOP', KEYS[1])
    if not id then
        return false
    end
    local key = prefix .. id
    if redis.call('EXISTS', key) == 1 then
        redis.call('HSET', key, 'status', 'IN_FLIGHT', 'last_attempt_at', now)
        redis.call('ZADD', KEYS[3], now + tonumber(ARGV[2]), id)
        return redis.call('HGETALL', key)
    end
end
"#;

// KEYS: inflight, job
// ARGV: id
const ACK_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('DEL', KEYS[2])
return 1
"#;

// KEYS: inflight, ready, delayed, dead, job
// ARGV: id, now_ms, error, base_delay_ms, max_delay_ms, multiplier
const NACK_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return false
end
local attempts = redis.call('HINCRBY', KEYS[5], 'attempts', 1)
local max_attempts = tonumber(redis.call('HGET', KEYS[5], 'max_attempts'))
redis.call('HSET', KEYS[5], 'last_error', ARGV[3])
if attempts >= max_attempts then
    redis.call('HSET', KEYS[5], 'status', 'DEAD_LETTERED')
    redis.call('RPUSH', KEYS[4], ARGV[1])
else
    local now = tonumber(ARGV[2])
    local delay = tonumber(ARGV[4]) * (tonumber(ARGV[6]) ^ (attempts - 1))
    delay = math.floor(math.min(delay, tonumber(ARGV[5])))
    local visible_at = now + delay
    redis.call('HSET', KEYS[5], 'status', 'PENDING', 'visible_at', visible_at)
    if delay > 0 then
        redis.call('ZADD', KEYS[3], visible_at, ARGV[1])
    else
        redis.call('LPUSH', KEYS[2], ARGV[1])
    end
end
return redis.call('HGETALL', KEYS[5])
"#;

// KEYS: inflight, ready, delayed, job
// ARGV: id, now_ms, delay_ms
const RELEASE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
local visible_at = tonumber(ARGV[2]) + tonumber(ARGV[3])
redis.call('HSET', KEYS[4], 'status', 'PENDING', 'visible_at', visible_at)
if tonumber(ARGV[3]) > 0 then
    redis.call('ZADD', KEYS[3], visible_at, ARGV[1])
else
    redis.call('LPUSH', KEYS[2], ARGV[1])
end
return 1
"#;

// KEYS: inflight
// ARGV: id, deadline_ms
const TOUCH_SCRIPT: &str = r#"
if not redis.call('ZSCORE', KEYS[1], ARGV[1]) then
    return 0
end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
return 1
"#;

// KEYS: ready, delayed, inflight, dead, job
// ARGV: id, reason
const DEAD_LETTER_SCRIPT: &str = r#"
local removed = redis.call('LREM', KEYS[1], 0, ARGV[1])
    + redis.call('ZREM', KEYS[2], ARGV[1])
    + redis.call('ZREM', KEYS[3], ARGV[1])
if removed == 0 then
    return false
end
local max_attempts = redis.call('HGET', KEYS[5], 'max_attempts')
redis.call('HSET', KEYS[5], 'attempts', max_attempts, 'last_error', ARGV[2], 'status', 'DEAD_LETTERED')
redis.call('RPUSH', KEYS[4], ARGV[1])
return redis.call('HGETALL', KEYS[5])
"#;

// KEYS: dead, ready, job
// ARGV: id, now_ms
const REPLAY_SCRIPT: &str = r#"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
    return false
end
redis.call('HSET', KEYS[3], 'attempts', 0, 'status', 'PENDING', 'visible_at', ARGV[2])
redis.call('LPUSH', KEYS[2], ARGV[1])
return redis.call('HGETALL', KEYS[3])
"#;

/// Redis作业队列
///
/// 以注入时钟的时间驱动延迟提升和可见性回收，多个进程共享同一组键。
/// `dequeue` 在超时内按 `poll_interval` 轮询，不使用阻塞命令占用多路复用连接。
pub struct RedisJobQueue {
    conn: ConnectionManager,
    keys: RedisKeys,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    visibility_timeout: Duration,
    poll_interval: Duration,
    dequeue_script: Script,
    ack_script: Script,
    nack_script: Script,
    release_script: Script,
    touch_script: Script,
    dead_letter_script: Script,
    replay_script: Script,
}

impl RedisJobQueue {
    pub fn new(
        conn: ConnectionManager,
        keys: RedisKeys,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        visibility_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            conn,
            keys,
            clock,
            retry,
            visibility_timeout,
            poll_interval,
            dequeue_script: Script::new(DEQUEUE_SCRIPT),
            ack_script: Script::new(ACK_SCRIPT),
            nack_script: Script::new(NACK_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
            touch_script: Script::new(TOUCH_SCRIPT),
            dead_letter_script: Script::new(DEAD_LETTER_SCRIPT),
            replay_script: Script::new(REPLAY_SCRIPT),
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn not_found(job_id: &str) -> SchedulerError {
        SchedulerError::JobNotFound {
            id: job_id.to_string(),
        }
    }

    async fn try_claim(&self) -> SchedulerResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let fields: Option<HashMap<String, String>> = self
            .dequeue_script
            .key(self.keys.ready())
            .key(self.keys.delayed())
            .key(self.keys.inflight())
            .key(self.keys.dead())
            .arg(self.now_ms())
            .arg(millis(self.visibility_timeout))
            .arg(self.keys.job_prefix())
            .arg(VISIBILITY_TIMEOUT_ERROR)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("dequeue", e))?;
        fields.map(|fields| job_from_fields(&fields)).transpose()
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, mut job: Job) -> SchedulerResult<()> {
        job.status = JobStatus::Pending;
        let fields = job_to_fields(&job)?;
        let key = self.keys.job(&job.id);
        let visible_at = job.visible_at.timestamp_millis();

        let mut pipe = redis::pipe();
        pipe.atomic().hset_multiple(&key, &fields).ignore();
        if visible_at > self.now_ms() {
            pipe.zadd(self.keys.delayed(), &job.id, visible_at).ignore();
        } else {
            pipe.lpush(self.keys.ready(), &job.id).ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| backend_error("enqueue", e))?;
        debug!(job_id = %job.id, task = %job.task_name, "作业入队");
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> SchedulerResult<Option<Job>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(job) = self.try_claim().await? {
                debug!(job_id = %job.id, task = %job.task_name, "作业出队");
                return Ok(Some(job));
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::time::sleep(remaining.min(self.poll_interval)).await;
        }
    }

    async fn ack(&self, job_id: &str) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();
        let acked: i64 = self
            .ack_script
            .key(self.keys.inflight())
            .key(self.keys.job(job_id))
            .arg(job_id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("ack", e))?;
        if acked == 0 {
            return Err(Self::not_found(job_id));
        }
        Ok(())
    }

    async fn nack(&self, job_id: &str, error: &str) -> SchedulerResult<Job> {
        let mut conn = self.conn.clone();
        let fields: Option<HashMap<String, String>> = self
            .nack_script
            .key(self.keys.inflight())
            .key(self.keys.ready())
            .key(self.keys.delayed())
            .key(self.keys.dead())
            .key(self.keys.job(job_id))
            .arg(job_id)
            .arg(self.now_ms())
            .arg(error)
            .arg(self.retry.base_delay_ms)
            .arg(self.retry.max_delay_ms)
            .arg(self.retry.multiplier)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("nack", e))?;
        let fields = fields.ok_or_else(|| Self::not_found(job_id))?;
        job_from_fields(&fields)
    }

    async fn release(&self, job_id: &str, delay: Duration) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();
        let released: i64 = self
            .release_script
            .key(self.keys.inflight())
            .key(self.keys.ready())
            .key(self.keys.delayed())
            .key(self.keys.job(job_id))
            .arg(job_id)
            .arg(self.now_ms())
            .arg(millis(delay))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("release", e))?;
        if released == 0 {
            return Err(Self::not_found(job_id));
        }
        Ok(())
    }

    async fn touch(&self, job_id: &str) -> SchedulerResult<()> {
        let deadline = self
            .now_ms()
            .saturating_add(i64::try_from(millis(self.visibility_timeout)).unwrap_or(i64::MAX));
        let mut conn = self.conn.clone();
        let touched: i64 = self
            .touch_script
            .key(self.keys.inflight())
            .arg(job_id)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("touch", e))?;
        if touched == 0 {
            return Err(Self::not_found(job_id));
        }
        Ok(())
    }

    async fn dead_letter(&self, job_id: &str, reason: &str) -> SchedulerResult<Job> {
        let mut conn = self.conn.clone();
        let fields: Option<HashMap<String, String>> = self
            .dead_letter_script
            .key(self.keys.ready())
            .key(self.keys.delayed())
            .key(self.keys.inflight())
            .key(self.keys.dead())
            .key(self.keys.job(job_id))
            .arg(job_id)
            .arg(reason)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("dead_letter", e))?;
        let job = job_from_fields(&fields.ok_or_else(|| Self::not_found(job_id))?)?;
        info!(job_id = %job.id, task = %job.task_name, reason, "作业被手动移入死信队列");
        Ok(job)
    }

    async fn dead_letters(&self) -> SchedulerResult<Vec<Job>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("LRANGE")
            .arg(self.keys.dead())
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("LRANGE", e))?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(self.keys.job(id));
        }
        let hashes: Vec<HashMap<String, String>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("HGETALL", e))?;
        hashes
            .iter()
            .filter(|fields| !fields.is_empty())
            .map(job_from_fields)
            .collect()
    }

    async fn replay_dead_letter(&self, job_id: &str) -> SchedulerResult<Job> {
        let mut conn = self.conn.clone();
        let fields: Option<HashMap<String, String>> = self
            .replay_script
            .key(self.keys.dead())
            .key(self.keys.ready())
            .key(self.keys.job(job_id))
            .arg(job_id)
            .arg(self.now_ms())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("replay", e))?;
        let job = job_from_fields(&fields.ok_or_else(|| Self::not_found(job_id))?)?;
        info!(job_id = %job.id, task = %job.task_name, "重放死信作业");
        Ok(job)
    }

    /// `delayed` 包含已经到期但尚未被下一次出队提升的作业
    async fn stats(&self) -> SchedulerResult<QueueStats> {
        let mut conn = self.conn.clone();
        let (ready, delayed, in_flight, dead_lettered): (usize, usize, usize, usize) =
            redis::pipe()
                .llen(self.keys.ready())
                .zcard(self.keys.delayed())
                .zcard(self.keys.inflight())
                .llen(self.keys.dead())
                .query_async(&mut conn)
                .await
                .map_err(|e| backend_error("stats", e))?;
        Ok(QueueStats {
            ready,
            delayed,
            in_flight,
            dead_lettered,
        })
    }
}
