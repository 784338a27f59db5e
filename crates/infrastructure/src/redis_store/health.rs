use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::Script;

use jobq_core::models::HealthRecord;
use jobq_core::traits::HealthStore;
use jobq_core::{SchedulerError, SchedulerResult};

use super::{backend_error, RedisKeys};

// 只在新时间更晚时写入
const RECORD_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if (not current) or tonumber(current) < tonumber(ARGV[2]) then
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
end
return 1
"#;

/// Redis健康记录存储，所有任务保存在一个HASH中
pub struct RedisHealthStore {
    conn: ConnectionManager,
    keys: RedisKeys,
    record_script: Script,
}

impl RedisHealthStore {
    pub fn new(conn: ConnectionManager, keys: RedisKeys) -> Self {
        Self {
            conn,
            keys,
            record_script: Script::new(RECORD_SCRIPT),
        }
    }
}

fn decode(millis: i64) -> SchedulerResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| SchedulerError::Serialization(format!("时间戳越界: {millis}")))
}

#[async_trait]
impl HealthStore for RedisHealthStore {
    async fn record_success(&self, task_name: &str, at: DateTime<Utc>) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .record_script
            .key(self.keys.health())
            .arg(task_name)
            .arg(at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("record_success", e))?;
        Ok(())
    }

    async fn last_success(&self, task_name: &str) -> SchedulerResult<Option<DateTime<Utc>>> {
        let mut conn = self.conn.clone();
        let millis: Option<i64> = redis::cmd("HGET")
            .arg(self.keys.health())
            .arg(task_name)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("HGET", e))?;
        millis.map(decode).transpose()
    }

    async fn records(&self) -> SchedulerResult<Vec<HealthRecord>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, i64> = redis::cmd("HGETALL")
            .arg(self.keys.health())
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("HGETALL", e))?;
        let mut records = raw
            .into_iter()
            .map(|(task_name, millis)| {
                Ok(HealthRecord {
                    task_name,
                    last_success_at: decode(millis)?,
                })
            })
            .collect::<SchedulerResult<Vec<_>>>()?;
        records.sort_by(|a, b| a.task_name.cmp(&b.task_name));
        Ok(records)
    }
}
