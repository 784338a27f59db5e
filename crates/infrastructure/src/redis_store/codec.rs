use std::collections::HashMap;

use chrono::{DateTime, Utc};

use jobq_core::models::{Job, JobStatus};
use jobq_core::{SchedulerError, SchedulerResult};

fn encode_time(instant: Option<DateTime<Utc>>) -> String {
    instant
        .map(|t| t.timestamp_millis().to_string())
        .unwrap_or_default()
}

/// 作业编码为HASH字段，时间使用毫秒时间戳以便Lua脚本比较
pub(crate) fn job_to_fields(job: &Job) -> SchedulerResult<Vec<(&'static str, String)>> {
    Ok(vec![
        ("id", job.id.clone()),
        ("task_name", job.task_name.clone()),
        ("payload", serde_json::to_string(&job.payload)?),
        ("attempts", job.attempts.to_string()),
        ("max_attempts", job.max_attempts.to_string()),
        ("status", job.status.as_str().to_string()),
        ("created_at", encode_time(Some(job.created_at))),
        ("scheduled_for", encode_time(job.scheduled_for)),
        ("visible_at", encode_time(Some(job.visible_at))),
        ("last_attempt_at", encode_time(job.last_attempt_at)),
        ("last_error", job.last_error.clone().unwrap_or_default()),
    ])
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> SchedulerResult<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| SchedulerError::Serialization(format!("作业缺少字段: {name}")))
}

fn parse_number<T: std::str::FromStr>(fields: &HashMap<String, String>, name: &str) -> SchedulerResult<T> {
    let raw = field(fields, name)?;
    raw.parse()
        .map_err(|_| SchedulerError::Serialization(format!("字段 {name} 不是有效数字: {raw}")))
}

fn parse_time(
    fields: &HashMap<String, String>,
    name: &str,
) -> SchedulerResult<Option<DateTime<Utc>>> {
    match fields.get(name).map(String::as_str) {
        None | Some("") => Ok(None),
        Some(raw) => {
            let millis: i64 = raw.parse().map_err(|_| {
                SchedulerError::Serialization(format!("字段 {name} 不是有效时间戳: {raw}"))
            })?;
            DateTime::from_timestamp_millis(millis)
                .map(Some)
                .ok_or_else(|| SchedulerError::Serialization(format!("时间戳越界: {raw}")))
        }
    }
}

fn required_time(fields: &HashMap<String, String>, name: &str) -> SchedulerResult<DateTime<Utc>> {
    parse_time(fields, name)?
        .ok_or_else(|| SchedulerError::Serialization(format!("作业缺少字段: {name}")))
}

pub(crate) fn job_from_fields(fields: &HashMap<String, String>) -> SchedulerResult<Job> {
    let last_error = fields
        .get("last_error")
        .filter(|value| !value.is_empty())
        .cloned();
    Ok(Job {
        id: field(fields, "id")?.to_string(),
        task_name: field(fields, "task_name")?.to_string(),
        payload: serde_json::from_str(field(fields, "payload")?)?,
        attempts: parse_number(fields, "attempts")?,
        max_attempts: parse_number(fields, "max_attempts")?,
        status: field(fields, "status")?.parse::<JobStatus>()?,
        created_at: required_time(fields, "created_at")?,
        scheduled_for: parse_time(fields, "scheduled_for")?,
        visible_at: required_time(fields, "visible_at")?,
        last_attempt_at: parse_time(fields, "last_attempt_at")?,
        last_error,
    })
}
