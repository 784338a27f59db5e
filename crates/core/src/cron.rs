//! 五字段CRON表达式解析与匹配
//!
//! 语法: `minute hour day-of-month month day-of-week`，每个字段支持
//! `*`、单个整数、逗号列表、闭区间 `a-b` 以及步长 `*/n`、`a-b/n`。
//! 日期与星期两个字段按逻辑与组合，这一点与传统cron的"或"语义不同。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use thiserror::Error;

use crate::{SchedulerError, SchedulerResult};

/// 向前搜索下一次执行时间的最大窗口
pub const MAX_SEARCH_DAYS: i64 = 366;

/// CRON表达式的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CronField {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl CronField {
    pub const ALL: [CronField; 5] = [
        CronField::Minute,
        CronField::Hour,
        CronField::DayOfMonth,
        CronField::Month,
        CronField::DayOfWeek,
    ];

    /// 字段允许的取值范围（闭区间）
    pub fn range(self) -> (u32, u32) {
        match self {
            CronField::Minute => (0, 59),
            CronField::Hour => (0, 23),
            CronField::DayOfMonth => (1, 31),
            CronField::Month => (1, 12),
            CronField::DayOfWeek => (0, 6),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CronField::Minute => "minute",
            CronField::Hour => "hour",
            CronField::DayOfMonth => "day-of-month",
            CronField::Month => "month",
            CronField::DayOfWeek => "day-of-week",
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// CRON表达式解析错误，除字段数量错误外都带有出错的字段
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronParseError {
    #[error("需要5个字段，实际为{0}个")]
    FieldCount(usize),

    #[error("{field}字段取值{value}超出范围")]
    OutOfRange { field: CronField, value: u32 },

    #[error("{field}字段语法错误: '{token}'")]
    Syntax { field: CronField, token: String },

    #[error("{field}字段展开后为空: '{token}'")]
    Empty { field: CronField, token: String },
}

impl CronParseError {
    /// 出错的字段
    pub fn field(&self) -> Option<CronField> {
        match self {
            CronParseError::FieldCount(_) => None,
            CronParseError::OutOfRange { field, .. }
            | CronParseError::Syntax { field, .. }
            | CronParseError::Empty { field, .. } => Some(*field),
        }
    }
}

/// 展开后的字段取值集合，所有字段取值都小于64
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }

    fn parse(field: CronField, text: &str) -> Result<Self, CronParseError> {
        let (min, max) = field.range();
        let mut bits = 0u64;

        for item in text.split(',') {
            let syntax = || CronParseError::Syntax {
                field,
                token: item.to_string(),
            };
            if item.is_empty() {
                return Err(syntax());
            }

            let (base, step) = match item.split_once('/') {
                Some((base, step)) => {
                    let step: u32 = step.parse().map_err(|_| syntax())?;
                    if step == 0 {
                        return Err(syntax());
                    }
                    (base, Some(step))
                }
                None => (item, None),
            };

            let (lo, hi) = if base == "*" {
                (min, max)
            } else if let Some((lo, hi)) = base.split_once('-') {
                let lo: u32 = lo.parse().map_err(|_| syntax())?;
                let hi: u32 = hi.parse().map_err(|_| syntax())?;
                (lo, hi)
            } else {
                let value: u32 = base.parse().map_err(|_| syntax())?;
                // `5/15` 表示从5开始到字段上限
                if step.is_some() {
                    (value, max)
                } else {
                    (value, value)
                }
            };

            for value in [lo, hi] {
                if value < min || value > max {
                    return Err(CronParseError::OutOfRange { field, value });
                }
            }
            if lo > hi {
                return Err(CronParseError::Empty {
                    field,
                    token: item.to_string(),
                });
            }

            let step = step.unwrap_or(1);
            let mut value = lo;
            while value <= hi {
                bits |= 1u64 << value;
                match value.checked_add(step) {
                    Some(next) => value = next,
                    None => break,
                }
            }
        }

        if bits == 0 {
            return Err(CronParseError::Empty {
                field,
                token: text.to_string(),
            });
        }
        Ok(FieldSet(bits))
    }
}

/// 解析后的CRON表达式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl CronExpression {
    /// 解析CRON表达式
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != CronField::ALL.len() {
            return Err(CronParseError::FieldCount(parts.len()));
        }

        let mut sets = [FieldSet(0); 5];
        for (slot, (field, text)) in sets.iter_mut().zip(CronField::ALL.iter().zip(&parts)) {
            *slot = FieldSet::parse(*field, text)?;
        }

        Ok(Self {
            source: parts.join(" "),
            minutes: sets[0],
            hours: sets[1],
            days_of_month: sets[2],
            months: sets[3],
            days_of_week: sets[4],
        })
    }

    /// 解析CRON表达式，失败时转换为注册阶段的配置错误
    pub fn new(expr: &str) -> SchedulerResult<Self> {
        Self::parse(expr).map_err(|source| SchedulerError::InvalidCron {
            expr: expr.to_string(),
            source,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 给定时刻（按分钟精度）是否满足表达式
    pub fn matches(&self, instant: DateTime<Utc>) -> bool {
        self.minutes.contains(instant.minute())
            && self.hours.contains(instant.hour())
            && self.date_matches(instant)
    }

    fn date_matches(&self, instant: DateTime<Utc>) -> bool {
        self.days_of_month.contains(instant.day())
            && self.months.contains(instant.month())
            && self
                .days_of_week
                .contains(instant.weekday().num_days_from_sunday() % 7)
    }

    /// 从 `from` 之后的下一分钟开始向前搜索第一个匹配的时刻
    ///
    /// 搜索窗口为366天，窗口内没有匹配（例如2月30日）时返回 `None`。
    pub fn next_run(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = truncate(from, 60) + Duration::minutes(1);
        let limit = start + Duration::days(MAX_SEARCH_DAYS);
        let mut candidate = start;

        while candidate < limit {
            if !self.date_matches(candidate) {
                candidate = candidate
                    .date_naive()
                    .succ_opt()?
                    .and_hms_opt(0, 0, 0)?
                    .and_utc();
                continue;
            }
            if !self.hours.contains(candidate.hour()) {
                candidate = truncate(candidate, 3600) + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }
            return Some(candidate);
        }

        None
    }

    /// 从指定时间开始的多个执行时间
    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = from;
        while times.len() < count {
            match self.next_run(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }
}

impl FromStr for CronExpression {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// 截断到整分钟
pub fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    truncate(instant, 60)
}

/// 按秒数截断时间戳，例如 60 截断到整分钟
pub(crate) fn truncate(instant: DateTime<Utc>, unit_seconds: i64) -> DateTime<Utc> {
    let secs = instant.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(unit_seconds), 0).unwrap_or(instant)
}
