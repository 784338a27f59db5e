use redis::aio::ConnectionManager;
use redis::Client;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use jobq_core::config::RedisConfig;
use jobq_core::{SchedulerError, SchedulerResult};

use super::backend_error;

/// 建立带自动重连的Redis连接，失败时按配置重试，并用PING验证
pub async fn connect(config: &RedisConfig) -> SchedulerResult<ConnectionManager> {
    let client = Client::open(config.url.as_str())
        .map_err(|e| SchedulerError::Configuration(format!("无效的Redis URL: {e}")))?;

    let attempts = config.connect_retries.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match try_connect(&client).await {
            Ok(conn) => {
                if attempt > 1 {
                    debug!(attempt, "重试后成功连接Redis");
                }
                return Ok(conn);
            }
            Err(e) => {
                if attempt < attempts {
                    warn!(
                        "连接Redis失败 (attempt {}/{}): {}，{}ms后重试",
                        attempt, attempts, e, config.retry_delay_ms
                    );
                    sleep(config.retry_delay()).await;
                }
                last_error = Some(e);
            }
        }
    }

    let message = format!(
        "Failed to connect to Redis after {} attempts. Last error: {}",
        attempts,
        last_error.map_or("Unknown".to_string(), |e| e.to_string())
    );
    error!("{}", message);
    Err(SchedulerError::Backend(message))
}

async fn try_connect(client: &Client) -> SchedulerResult<ConnectionManager> {
    let mut conn = client
        .get_connection_manager()
        .await
        .map_err(|e| backend_error("connect", e))?;
    let pong: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| backend_error("PING", e))?;
    if pong != "PONG" {
        return Err(SchedulerError::Backend(format!(
            "Unexpected PING response: {pong}"
        )));
    }
    Ok(conn)
}
