use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use jobq_core::models::JobContext;
use jobq_core::traits::TaskHandler;

/// stderr中保留在错误信息里的最大行数
const STDERR_TAIL_LINES: usize = 20;

/// Shell任务参数，来自作业的payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTaskParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// 执行外部命令的处理器
///
/// 进程以非零退出码结束时作业失败，错误信息带上stderr的最后几行。
/// 作业超时被中止时子进程随之被杀死。
#[derive(Debug, Default)]
pub struct ShellHandler;

impl ShellHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskHandler for ShellHandler {
    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let params: ShellTaskParams = serde_json::from_value(ctx.payload.clone())
            .with_context(|| format!("解析Shell任务参数失败: {}", ctx.task_name))?;

        info!(
            job_id = %ctx.job_id,
            command = %params.command,
            args = ?params.args,
            "执行Shell任务"
        );
        let started = Instant::now();

        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("JOBQ_JOB_ID", &ctx.job_id)
            .env("JOBQ_TASK_NAME", &ctx.task_name)
            .env("JOBQ_ATTEMPT", ctx.attempt.to_string());
        if let Some(dir) = &params.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&params.env);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("启动Shell命令失败: {}", params.command))?;
        let stdout = child.stdout.take().context("无法获取stdout")?;
        let stderr = child.stderr.take().context("无法获取stderr")?;

        let job_id = ctx.job_id.clone();
        let stdout_task = async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(job_id = %job_id, "stdout: {}", line);
            }
        };
        let stderr_task = async move {
            let mut tail = Vec::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail
        };
        let ((), stderr_tail) = tokio::join!(stdout_task, stderr_task);

        let status = child.wait().await.context("等待进程结束失败")?;
        info!(
            job_id = %ctx.job_id,
            exit_code = ?status.code(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Shell任务结束"
        );

        if !status.success() {
            if stderr_tail.is_empty() {
                bail!("命令执行失败，退出码: {:?}", status.code());
            }
            bail!(
                "命令执行失败，退出码: {:?}\n{}",
                status.code(),
                stderr_tail.join("\n")
            );
        }
        Ok(())
    }
}

/// 按配置中的处理器名称查找内置处理器
pub fn builtin_handler(name: &str) -> Option<Arc<dyn TaskHandler>> {
    match name {
        "shell" => Some(Arc::new(ShellHandler::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobq_core::models::Job;
    use serde_json::json;

    fn context(payload: serde_json::Value) -> JobContext {
        JobContext::from(&Job::new("shell-task", payload, 3, chrono::Utc::now()))
    }

    #[test]
    fn test_builtin_handler_lookup() {
        assert!(builtin_handler("shell").is_some());
        assert!(builtin_handler("http").is_none());
    }

    #[test]
    fn test_params_defaults() {
        let params: ShellTaskParams = serde_json::from_value(json!({"command": "true"})).unwrap();
        assert!(params.args.is_empty());
        assert!(params.env.is_empty());
        assert!(params.working_dir.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_success() {
        let handler = ShellHandler::new();
        let ctx = context(json!({"command": "sh", "args": ["-c", "echo hello"]}));
        handler.execute(&ctx).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_nonzero_exit_reports_stderr() {
        let handler = ShellHandler::new();
        let ctx = context(json!({
            "command": "sh",
            "args": ["-c", "echo \"bad $GREETING\" >&2; exit 3"],
            "env": {"GREETING": "input"}
        }));
        let err = handler.execute(&ctx).await.unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("Some(3)"));
        assert!(message.contains("bad input"));
    }

    #[tokio::test]
    async fn test_shell_rejects_missing_command() {
        let handler = ShellHandler::new();
        let err = handler.execute(&context(json!({}))).await.unwrap_err();
        assert!(format!("{err:#}").contains("解析Shell任务参数失败"));
    }
}
