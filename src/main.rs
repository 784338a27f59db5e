use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info, warn};

use jobq::app::{register_config_tasks, Application};
use jobq::shutdown::ShutdownManager;
use jobq_core::config::{AppConfig, LogFormat};
use jobq_core::logging::{init_from_config, init_logging};
use jobq_core::{CronExpression, TaskRegistry};

/// 关闭时等待当前作业结束的最长时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "jobq", version, about = "定时任务执行引擎")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 运行调度器、Worker池和HTTP接口，直到收到Ctrl+C或SIGTERM
    Run,
    /// 输出运行健康报告，存在逾期任务时以状态码2退出
    Health,
    /// 列出死信作业，或重放指定的死信作业
    DeadLetters {
        #[arg(long, value_name = "JOB_ID")]
        replay: Option<String>,
    },
    /// 输出CRON表达式接下来的执行时间
    Cron {
        expression: String,
        /// 起始时间（RFC 3339），缺省为当前时间
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run(cli.config.as_deref()).await,
        Commands::Health => {
            let healthy = health(cli.config.as_deref()).await?;
            if !healthy {
                std::process::exit(2);
            }
            Ok(())
        }
        Commands::DeadLetters { replay } => dead_letters(cli.config.as_deref(), replay).await,
        Commands::Cron {
            expression,
            from,
            count,
        } => print_upcoming(&expression, from.unwrap_or_else(Utc::now), count),
    }
}

async fn run(config_path: Option<&str>) -> Result<()> {
    let config = AppConfig::load(config_path).context("加载配置失败")?;
    init_from_config(&config.observability)?;
    info!("启动定时任务执行引擎");

    if config.observability.metrics_enabled {
        install_metrics_exporter(&config.observability.metrics_bind_address)?;
    }

    let registry = Arc::new(TaskRegistry::new());
    register_config_tasks(&registry, &config.tasks).await?;
    let app = Arc::new(Application::new(config, registry).await?);

    let shutdown_manager = ShutdownManager::new();
    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        _ = wait_for_exit(&app_handle) => {
            warn!("应用提前退出");
        }
    }
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }
    Ok(())
}

/// 轮询后台任务是否已经结束
async fn wait_for_exit(handle: &tokio::task::JoinHandle<()>) {
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// 为管理命令构建应用，日志只输出警告以上级别
async fn admin_app(config_path: Option<&str>) -> Result<Application> {
    let config = AppConfig::load(config_path).context("加载配置失败")?;
    init_logging("warn", LogFormat::Pretty)?;
    let registry = Arc::new(TaskRegistry::new());
    register_config_tasks(&registry, &config.tasks).await?;
    Application::new(config, registry).await
}

async fn health(config_path: Option<&str>) -> Result<bool> {
    let app = admin_app(config_path).await?;
    let report = app.health_monitor().check().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.is_healthy())
}

async fn dead_letters(config_path: Option<&str>, replay: Option<String>) -> Result<()> {
    let app = admin_app(config_path).await?;
    let output = match replay {
        Some(job_id) => {
            let job = app
                .queue()
                .replay_dead_letter(&job_id)
                .await
                .with_context(|| format!("重放死信作业失败: {job_id}"))?;
            serde_json::to_string_pretty(&job)?
        }
        None => serde_json::to_string_pretty(&app.queue().dead_letters().await?)?,
    };
    println!("{output}");
    Ok(())
}

fn print_upcoming(expression: &str, from: DateTime<Utc>, count: usize) -> Result<()> {
    let cron = CronExpression::new(expression)?;
    let upcoming = cron.upcoming(from, count);
    if upcoming.is_empty() {
        println!("{cron}: 366天内没有匹配的时间");
    }
    for instant in upcoming {
        println!("{}", instant.to_rfc3339());
    }
    Ok(())
}

fn install_metrics_exporter(bind_address: &str) -> Result<()> {
    let address: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .context("安装Prometheus指标导出器失败")?;
    info!(address = %address, "Prometheus指标导出器已启动");
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
