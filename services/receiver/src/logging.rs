//! 日志系统：stdout 摘要 + 按天滚动文件明细。
//!
//! 文件日志落在 `<log_dir>/<service>.log.YYYY-MM-DD`，级别由 `DR_FILE_LOG_LEVEL` 单独控制，
//! 验签拒绝的具体原因只写在这里，不出现在响应里。

use std::{fs, path::Path};

use anyhow::{Context, Result};
use tracing_appender::{non_blocking::WorkerGuard, rolling::RollingFileAppender};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// 文件日志级别环境变量（独立于 `RUST_LOG`）。
const FILE_LOG_LEVEL_ENV: &str = "DR_FILE_LOG_LEVEL";
/// stdout 默认过滤。
const DEFAULT_STDOUT_FILTER: &str = "info";

/// 日志运行时守卫；析构前会刷完缓冲。
pub(crate) struct LogRuntime {
    _stdout: WorkerGuard,
    _file: WorkerGuard,
}

/// 安装全局 subscriber。重复安装视为错误。
pub(crate) fn init(service_name: &str, log_dir: &Path) -> Result<LogRuntime> {
    let appender = daily_appender(service_name, log_dir)?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_level = file_level_from(std::env::var(FILE_LOG_LEVEL_ENV).ok().as_deref());
    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_STDOUT_FILTER));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(stdout_writer)
                .with_target(false)
                .compact()
                .with_filter(stdout_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_level),
        )
        .try_init()
        .context("install tracing subscriber")?;

    Ok(LogRuntime {
        _stdout: stdout_guard,
        _file: file_guard,
    })
}

fn daily_appender(service_name: &str, log_dir: &Path) -> Result<RollingFileAppender> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir: {}", log_dir.display()))?;
    Ok(tracing_appender::rolling::daily(
        log_dir,
        format!("{service_name}.log"),
    ))
}

/// 解析文件日志级别，缺省或无法识别时为 `debug`。
fn file_level_from(raw: Option<&str>) -> LevelFilter {
    raw.and_then(|value| value.trim().parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::DEBUG)
}
