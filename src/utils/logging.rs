//! 日志系统
//!
//! 基于 tracing 的日志初始化，支持：
//! - 可配置的日志级别（`RUST_LOG` 优先）
//! - JSON / Pretty / Compact 三种格式
//! - stdout、stderr 或文件输出

use crate::api::error::ConfigError;
use crate::config::settings::LoggingConfig;
use crate::Result;
use std::path::PathBuf;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 初始化日志系统
///
/// 只使用第一个输出目标。
///
/// ```no_run
/// use ferrousmoat::config::LoggingConfig;
/// use ferrousmoat::utils::logging::init_logging;
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: "json".to_string(),
///     output: vec!["logs/moat.log".to_string()],
/// };
///
/// init_logging(&config).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| {
            // 日志系统尚未初始化，只能写 stderr
            eprintln!(
                "Warning: Invalid log level '{}', using 'info' as default",
                config.level
            );
            EnvFilter::new("info")
        })
    });

    let primary_output = config
        .output
        .first()
        .map(|s| s.as_str())
        .unwrap_or("stdout");

    if config.output.len() > 1 {
        eprintln!(
            "Warning: Multiple log outputs specified, only the first one ({}) will be used",
            primary_output
        );
    }

    init_output(primary_output, &config.format, filter)?;

    tracing::info!(
        "Logging initialized: level={}, format={}, output={}",
        config.level,
        config.format,
        primary_output
    );

    Ok(())
}

/// 从环境变量初始化日志系统
///
/// - `RUST_LOG`: 日志级别，如 `RUST_LOG=debug,ferrousmoat=info`
/// - `RUST_LOG_FORMAT`: `json`、`pretty` 或 `compact`
/// - `RUST_LOG_OUTPUT`: 输出目标，逗号分隔，仅使用第一个
pub fn init_logging_from_env() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let output = std::env::var("RUST_LOG_OUTPUT")
        .ok()
        .and_then(|s| {
            s.split(',')
                .map(str::trim)
                .find(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "stdout".to_string());

    init_output(&output, &format, filter)
}

fn init_output(output: &str, format: &str, filter: EnvFilter) -> Result<()> {
    match output {
        "stdout" => init_subscriber(format, filter, std::io::stdout),
        "stderr" => init_subscriber(format, filter, std::io::stderr),
        file_path => {
            let path = PathBuf::from(file_path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ConfigError::Invalid(format!("Failed to create log directory: {}", e))
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| {
                    ConfigError::Invalid(format!("Failed to open log file {}: {}", file_path, e))
                })?;
            init_subscriber(format, filter, std::sync::Mutex::new(file))
        }
    }
}

fn init_subscriber<W>(format: &str, filter: EnvFilter, writer: W) -> Result<()>
where
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = match format.to_lowercase().as_str() {
        "json" => fmt::layer()
            .with_writer(writer)
            .json()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .boxed(),
        "pretty" | "human" => fmt::layer()
            .with_writer(writer)
            .pretty()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        // 默认 compact
        _ => fmt::layer()
            .with_writer(writer)
            .compact()
            .with_target(true)
            .with_level(true)
            .boxed(),
    };

    Registry::default()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| ConfigError::Invalid(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}
