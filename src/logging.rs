//! 日志初始化
//!
//! 基于 `tracing-subscriber`：控制台与文件两个输出层共享同一个过滤器。
//! 设置了 `RUST_LOG` 时以它为准，否则使用配置中的级别。

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigError, ConfigResult, LoggingConfig};

/// 构建过滤器：`RUST_LOG` 优先
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()))
}

/// 安装全局订阅器
///
/// 已经安装过订阅器时返回 `Ok(false)`，不会覆盖现有订阅器。
pub fn init(config: &LoggingConfig) -> ConfigResult<bool> {
    config.validate()?;

    let console = config.log_to_console.then(|| fmt::layer().with_target(true));

    let file = if config.log_to_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file_path)
            .map_err(ConfigError::FileError)?;
        Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file)),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(console)
        .with(file)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(target: "bridge", "Logging initialised at {}", config.level);
    }
    Ok(installed)
}
