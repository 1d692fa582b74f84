/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖与校验
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::impl_default;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 桥接主配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// 出站缓冲上限，溢出时丢弃最旧的信封
    pub max_outbound: usize,

    /// 每次 flush 以单个 JSON 数组写出全部信封
    pub batch_outbound: bool,

    /// 自动分配的对象 id 前缀
    pub id_prefix: String,

    /// 传输配置
    pub transport: TransportConfig,

    /// 日志配置
    pub logging: LoggingConfig,
}

impl_default!(BridgeConfig {
    max_outbound: 4096,
    batch_outbound: true,
    id_prefix: String::new(),
    transport: TransportConfig::Loopback,
    logging: LoggingConfig::default(),
});

/// 传输方式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// 进程内通道
    Loopback,
    /// 内嵌脚本引擎
    Script {
        /// 启动时执行的脚本文件
        #[serde(default)]
        bootstrap: Option<PathBuf>,
    },
    /// TCP 服务端
    Socket {
        bind_address: String,
        port: u16,
        max_connections: usize,
    },
    /// 外部中继
    Relay {
        address: String,
        reconnect_ms: u64,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Loopback
    }
}

impl BridgeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let TransportConfig::Socket {
            bind_address, port, ..
        } = &mut self.transport
        {
            if let Some(val) = lookup("BRIDGE_PORT") {
                if let Ok(value) = val.parse() {
                    *port = value;
                }
            }
            if let Some(val) = lookup("BRIDGE_BIND_ADDRESS") {
                *bind_address = val;
            }
        }
        if let TransportConfig::Relay { address, .. } = &mut self.transport {
            if let Some(val) = lookup("BRIDGE_RELAY_ADDRESS") {
                *address = val;
            }
        }
        if let Some(val) = lookup("BRIDGE_MAX_OUTBOUND") {
            if let Ok(value) = val.parse() {
                self.max_outbound = value;
            }
        }
        if let Some(val) = lookup("BRIDGE_LOG_LEVEL") {
            self.logging.level = val.parse().unwrap_or(self.logging.level);
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_outbound == 0 {
            return Err(ConfigError::ValidationError(
                "max_outbound must be greater than zero".into(),
            ));
        }
        match &self.transport {
            TransportConfig::Socket {
                bind_address,
                max_connections,
                ..
            } => {
                if bind_address.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "socket bind_address must not be empty".into(),
                    ));
                }
                if *max_connections == 0 {
                    return Err(ConfigError::ValidationError(
                        "socket max_connections must be greater than zero".into(),
                    ));
                }
            }
            TransportConfig::Relay {
                address,
                reconnect_ms,
            } => {
                if address.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "relay address must not be empty".into(),
                    ));
                }
                if *reconnect_ms == 0 {
                    return Err(ConfigError::ValidationError(
                        "relay reconnect_ms must be greater than zero".into(),
                    ));
                }
            }
            TransportConfig::Loopback | TransportConfig::Script { .. } => {}
        }
        self.logging.validate()
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./bridge.toml
    /// 2. ./bridge.json
    /// 3. ~/.config/bridge_engine/bridge.toml
    /// 4. 使用默认配置
    pub fn load_or_default() -> Self {
        if let Ok(config) = Self::from_toml_file("bridge.toml") {
            tracing::info!(target: "bridge", "Loaded config from bridge.toml");
            return config;
        }

        if let Ok(config) = Self::from_json_file("bridge.json") {
            tracing::info!(target: "bridge", "Loaded config from bridge.json");
            return config;
        }

        if let Some(home) = env::var_os("HOME") {
            let config_path = PathBuf::from(home)
                .join(".config")
                .join("bridge_engine")
                .join("bridge.toml");

            if let Ok(config) = Self::from_toml_file(&config_path) {
                tracing::info!(target: "bridge", "Loaded config from {:?}", config_path);
                return config;
            }
        }

        tracing::info!(target: "bridge", "Using default configuration");
        Self::default()
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到文件
    pub log_to_file: bool,

    /// 日志文件路径
    pub log_file_path: String,

    /// 是否输出到控制台
    pub log_to_console: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_file: false,
    log_file_path: "bridge_engine.log".to_string(),
    log_to_console: true,
});

impl LoggingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.log_to_file && self.log_file_path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "log_file_path is required when log_to_file is set".into(),
            ));
        }
        Ok(())
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    /// `EnvFilter` 指令
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_directive())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::ParseError(format!("unknown log level `{}`", other))),
        }
    }
}
