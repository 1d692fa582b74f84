//! 统一错误处理模块
//!
//! 提供桥接层范围内的统一错误类型定义
//!
//! ## 错误类型分层
//!
//! - **访问器错误** (`AccessorError`): 路径解析与求值失败
//! - **转换错误** (`ConvertError`): JSON 与原生值之间的形状不匹配
//! - **传输错误** (`TransportError`): 通道级别的收发失败
//!
//! `BridgeError` 汇总以上所有错误，并额外承载注册表与信封级别的错误。

use thiserror::Error;

/// 桥接核心错误类型
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Object id already registered: {0}")]
    DuplicateId(String),

    #[error("Object id {0} was retired this tick and cannot be reused yet")]
    IdRetired(String),

    #[error("Unknown object type: {0}")]
    UnknownType(String),

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Accessor error: {0}")]
    Accessor(#[from] AccessorError),

    #[error("Conversion error: {0}")]
    Convert(#[from] ConvertError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Handler error: {0}")]
    Handler(String),
}

impl BridgeError {
    /// 失败信封中使用的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::ObjectNotFound(_) => "ObjectNotFound",
            BridgeError::DuplicateId(_) | BridgeError::IdRetired(_) => "DuplicateId",
            BridgeError::UnknownType(_) | BridgeError::UnknownTemplate(_) => "UnknownType",
            BridgeError::MalformedEnvelope(_) => "MalformedEnvelope",
            BridgeError::Accessor(e) => e.code(),
            BridgeError::Convert(_) => "TypeConversionError",
            BridgeError::Transport(_) => "TransportError",
            BridgeError::Handler(_) => "HandlerError",
        }
    }
}

/// 访问器（路径表达式）错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccessorError {
    #[error("Invalid path syntax at byte {position}: {reason}")]
    Syntax { position: usize, reason: String },

    #[error("Path resolution failed at step {step} `{text}` (resolved prefix: `{prefix}`): {reason}")]
    PathResolution {
        step: usize,
        text: String,
        prefix: String,
        reason: String,
    },

    #[error("Conversion failed at `{path}`: {source}")]
    Convert {
        path: String,
        #[source]
        source: ConvertError,
    },
}

impl AccessorError {
    pub fn code(&self) -> &'static str {
        match self {
            AccessorError::Syntax { .. } | AccessorError::PathResolution { .. } => {
                "PathResolutionError"
            }
            AccessorError::Convert { .. } => "TypeConversionError",
        }
    }
}

/// 值转换错误
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Expected {expected}: {reason}")]
pub struct ConvertError {
    /// 期望的形状名称，例如 `vector3` 或 `color`
    pub expected: &'static str,
    pub reason: String,
}

impl ConvertError {
    pub fn new(expected: &'static str, reason: impl Into<String>) -> Self {
        Self {
            expected,
            reason: reason.into(),
        }
    }
}

/// 传输层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transport not started: {0}")]
    NotStarted(String),

    #[error("Failed to bind: {0}")]
    Bind(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    Send(String),

    #[error("Script engine error: {0}")]
    Script(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

/// 桥接结果类型别名
pub type BridgeResult<T> = Result<T, BridgeError>;
pub type AccessorResult<T> = Result<T, AccessorError>;
pub type ConvertResult<T> = Result<T, ConvertError>;
pub type TransportResult<T> = Result<T, TransportError>;
