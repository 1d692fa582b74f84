//! 核心模块
//!
//! 包含桥接层共用的基础设施：
//! - `error` - 错误类型定义
//! - `macros` - 减少样板代码的宏
//! - `utils` - 对象 ID 生成

pub mod error;
pub mod utils;
#[macro_use]
pub mod macros;

// 重新导出错误类型
pub use error::{
    AccessorError, AccessorResult, BridgeError, BridgeResult, ConvertError, ConvertResult,
    TransportError, TransportResult,
};

pub use utils::IdGenerator;
