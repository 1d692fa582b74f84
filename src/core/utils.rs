//! 核心工具函数
//!
//! 对象 ID 生成

/// 单调递增的对象 ID 生成器
///
/// 生成形如 `{prefix}{n}` 的 ID。计数器从不回退，因此同一个桥接会话内
/// 生成的 ID 不会重复。
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
    next: u64,
}

impl IdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }

    /// 使用随机会话前缀，避免多个会话之间的 ID 混淆
    pub fn with_random_prefix() -> Self {
        let session: u32 = rand::random();
        Self::new(format!("{:08x}-", session))
    }

    pub fn next_id(&mut self) -> String {
        let id = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
