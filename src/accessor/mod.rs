//! 访问器路径语言
//!
//! 路径由 `/` 分隔的步骤组成，用于在对象图中读取或写入值，例如
//! `position/x`、`transform:Arm/component:Light/intensity`、
//! `tags/!index:(cursor/slot)`。详见 [`path`] 模块的语法说明。

pub mod eval;
pub mod path;
pub mod reflect;

use std::collections::HashMap;

pub use eval::{assign, evaluate};
pub use path::{AccessorPath, Argument, Operand, Step, StepKind};
pub use reflect::Reflect;

use crate::core::AccessorResult;

/// Parse a path string
pub fn parse(source: &str) -> AccessorResult<AccessorPath> {
    AccessorPath::parse(source)
}

/// 已解析路径的缓存
///
/// 同一路径字符串在每帧的 `update` / `query` 中反复出现，缓存后只解析一次。
/// 超过容量时整体清空。
#[derive(Debug)]
pub struct PathCache {
    entries: HashMap<String, AccessorPath>,
    capacity: usize,
}

impl Default for PathCache {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

impl PathCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get_or_parse(&mut self, source: &str) -> AccessorResult<&AccessorPath> {
        if !self.entries.contains_key(source) {
            let parsed = AccessorPath::parse(source)?;
            if self.entries.len() >= self.capacity {
                tracing::debug!(target: "accessor", "Path cache full ({}), clearing", self.capacity);
                self.entries.clear();
            }
            self.entries.insert(source.to_string(), parsed);
        }
        Ok(&self.entries[source])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
