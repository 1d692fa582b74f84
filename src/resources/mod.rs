//! 资源加载契约
//!
//! 访问器的 `resource:` 步骤与值转换器中的资源引用都通过 `ResourceLoader`
//! 解析。加载器从不阻塞调用线程：尚未加载的资源立即返回 `Pending` 句柄，
//! 加载完成后由 `poll_completed` 交给桥接层，桥接层再将其转为
//! `resourceLoaded` 信封投递给请求对象。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::accessor::Reflect;
use crate::convert::{shape_of, Convert, ConvertContext};
use crate::core::{ConvertError, ConvertResult};

/// 资源加载状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Pending,
    Ready,
    Failed(String),
}

impl ResourceState {
    pub fn label(&self) -> &'static str {
        match self {
            ResourceState::Pending => "pending",
            ResourceState::Ready => "ready",
            ResourceState::Failed(_) => "failed",
        }
    }
}

/// 资源句柄
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceHandle {
    pub path: String,
    pub state: ResourceState,
    /// 已加载资源的字节数
    pub size: usize,
}

impl Default for ResourceHandle {
    fn default() -> Self {
        Self::pending("")
    }
}

impl ResourceHandle {
    pub fn pending(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: ResourceState::Pending,
            size: 0,
        }
    }

    pub fn ready(path: impl Into<String>, size: usize) -> Self {
        Self {
            path: path.into(),
            state: ResourceState::Ready,
            size,
        }
    }

    pub fn failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: ResourceState::Failed(reason.into()),
            size: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ResourceState::Ready
    }
}

/// 一次异步加载的完成通知
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceCompletion {
    pub requester: Option<String>,
    pub handle: ResourceHandle,
}

/// 宿主提供的资源加载契约
pub trait ResourceLoader {
    /// 解析资源路径。不得阻塞；未就绪时返回 `Pending` 句柄。
    fn load(&self, path: &str, requester: Option<&str>) -> ResourceHandle;

    /// 取出自上次调用以来完成的加载
    fn poll_completed(&self) -> Vec<ResourceCompletion> {
        Vec::new()
    }
}

impl Convert for ResourceHandle {
    const SHAPE: &'static str = "resource";

    fn decode(value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<Self> {
        let path = match value {
            Value::String(path) => path.as_str(),
            Value::Object(map) => map.get("resource").and_then(Value::as_str).ok_or_else(|| {
                ConvertError::new(Self::SHAPE, "object form needs a string `resource` field")
            })?,
            other => {
                return Err(ConvertError::new(
                    Self::SHAPE,
                    format!("expected resource path string, got {}", shape_of(other)),
                ))
            }
        };
        let loader = ctx.resources.ok_or_else(|| {
            ConvertError::new(Self::SHAPE, format!("no resource loader to resolve `{}`", path))
        })?;
        Ok(loader.load(path, ctx.requester))
    }

    fn encode(&self) -> Value {
        let mut value = json!({
            "resource": self.path,
            "state": self.state.label(),
            "size": self.size,
        });
        if let ResourceState::Failed(reason) = &self.state {
            value["error"] = Value::String(reason.clone());
        }
        value
    }
}

impl Reflect for ResourceHandle {
    fn type_name(&self) -> &'static str {
        "ResourceHandle"
    }

    fn to_json(&self) -> Value {
        self.encode()
    }

    fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()> {
        *self = ResourceHandle::decode(value, ctx)?;
        Ok(())
    }

    fn call(&self, method: &str, _args: &[Value]) -> Option<Result<Value, String>> {
        match method {
            "isReady" => Some(Ok(Value::Bool(self.is_ready()))),
            _ => None,
        }
    }
}

/// 预先填充的同步资源表
#[derive(Debug, Default)]
pub struct StaticResources {
    entries: HashMap<String, usize>,
}

impl StaticResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, size: usize) -> Self {
        self.entries.insert(path.into(), size);
        self
    }
}

impl ResourceLoader for StaticResources {
    fn load(&self, path: &str, _requester: Option<&str>) -> ResourceHandle {
        match self.entries.get(path) {
            Some(size) => ResourceHandle::ready(path, *size),
            None => ResourceHandle::failed(path, "resource not found"),
        }
    }
}

/// 基于文件系统的异步资源加载器
///
/// 每个未缓存的路径启动一个加载线程，完成结果经通道回传，
/// 在主线程调用 `poll_completed` 时写入缓存。
pub struct FileResourceLoader {
    root: PathBuf,
    cache: Mutex<HashMap<String, ResourceHandle>>,
    waiters: Mutex<HashMap<String, Vec<Option<String>>>>,
    done_tx: Sender<ResourceHandle>,
    done_rx: Receiver<ResourceHandle>,
}

impl FileResourceLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let (done_tx, done_rx) = unbounded();
        Self {
            root: root.as_ref().to_path_buf(),
            cache: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            done_tx,
            done_rx,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn spawn_load(&self, path: &str) {
        let full_path = self.root.join(path);
        let path = path.to_string();
        let tx = self.done_tx.clone();
        thread::spawn(move || {
            let handle = match std::fs::read(&full_path) {
                Ok(bytes) => ResourceHandle::ready(path, bytes.len()),
                Err(e) => ResourceHandle::failed(path, e.to_string()),
            };
            if tx.send(handle).is_err() {
                tracing::debug!(target: "resources", "Loader dropped before load completed");
            }
        });
    }
}

impl ResourceLoader for FileResourceLoader {
    fn load(&self, path: &str, requester: Option<&str>) -> ResourceHandle {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = cache.get(path) {
            if handle.state == ResourceState::Pending {
                let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
                waiters
                    .entry(path.to_string())
                    .or_default()
                    .push(requester.map(str::to_owned));
            }
            return handle.clone();
        }

        tracing::debug!(target: "resources", "Loading resource {}", path);
        let handle = ResourceHandle::pending(path);
        cache.insert(path.to_string(), handle.clone());
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), vec![requester.map(str::to_owned)]);
        self.spawn_load(path);
        handle
    }

    fn poll_completed(&self) -> Vec<ResourceCompletion> {
        let mut completions = Vec::new();
        for handle in self.done_rx.try_iter() {
            if let ResourceState::Failed(reason) = &handle.state {
                tracing::warn!(target: "resources", "Failed to load {}: {}", handle.path, reason);
            }
            self.cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(handle.path.clone(), handle.clone());
            let requesters = self
                .waiters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&handle.path)
                .unwrap_or_default();
            for requester in requesters {
                completions.push(ResourceCompletion {
                    requester,
                    handle: handle.clone(),
                });
            }
        }
        completions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for_completions(loader: &FileResourceLoader) -> Vec<ResourceCompletion> {
        let start = Instant::now();
        loop {
            let done = loader.poll_completed();
            if !done.is_empty() || start.elapsed() > Duration::from_secs(5) {
                return done;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_static_resources() {
        let loader = StaticResources::new().with("textures/grid.png", 64);
        assert!(loader.load("textures/grid.png", None).is_ready());
        assert!(matches!(
            loader.load("missing.png", None).state,
            ResourceState::Failed(_)
        ));
    }

    #[test]
    fn test_file_loader_is_pending_then_ready() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("level.json"), b"{\"a\":1}").unwrap();
        let loader = FileResourceLoader::new(dir.path());

        let first = loader.load("level.json", Some("obj1"));
        assert_eq!(first.state, ResourceState::Pending);

        let done = wait_for_completions(&loader);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].requester.as_deref(), Some("obj1"));
        assert_eq!(done[0].handle, ResourceHandle::ready("level.json", 7));

        assert!(loader.load("level.json", None).is_ready());
    }

    #[test]
    fn test_file_loader_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileResourceLoader::new(dir.path());
        loader.load("nope.bin", None);
        let done = wait_for_completions(&loader);
        assert!(matches!(done[0].handle.state, ResourceState::Failed(_)));
    }

    #[test]
    fn test_decode_requires_loader() {
        let ctx = ConvertContext::default();
        let err = ResourceHandle::decode(&json!("a.png"), &ctx).unwrap_err();
        assert_eq!(err.expected, "resource");

        let loader = StaticResources::new().with("a.png", 3);
        let ctx = ConvertContext::new(Some(&loader), None);
        let handle = ResourceHandle::decode(&json!({"resource": "a.png"}), &ctx).unwrap();
        assert_eq!(handle.encode()["state"], json!("ready"));
    }
}
