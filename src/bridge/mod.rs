//! 桥接注册表与分发循环
//!
//! 一个 `Bridge` 对应一个会话：持有 id ↔ 对象映射，每帧从传输层取出一次
//! 入站帧，按到达顺序分发，再把本帧累积的出站信封作为一批写出。
//!
//! ## 每帧顺序
//!
//! 1. 资源加载完成 → `resourceLoaded`
//! 2. 入站信封（取帧时的快照，按到达顺序）
//! 3. 每个对象的 `update(dt)`
//! 4. 出站 flush，之后本帧注销的 id 才可重新使用

pub mod envelope;
pub mod object;
pub mod registry;
pub mod system;

pub use envelope::{events, Envelope};
pub use object::{BridgeObject, EventTable, Handler, Interest, Interests, ObjectContext};
pub use registry::{ObjectKey, Registry};
pub use system::{bridge_tick_system, BridgeStats, FrameTime};

use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};

use crate::accessor::{assign, evaluate, PathCache};
use crate::config::BridgeConfig;
use crate::convert::{shape_of, ConvertContext};
use crate::core::{BridgeError, BridgeResult, IdGenerator, TransportError, TransportResult};
use crate::resources::ResourceLoader;
use crate::transport::{self, BridgeTransport};
use envelope::parse_frame;
use object::{ErasedObject, Slot};
use registry::Entry;

type Factory = Box<dyn Fn() -> Box<dyn ErasedObject>>;

/// `create` 可引用的命名预设
struct Template {
    type_name: String,
    update: Map<String, Value>,
}

/// 一帧的处理统计
#[derive(Debug, Default)]
pub struct TickReport {
    /// 分发的入站信封数
    pub dispatched: usize,
    /// 回报给控制端的失败数
    pub failed: usize,
    /// 无法解析而丢弃的入站条目数
    pub malformed: usize,
    /// 投递的资源完成通知数
    pub resources: usize,
    /// 传输层实际送出的信封数
    pub flushed: usize,
    pub transport_error: Option<TransportError>,
}

pub struct Bridge {
    transport: Box<dyn BridgeTransport>,
    registry: Registry,
    types: HashMap<String, Factory>,
    templates: HashMap<String, Template>,
    outbox: Vec<Envelope>,
    retired: HashSet<String>,
    ids: IdGenerator,
    paths: PathCache,
    resources: Option<Box<dyn ResourceLoader>>,
    failures: usize,
}

impl Bridge {
    pub fn new(transport: Box<dyn BridgeTransport>) -> Self {
        Self {
            transport,
            registry: Registry::new(),
            types: HashMap::new(),
            templates: HashMap::new(),
            outbox: Vec::new(),
            retired: HashSet::new(),
            ids: IdGenerator::with_random_prefix(),
            paths: PathCache::default(),
            resources: None,
            failures: 0,
        }
    }

    /// 按配置构建传输层；配置了 `id_prefix` 时用它代替随机会话前缀
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        let mut bridge = Self::new(transport::build(config)?);
        if !config.id_prefix.is_empty() {
            bridge.ids = IdGenerator::new(config.id_prefix.clone());
        }
        Ok(bridge)
    }

    pub fn with_resources(mut self, loader: impl ResourceLoader + 'static) -> Self {
        self.resources = Some(Box::new(loader));
        self
    }

    pub fn start(&mut self) -> BridgeResult<()> {
        self.transport.start()?;
        tracing::info!(target: "bridge", "Bridge started on {} transport", self.transport.name());
        Ok(())
    }

    pub fn stop(&mut self) {
        self.transport.stop();
        tracing::info!(target: "bridge", "Bridge stopped");
    }

    pub fn is_started(&self) -> bool {
        self.transport.is_started()
    }

    pub fn transport(&self) -> &dyn BridgeTransport {
        self.transport.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ---- 类型目录 ----

    /// 让 `create` 可以按名称构造 `T`
    pub fn register_type<T: BridgeObject + Default>(&mut self, name: impl Into<String>) {
        self.register_factory(name, T::default);
    }

    pub fn register_factory<T, F>(&mut self, name: impl Into<String>, factory: F)
    where
        T: BridgeObject,
        F: Fn() -> T + 'static,
    {
        let name = name.into();
        tracing::debug!(target: "bridge", "Registered type {}", name);
        self.types
            .insert(name, Box::new(move || Box::new(Slot::new(factory()))));
    }

    /// 注册命名预设：`update` 是路径 → 值的对象，在 `create` 自带的 `update` 之前应用
    pub fn register_template(
        &mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        update: Value,
    ) -> BridgeResult<()> {
        let type_name = type_name.into();
        if !self.types.contains_key(&type_name) {
            return Err(BridgeError::UnknownType(type_name));
        }
        let update = match update {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(BridgeError::MalformedEnvelope(format!(
                    "template update must be an object, got {}",
                    shape_of(&other)
                )))
            }
        };
        self.templates
            .insert(name.into(), Template { type_name, update });
        Ok(())
    }

    // ---- 注册表 ----

    /// 以新分配的 id 注册对象
    pub fn register<T: BridgeObject>(&mut self, object: T) -> BridgeResult<String> {
        let id = self.next_free_id();
        self.register_with_id(id.clone(), object)?;
        Ok(id)
    }

    /// 以指定 id 注册对象；id 已存在或在本帧刚被注销时失败
    pub fn register_with_id<T: BridgeObject>(
        &mut self,
        id: impl Into<String>,
        object: T,
    ) -> BridgeResult<()> {
        let id = id.into();
        self.check_id_available(&id)?;
        let slot: Box<dyn ErasedObject> = Box::new(Slot::new(object));
        let interests = Interests::from_events(slot.default_events().iter().map(String::as_str));
        let type_name = slot.reflect().type_name().to_string();
        self.insert_entry(Entry {
            id,
            type_name,
            interests,
            object: slot,
        })
    }

    /// 注销对象：先调用 `on_destroyed`，再发出 `destroyed`
    ///
    /// 已在出站缓冲中的该对象信封不会撤回，会在 `destroyed` 之前送出。
    pub fn unregister(&mut self, id: &str) -> BridgeResult<()> {
        let mut entry = self
            .registry
            .remove(id)
            .ok_or_else(|| BridgeError::ObjectNotFound(id.to_string()))?;
        run_object(
            &mut entry,
            &mut self.outbox,
            self.resources.as_deref(),
            |object, ctx| object.destroyed(ctx),
        );
        self.outbox
            .push(Envelope::new(events::DESTROYED).with_id(id));
        self.retired.insert(id.to_string());
        tracing::debug!(target: "bridge", "Unregistered {} ({})", id, entry.type_name);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// 已注册 id，按注册顺序
    pub fn ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    pub fn type_of(&self, id: &str) -> Option<&str> {
        self.registry.get(id).map(|e| e.type_name.as_str())
    }

    pub fn interests(&self, id: &str) -> Option<&Interests> {
        self.registry.get(id).map(|e| &e.interests)
    }

    pub fn object<T: BridgeObject>(&self, id: &str) -> Option<&T> {
        self.registry.get(id)?.object.as_any().downcast_ref::<T>()
    }

    pub fn object_mut<T: BridgeObject>(&mut self, id: &str) -> Option<&mut T> {
        self.registry
            .get_mut(id)?
            .object
            .as_any_mut()
            .downcast_mut::<T>()
    }

    /// 在对象上对路径求值
    pub fn evaluate(&mut self, id: &str, path: &str) -> BridgeResult<Value> {
        let entry = self
            .registry
            .get(id)
            .ok_or_else(|| BridgeError::ObjectNotFound(id.to_string()))?;
        let path = self.paths.get_or_parse(path)?;
        let ctx = ConvertContext::new(self.resources.as_deref(), Some(id));
        Ok(evaluate(entry.object.reflect(), path, &ctx)?)
    }

    /// 在对象上按路径写入
    pub fn assign(&mut self, id: &str, path: &str, value: &Value) -> BridgeResult<()> {
        let entry = self
            .registry
            .get_mut(id)
            .ok_or_else(|| BridgeError::ObjectNotFound(id.to_string()))?;
        let path = self.paths.get_or_parse(path)?;
        let ctx = ConvertContext::new(self.resources.as_deref(), Some(id));
        Ok(assign(entry.object.reflect_mut(), path, value, &ctx)?)
    }

    // ---- 出站 ----

    /// 排入一个出站信封，在本帧末尾随批次送出
    pub fn send_event(&mut self, id: impl Into<String>, event: impl Into<String>, data: Value) {
        self.outbox.push(Envelope::for_object(id, event, data));
    }

    /// 控制端订阅了 `event` 时代对象发送，附带兴趣查询结果
    pub fn notify_interested(&mut self, id: &str, event: &str, data: Value) -> BridgeResult<bool> {
        let entry = self
            .registry
            .get_mut(id)
            .ok_or_else(|| BridgeError::ObjectNotFound(id.to_string()))?;
        let (sent, _) = run_object(entry, &mut self.outbox, self.resources.as_deref(), |object, ctx| {
            ctx.notify_interested(object.reflect(), event, data)
        });
        Ok(sent)
    }

    /// 尚未写出的出站信封（本帧缓冲加传输层缓冲）
    pub fn pending_outbound(&self) -> usize {
        self.outbox.len() + self.transport.pending_outbound()
    }

    // ---- 分发 ----

    /// 分发一个信封
    ///
    /// 失败会以 `error` 信封回报给控制端，同时作为返回值交给调用方。
    pub fn dispatch(&mut self, envelope: Envelope) -> BridgeResult<()> {
        tracing::trace!(target: "bridge", "Dispatching `{}` to {:?}", envelope.event, envelope.id);
        let result = self.route(&envelope);
        if let Err(e) = &result {
            self.report_failure(&envelope, e);
        }
        result
    }

    /// 解析并分发一帧原始文本（单个信封或信封数组）
    ///
    /// 返回的报告只填写 `dispatched` 与 `malformed`；失败已作为 `error`
    /// 信封排入出站。
    pub fn receive_text(&mut self, frame: &str) -> TickReport {
        let mut report = TickReport::default();
        for parsed in parse_frame(frame) {
            match parsed {
                Ok(envelope) => {
                    report.dispatched += 1;
                    let _ = self.dispatch(envelope);
                }
                Err(e) => {
                    report.malformed += 1;
                    tracing::warn!(target: "bridge", "Dropping inbound envelope: {}", e);
                }
            }
        }
        report
    }

    fn route(&mut self, envelope: &Envelope) -> BridgeResult<()> {
        match envelope.event.as_str() {
            events::CREATE => self.handle_create(envelope),
            events::UPDATE => self.handle_update(envelope),
            events::QUERY => self.handle_query(envelope),
            events::DELETE => self.unregister(envelope.require_id()?),
            events::UPDATE_INTERESTS => self.handle_update_interests(envelope),
            _ => self.handle_object_event(envelope),
        }
    }

    fn report_failure(&mut self, request: &Envelope, error: &BridgeError) {
        tracing::warn!(
            target: "bridge",
            "`{}` for {:?} failed: {}",
            request.event,
            request.id,
            error
        );
        self.failures += 1;
        self.outbox.push(Envelope::failure(request, error));
    }

    fn handle_object_event(&mut self, envelope: &Envelope) -> BridgeResult<()> {
        let id = envelope.require_id()?;
        let entry = self
            .registry
            .get_mut(id)
            .ok_or_else(|| BridgeError::ObjectNotFound(id.to_string()))?;
        if !entry.interests.contains(&envelope.event) {
            tracing::trace!(target: "bridge", "{} is not interested in `{}`", id, envelope.event);
            return Ok(());
        }
        let (result, retire) = run_object(entry, &mut self.outbox, self.resources.as_deref(), |object, ctx| {
            object.handle(envelope, ctx)
        });
        if retire {
            self.unregister(id)?;
        }
        result
    }

    fn handle_create(&mut self, envelope: &Envelope) -> BridgeResult<()> {
        let data = match &envelope.data {
            Some(Value::Object(map)) => map,
            _ => {
                return Err(BridgeError::MalformedEnvelope(
                    "`create` requires an object `data`".into(),
                ))
            }
        };

        let template = match data.get("template") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(
                self.templates
                    .get(name)
                    .ok_or_else(|| BridgeError::UnknownTemplate(name.clone()))?,
            ),
            Some(other) => {
                return Err(BridgeError::MalformedEnvelope(format!(
                    "`template` must be a string, got {}",
                    shape_of(other)
                )))
            }
        };
        let type_name = match (data.get("type").and_then(Value::as_str), template) {
            (Some(name), _) => name.to_string(),
            (None, Some(template)) => template.type_name.clone(),
            (None, None) => {
                return Err(BridgeError::MalformedEnvelope(
                    "`create` requires a `type` or `template`".into(),
                ))
            }
        };
        let preset = template.map(|t| t.update.clone()).unwrap_or_default();
        if !self.types.contains_key(&type_name) {
            return Err(BridgeError::UnknownType(type_name));
        }

        let update = match data.get("update") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(other) => {
                return Err(BridgeError::MalformedEnvelope(format!(
                    "`update` must be an object, got {}",
                    shape_of(other)
                )))
            }
        };
        let post_events = match data.get("postEvents") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .cloned()
                .map(Envelope::from_value)
                .collect::<BridgeResult<Vec<_>>>()?,
            Some(other) => {
                return Err(BridgeError::MalformedEnvelope(format!(
                    "`postEvents` must be an array, got {}",
                    shape_of(other)
                )))
            }
        };

        let id = match envelope.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.next_free_id(),
        };
        self.check_id_available(&id)?;

        let factory = self
            .types
            .get(&type_name)
            .ok_or_else(|| BridgeError::UnknownType(type_name.clone()))?;
        let mut object = factory();

        {
            let ctx = ConvertContext::new(self.resources.as_deref(), Some(&id));
            for (source, value) in preset.iter().chain(update.into_iter().flatten()) {
                let path = self.paths.get_or_parse(source)?;
                assign(object.reflect_mut(), path, value, &ctx)?;
            }
        }

        let mut interests = Interests::from_events(object.default_events().iter().map(String::as_str));
        if let Some(requested) = data.get("interests") {
            interests.apply_json(requested)?;
        }

        let mut created = json!({ "type": type_name });
        if let Some(token) = envelope.callback_id() {
            created["callbackId"] = token.clone();
        }
        self.outbox
            .push(Envelope::for_object(id.clone(), events::CREATED, created));
        self.insert_entry(Entry {
            id: id.clone(),
            type_name,
            interests,
            object,
        })?;

        for post in post_events {
            if !self.registry.contains(&id) {
                break;
            }
            // Failures are already reported outbound.
            let _ = self.dispatch(post.with_id(id.clone()));
        }
        Ok(())
    }

    fn handle_update(&mut self, envelope: &Envelope) -> BridgeResult<()> {
        let id = envelope.require_id()?;
        let pairs = match &envelope.data {
            Some(Value::Object(map)) => Some(map),
            None | Some(Value::Null) => None,
            Some(other) => {
                return Err(BridgeError::MalformedEnvelope(format!(
                    "`update` data must be an object of path → value, got {}",
                    shape_of(other)
                )))
            }
        };
        let entry = self
            .registry
            .get_mut(id)
            .ok_or_else(|| BridgeError::ObjectNotFound(id.to_string()))?;

        let mut failures = Vec::new();
        let ctx = ConvertContext::new(self.resources.as_deref(), Some(id));
        for (source, value) in pairs.into_iter().flatten() {
            if source == "callbackId" {
                continue;
            }
            let outcome = match self.paths.get_or_parse(source) {
                Ok(path) => assign(entry.object.reflect_mut(), path, value, &ctx),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                failures.push(BridgeError::from(e));
            }
        }
        // One bad pair does not block the others.
        for error in failures {
            self.report_failure(envelope, &error);
        }
        Ok(())
    }

    fn handle_query(&mut self, envelope: &Envelope) -> BridgeResult<()> {
        let id = envelope.require_id()?;
        let entry = self
            .registry
            .get(id)
            .ok_or_else(|| BridgeError::ObjectNotFound(id.to_string()))?;
        let requested = query_paths(envelope.data.as_ref())?;

        let ctx = ConvertContext::new(self.resources.as_deref(), Some(id));
        let mut result = Map::new();
        for (name, source) in requested {
            let path = self.paths.get_or_parse(source)?;
            result.insert(name.to_string(), evaluate(entry.object.reflect(), path, &ctx)?);
        }

        let mut data = json!({ "result": result });
        if let Some(token) = envelope.callback_id() {
            data["callbackId"] = token.clone();
        }
        self.outbox
            .push(Envelope::for_object(id, events::CALLBACK, data));
        Ok(())
    }

    fn handle_update_interests(&mut self, envelope: &Envelope) -> BridgeResult<()> {
        let id = envelope.require_id()?;
        let entry = self
            .registry
            .get_mut(id)
            .ok_or_else(|| BridgeError::ObjectNotFound(id.to_string()))?;
        let changes = envelope.data.as_ref().ok_or_else(|| {
            BridgeError::MalformedEnvelope("`updateInterests` requires data".into())
        })?;
        entry.interests.apply_json(changes)
    }

    // ---- 每帧 ----

    /// 推进一帧
    pub fn tick(&mut self, dt: f32) -> TickReport {
        let mut report = TickReport::default();
        self.failures = 0;

        report.resources = self.deliver_resources();

        for frame in self.transport.drain_inbound() {
            let received = self.receive_text(&frame);
            report.dispatched += received.dispatched;
            report.malformed += received.malformed;
        }

        self.update_objects(dt);

        match self.flush() {
            Ok(flushed) => report.flushed = flushed,
            Err(e) => {
                tracing::warn!(target: "bridge", "Flush on {} transport failed: {}", self.transport.name(), e);
                report.transport_error = Some(e);
            }
        }
        report.failed = self.failures;
        report
    }

    /// 把本帧累积的信封交给传输层并写出
    ///
    /// 写出后本帧注销的 id 可以重新注册。
    pub fn flush(&mut self) -> TransportResult<usize> {
        for envelope in self.outbox.drain(..) {
            self.transport.enqueue_outbound(envelope);
        }
        self.retired.clear();
        self.transport.flush()
    }

    fn deliver_resources(&mut self) -> usize {
        let completions = match &self.resources {
            Some(loader) => loader.poll_completed(),
            None => return 0,
        };
        let count = completions.len();
        for completion in completions {
            let data = crate::convert::encode(&completion.handle);
            let Some(id) = completion.requester else {
                self.outbox
                    .push(Envelope::new(events::RESOURCE_LOADED).with_data(data));
                continue;
            };
            let envelope = Envelope::for_object(id.clone(), events::RESOURCE_LOADED, data);
            self.outbox.push(envelope.clone());

            let Some(entry) = self.registry.get_mut(&id) else {
                tracing::debug!(target: "resources", "{} finished loading after {} was removed", completion.handle.path, id);
                continue;
            };
            let (result, retire) = run_object(entry, &mut self.outbox, self.resources.as_deref(), |object, ctx| {
                object.handle(&envelope, ctx)
            });
            if let Err(e) = result {
                self.report_failure(&envelope, &e);
            }
            if retire {
                let _ = self.unregister(&id);
            }
        }
        count
    }

    fn update_objects(&mut self, dt: f32) {
        let resources = self.resources.as_deref();
        let mut retiring = Vec::new();
        for entry in self.registry.entries_mut() {
            let (_, retire) = run_object(entry, &mut self.outbox, resources, |object, ctx| {
                object.update(dt, ctx)
            });
            if retire {
                retiring.push(entry.id.clone());
            }
        }
        for id in retiring {
            let _ = self.unregister(&id);
        }
    }

    // ---- 内部 ----

    fn next_free_id(&mut self) -> String {
        loop {
            let id = self.ids.next_id();
            if !self.registry.contains(&id) && !self.retired.contains(&id) {
                return id;
            }
        }
    }

    fn check_id_available(&self, id: &str) -> BridgeResult<()> {
        if id.is_empty() {
            return Err(BridgeError::MalformedEnvelope("object id must not be empty".into()));
        }
        if self.registry.contains(id) {
            return Err(BridgeError::DuplicateId(id.to_string()));
        }
        if self.retired.contains(id) {
            return Err(BridgeError::IdRetired(id.to_string()));
        }
        Ok(())
    }

    fn insert_entry(&mut self, entry: Entry) -> BridgeResult<()> {
        let id = entry.id.clone();
        tracing::debug!(target: "bridge", "Registered {} ({})", id, entry.type_name);
        self.registry.insert(entry)?;
        let retire = match self.registry.get_mut(&id) {
            Some(entry) => {
                run_object(entry, &mut self.outbox, self.resources.as_deref(), |object, ctx| {
                    object.registered(ctx)
                })
                .1
            }
            None => false,
        };
        if retire {
            self.unregister(&id)?;
        }
        Ok(())
    }
}

/// 以对象自身的上下文运行一次回调，返回回调结果与是否请求注销
fn run_object<R>(
    entry: &mut Entry,
    outbox: &mut Vec<Envelope>,
    resources: Option<&dyn ResourceLoader>,
    f: impl FnOnce(&mut dyn ErasedObject, &mut ObjectContext<'_>) -> R,
) -> (R, bool) {
    let Entry {
        id,
        interests,
        object,
        ..
    } = entry;
    let mut ctx = ObjectContext::new(id.as_str(), interests, outbox, resources);
    let result = f(object.as_mut(), &mut ctx);
    (result, ctx.is_retired())
}

/// 取出 `query` 请求的 (名称, 路径) 列表
///
/// 接受 `{"query": {name: path}}`、`{"query": [path]}`、`{"query": path}`，
/// 或去掉 `callbackId` 后的扁平 `{name: path}`。
fn query_paths(data: Option<&Value>) -> BridgeResult<Vec<(&str, &str)>> {
    let map = match data {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(BridgeError::MalformedEnvelope(format!(
                "`query` data must be an object, got {}",
                shape_of(other)
            )))
        }
    };
    match map.get("query") {
        Some(Value::String(path)) => Ok(vec![(path.as_str(), path.as_str())]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(|path| (path, path)).ok_or_else(|| {
                    BridgeError::MalformedEnvelope("query list entries must be path strings".into())
                })
            })
            .collect(),
        Some(Value::Object(named)) => named_paths(named.iter()),
        Some(other) => Err(BridgeError::MalformedEnvelope(format!(
            "`query` must be a path, list or object, got {}",
            shape_of(other)
        ))),
        None => named_paths(map.iter().filter(|(name, _)| name.as_str() != "callbackId")),
    }
}

fn named_paths<'a>(
    entries: impl Iterator<Item = (&'a String, &'a Value)>,
) -> BridgeResult<Vec<(&'a str, &'a str)>> {
    entries
        .map(|(name, path)| {
            path.as_str().map(|path| (name.as_str(), path)).ok_or_else(|| {
                BridgeError::MalformedEnvelope(format!("query `{}` must be a path string", name))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::StaticResources;
    use crate::scene::SceneObject;
    use crate::transport::{ControlEndpoint, LoopbackTransport};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Beacon {
        label: String,
        seen: Vec<String>,
        lifetime: Option<u32>,
    }

    impl_reflect!(Beacon {
        "label" => label,
    });

    impl Beacon {
        fn on_ping(&mut self, envelope: &Envelope, ctx: &mut ObjectContext<'_>) -> BridgeResult<()> {
            self.seen.push(envelope.event.clone());
            ctx.notify("pong", json!({"label": self.label}));
            Ok(())
        }

        fn on_fail(&mut self, _envelope: &Envelope, _ctx: &mut ObjectContext<'_>) -> BridgeResult<()> {
            Err(BridgeError::Handler("refused".into()))
        }

        fn on_resource(&mut self, envelope: &Envelope, _ctx: &mut ObjectContext<'_>) -> BridgeResult<()> {
            self.seen.push(envelope.event.clone());
            Ok(())
        }
    }

    impl BridgeObject for Beacon {
        fn event_table() -> EventTable<Self> {
            EventTable::new()
                .on("ping", Self::on_ping)
                .on("fail", Self::on_fail)
                .on(events::RESOURCE_LOADED, Self::on_resource)
        }

        fn update(&mut self, _dt: f32, ctx: &mut ObjectContext<'_>) {
            if let Some(frames) = self.lifetime.as_mut() {
                *frames = frames.saturating_sub(1);
                if *frames == 0 {
                    ctx.retire();
                }
            }
        }
    }

    fn started() -> (Bridge, ControlEndpoint) {
        let transport = LoopbackTransport::new(64, true);
        let endpoint = transport.endpoint();
        let mut bridge = Bridge::new(Box::new(transport));
        bridge.register_type::<Beacon>("Beacon");
        bridge.register_type::<SceneObject>("SceneObject");
        bridge.start().unwrap();
        (bridge, endpoint)
    }

    /// Transport whose first `failures` flushes fail with a send error
    struct FlakyTransport {
        outbound: crate::transport::OutboundQueue,
        inbound: Rc<RefCell<Vec<String>>>,
        delivered: Rc<RefCell<Vec<Envelope>>>,
        failures: usize,
    }

    impl BridgeTransport for FlakyTransport {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn start(&mut self) -> TransportResult<()> {
            Ok(())
        }

        fn stop(&mut self) {}

        fn is_started(&self) -> bool {
            true
        }

        fn enqueue_outbound(&mut self, envelope: Envelope) {
            self.outbound.push(envelope);
        }

        fn flush(&mut self) -> TransportResult<usize> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(TransportError::Send("connection reset".into()));
            }
            let envelopes = self.outbound.take_all();
            let count = envelopes.len();
            self.delivered.borrow_mut().extend(envelopes);
            Ok(count)
        }

        fn drain_inbound(&mut self) -> Vec<String> {
            std::mem::take(&mut *self.inbound.borrow_mut())
        }

        fn pending_outbound(&self) -> usize {
            self.outbound.len()
        }
    }

    fn events_of(endpoint: &ControlEndpoint) -> Vec<(String, Option<String>)> {
        endpoint
            .receive()
            .into_iter()
            .map(|e| (e.event, e.id))
            .collect()
    }

    #[test]
    fn test_register_assigns_fresh_ids() {
        let (mut bridge, _) = started();
        let a = bridge.register(Beacon::default()).unwrap();
        let b = bridge.register(Beacon::default()).unwrap();
        assert_ne!(a, b);
        assert_eq!(bridge.ids(), vec![a.clone(), b]);
        assert_eq!(bridge.type_of(&a), Some("Beacon"));
        assert!(bridge.interests(&a).unwrap().contains("ping"));
    }

    #[test]
    fn test_duplicate_and_retired_ids() {
        let (mut bridge, _) = started();
        bridge.register_with_id("p", Beacon::default()).unwrap();
        assert!(matches!(
            bridge.register_with_id("p", Beacon::default()),
            Err(BridgeError::DuplicateId(_))
        ));
        bridge.unregister("p").unwrap();
        assert!(matches!(
            bridge.register_with_id("p", Beacon::default()),
            Err(BridgeError::IdRetired(_))
        ));
        bridge.tick(0.0);
        bridge.register_with_id("p", Beacon::default()).unwrap();
    }

    #[test]
    fn test_object_event_routes_through_table() {
        let (mut bridge, endpoint) = started();
        bridge
            .register_with_id("p", Beacon { label: "x".into(), ..Default::default() })
            .unwrap();
        endpoint.send(&Envelope::new("ping").with_id("p")).unwrap();
        endpoint.send(&Envelope::new("ignored").with_id("p")).unwrap();
        let report = bridge.tick(0.0);
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(bridge.object::<Beacon>("p").unwrap().seen, vec!["ping"]);
        let received = endpoint.receive();
        assert_eq!(received, vec![Envelope::for_object("p", "pong", json!({"label": "x"}))]);
    }

    #[test]
    fn test_handler_error_is_reported() {
        let (mut bridge, endpoint) = started();
        bridge.register_with_id("p", Beacon::default()).unwrap();
        endpoint.send(&Envelope::new("fail").with_id("p")).unwrap();
        let report = bridge.tick(0.0);
        assert_eq!(report.failed, 1);
        let received = endpoint.receive();
        assert_eq!(received[0].event, events::ERROR);
        assert_eq!(received[0].data.as_ref().unwrap()["code"], json!("HandlerError"));
    }

    #[test]
    fn test_update_reports_bad_pairs_and_applies_the_rest() {
        let (mut bridge, endpoint) = started();
        bridge.register_with_id("p", Beacon::default()).unwrap();
        endpoint
            .send(&Envelope::for_object(
                "p",
                events::UPDATE,
                json!({"label": "ok", "missing": 1, "label/x": 2}),
            ))
            .unwrap();
        let report = bridge.tick(0.0);
        assert_eq!(report.failed, 2);
        assert_eq!(bridge.evaluate("p", "label").unwrap(), json!("ok"));
        let codes: Vec<_> = endpoint
            .receive()
            .into_iter()
            .map(|e| e.data.unwrap()["code"].clone())
            .collect();
        assert_eq!(codes, vec![json!("PathResolutionError"), json!("PathResolutionError")]);
    }

    #[test]
    fn test_query_shapes() {
        let (mut bridge, endpoint) = started();
        bridge
            .register_with_id("p", Beacon { label: "x".into(), ..Default::default() })
            .unwrap();
        bridge
            .dispatch(Envelope::for_object("p", events::QUERY, json!({"callbackId": 3, "query": {"l": "label"}})))
            .unwrap();
        bridge
            .dispatch(Envelope::for_object("p", events::QUERY, json!({"callbackId": "t", "name": "label"})))
            .unwrap();
        bridge
            .dispatch(Envelope::for_object("p", events::QUERY, json!({"query": ["label"]})))
            .unwrap();
        bridge.flush().unwrap();
        let data: Vec<_> = endpoint.receive().into_iter().map(|e| e.data.unwrap()).collect();
        assert_eq!(data[0], json!({"result": {"l": "x"}, "callbackId": 3}));
        assert_eq!(data[1], json!({"result": {"name": "x"}, "callbackId": "t"}));
        assert_eq!(data[2], json!({"result": {"label": "x"}}));
    }

    #[test]
    fn test_query_failure_is_correlated() {
        let (mut bridge, endpoint) = started();
        bridge.register_with_id("p", Beacon::default()).unwrap();
        let err = bridge
            .dispatch(Envelope::for_object("p", events::QUERY, json!({"callbackId": 9, "q": "nope"})))
            .unwrap_err();
        assert_eq!(err.code(), "PathResolutionError");
        bridge.flush().unwrap();
        let data = endpoint.receive().remove(0).data.unwrap();
        assert_eq!(data["callbackId"], json!(9));
        assert_eq!(data["request"], json!("query"));
    }

    #[test]
    fn test_create_unknown_type_and_template() {
        let (mut bridge, _) = started();
        let err = bridge
            .dispatch(Envelope::new(events::CREATE).with_data(json!({"type": "Nope"})))
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownType(_)));
        let err = bridge
            .dispatch(Envelope::new(events::CREATE).with_data(json!({"template": "nope"})))
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownTemplate(_)));
        assert!(bridge.is_empty());
    }

    #[test]
    fn test_create_is_atomic_on_bad_update() {
        let (mut bridge, _) = started();
        let err = bridge
            .dispatch(
                Envelope::for_object("p", events::CREATE, json!({"type": "Beacon", "update": {"missing": 1}})),
            )
            .unwrap_err();
        assert_eq!(err.code(), "PathResolutionError");
        assert!(!bridge.contains("p"));
    }

    #[test]
    fn test_update_interests_gates_events() {
        let (mut bridge, endpoint) = started();
        bridge.register_with_id("p", Beacon::default()).unwrap();
        bridge
            .dispatch(Envelope::for_object("p", events::UPDATE_INTERESTS, json!({"ping": false})))
            .unwrap();
        bridge.dispatch(Envelope::new("ping").with_id("p")).unwrap();
        assert!(bridge.object::<Beacon>("p").unwrap().seen.is_empty());
        bridge.flush().unwrap();
        assert!(endpoint.receive().is_empty());
    }

    #[test]
    fn test_object_retires_itself() {
        let (mut bridge, endpoint) = started();
        bridge
            .register_with_id("p", Beacon { lifetime: Some(2), ..Default::default() })
            .unwrap();
        bridge.tick(0.1);
        assert!(bridge.contains("p"));
        bridge.tick(0.1);
        assert!(!bridge.contains("p"));
        assert_eq!(events_of(&endpoint), vec![(events::DESTROYED.to_string(), Some("p".to_string()))]);
    }

    #[test]
    fn test_resource_completion_reaches_requester() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mesh.bin"), [0u8; 8]).unwrap();
        let transport = LoopbackTransport::new(64, true);
        let endpoint = transport.endpoint();
        let loader = crate::resources::FileResourceLoader::new(dir.path());
        let mut bridge = Bridge::new(Box::new(transport)).with_resources(loader);
        bridge.start().unwrap();
        bridge.register_with_id("p", Beacon::default()).unwrap();

        let pending = bridge.evaluate("p", "resource:mesh.bin").unwrap();
        assert_eq!(pending["state"], json!("pending"));

        let start = std::time::Instant::now();
        let mut delivered = 0;
        while delivered == 0 && start.elapsed() < std::time::Duration::from_secs(5) {
            delivered = bridge.tick(0.0).resources;
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(delivered, 1);
        assert_eq!(bridge.object::<Beacon>("p").unwrap().seen, vec![events::RESOURCE_LOADED]);
        let received = endpoint.receive();
        assert_eq!(received[0].event, events::RESOURCE_LOADED);
        assert_eq!(received[0].data.as_ref().unwrap()["state"], json!("ready"));
    }

    #[test]
    fn test_static_resource_is_ready_immediately() {
        let mut bridge = Bridge::new(Box::new(LoopbackTransport::default()))
            .with_resources(StaticResources::new().with("tex/wall.png", 64));
        bridge.register_with_id("p", Beacon::default()).unwrap();
        let handle = bridge.evaluate("p", "resource:(tex/wall.png)").unwrap();
        assert_eq!(handle["state"], json!("ready"));
        assert_eq!(handle["size"], json!(64));
    }

    #[test]
    fn test_notify_interested_from_host() {
        let (mut bridge, endpoint) = started();
        bridge.register_with_id("p", Beacon { label: "x".into(), ..Default::default() }).unwrap();
        assert!(!bridge.notify_interested("p", "changed", json!({})).unwrap());
        bridge
            .dispatch(Envelope::for_object(
                "p",
                events::UPDATE_INTERESTS,
                json!({"changed": {"query": {"label": "label"}}}),
            ))
            .unwrap();
        assert!(bridge.notify_interested("p", "changed", Value::Null).unwrap());
        bridge.flush().unwrap();
        assert_eq!(
            endpoint.receive(),
            vec![Envelope::for_object("p", "changed", json!({"query": {"label": "x"}}))]
        );
    }

    #[test]
    fn test_transport_failure_keeps_envelopes_and_ticking() {
        let inbound = Rc::new(RefCell::new(Vec::new()));
        let delivered = Rc::new(RefCell::new(Vec::new()));
        let mut bridge = Bridge::new(Box::new(FlakyTransport {
            outbound: crate::transport::OutboundQueue::new(16),
            inbound: inbound.clone(),
            delivered: delivered.clone(),
            failures: 1,
        }));
        bridge.register_type::<Beacon>("Beacon");
        bridge.start().unwrap();
        bridge.register_with_id("p", Beacon::default()).unwrap();

        inbound
            .borrow_mut()
            .push(r#"{"event":"ping","id":"p"}"#.to_string());
        let report = bridge.tick(0.0);
        assert_eq!(report.dispatched, 1);
        assert!(matches!(report.transport_error, Some(TransportError::Send(_))));
        assert_eq!(report.flushed, 0);
        assert_eq!(bridge.pending_outbound(), 1);
        assert!(delivered.borrow().is_empty());

        inbound.borrow_mut().push(
            r#"{"event":"update","id":"p","data":{"label":"later"}}"#.to_string(),
        );
        inbound.borrow_mut().push(r#"{"event":"ping","id":"p"}"#.to_string());
        let report = bridge.tick(0.0);
        assert!(report.transport_error.is_none());
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.flushed, 2);
        assert_eq!(bridge.pending_outbound(), 0);
        assert_eq!(
            *delivered.borrow(),
            vec![
                Envelope::for_object("p", "pong", json!({"label": ""})),
                Envelope::for_object("p", "pong", json!({"label": "later"})),
            ]
        );
        assert_eq!(bridge.object::<Beacon>("p").unwrap().seen, vec!["ping", "ping"]);
    }

    #[test]
    fn test_receive_text_counts_batch_entries() {
        let (mut bridge, endpoint) = started();
        bridge.register_with_id("p", Beacon::default()).unwrap();
        let report = bridge.receive_text(r#"[{"event":"ping","id":"p"},{"id":"p"},{"event":"fail","id":"p"}]"#);
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.malformed, 1);
        bridge.flush().unwrap();
        assert_eq!(
            endpoint.receive().into_iter().map(|e| e.event).collect::<Vec<_>>(),
            vec!["pong".to_string(), events::ERROR.to_string()]
        );
    }

    #[test]
    fn test_default_ids_carry_session_prefix() {
        let mut bridge = Bridge::new(Box::new(LoopbackTransport::default()));
        let id = bridge.register(Beacon::default()).unwrap();
        let (prefix, counter) = id.split_once('-').unwrap();
        assert_eq!(prefix.len(), 8);
        assert_eq!(counter, "1");
    }

    #[test]
    fn test_from_config_uses_prefix() {
        let config = BridgeConfig {
            id_prefix: "host-".into(),
            ..Default::default()
        };
        let mut bridge = Bridge::from_config(&config).unwrap();
        assert_eq!(bridge.register(Beacon::default()).unwrap(), "host-1");
        assert_eq!(bridge.transport().name(), "loopback");
    }
}
