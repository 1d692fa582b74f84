//! 可寻址对象契约
//!
//! 每个 `BridgeObject` 类型在注册时构建一次事件分发表（事件名 → 处理函数），
//! 运行时按名称查表调用，不依赖反射。

use std::any::Any;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::envelope::Envelope;
use crate::accessor::{evaluate, AccessorPath, Reflect};
use crate::convert::{shape_of, ConvertContext};
use crate::core::{BridgeError, BridgeResult};
use crate::resources::ResourceLoader;

/// 事件处理函数
pub type Handler<T> = fn(&mut T, &Envelope, &mut ObjectContext<'_>) -> BridgeResult<()>;

/// 每个对象类型的事件分发表
pub struct EventTable<T> {
    handlers: BTreeMap<String, Handler<T>>,
}

impl<T> Default for EventTable<T> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<T> EventTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册事件处理函数
    pub fn on(mut self, event: impl Into<String>, handler: Handler<T>) -> Self {
        self.handlers.insert(event.into(), handler);
        self
    }

    pub fn get(&self, event: &str) -> Option<Handler<T>> {
        self.handlers.get(event).copied()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// 单个兴趣项
///
/// `query` 中的路径在发送事件时针对对象求值，结果附加在 `data.query` 下。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interest {
    pub query: BTreeMap<String, AccessorPath>,
}

/// 对象订阅的事件集合
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interests {
    entries: BTreeMap<String, Interest>,
}

impl Interests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a str>) -> Self {
        let mut interests = Self::new();
        for event in events {
            interests.insert(event, Interest::default());
        }
        interests
    }

    pub fn contains(&self, event: &str) -> bool {
        self.entries.contains_key(event)
    }

    pub fn get(&self, event: &str) -> Option<&Interest> {
        self.entries.get(event)
    }

    pub fn insert(&mut self, event: impl Into<String>, interest: Interest) {
        self.entries.insert(event.into(), interest);
    }

    pub fn remove(&mut self, event: &str) -> bool {
        self.entries.remove(event).is_some()
    }

    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 应用控制端发来的兴趣描述
    ///
    /// 接受事件名数组，或 `{event: true | false | {"query": {name: path}}}`；
    /// `false` 取消订阅。整个描述校验通过后才会生效。
    pub fn apply_json(&mut self, value: &Value) -> BridgeResult<()> {
        let mut changes: Vec<(String, Option<Interest>)> = Vec::new();
        match value {
            Value::Array(items) => {
                for item in items {
                    let event = item.as_str().ok_or_else(|| {
                        BridgeError::MalformedEnvelope(format!(
                            "interest list entries must be strings, got {}",
                            shape_of(item)
                        ))
                    })?;
                    changes.push((event.to_string(), Some(Interest::default())));
                }
            }
            Value::Object(map) => {
                for (event, entry) in map {
                    changes.push((event.clone(), parse_interest(event, entry)?));
                }
            }
            other => {
                return Err(BridgeError::MalformedEnvelope(format!(
                    "interests must be an array or object, got {}",
                    shape_of(other)
                )))
            }
        }
        for (event, change) in changes {
            match change {
                Some(interest) => self.insert(event, interest),
                None => {
                    self.remove(&event);
                }
            }
        }
        Ok(())
    }
}

fn parse_interest(event: &str, value: &Value) -> BridgeResult<Option<Interest>> {
    match value {
        Value::Bool(false) | Value::Null => Ok(None),
        Value::Bool(true) => Ok(Some(Interest::default())),
        Value::Object(map) => {
            let mut interest = Interest::default();
            if let Some(query) = map.get("query") {
                let query = query.as_object().ok_or_else(|| {
                    BridgeError::MalformedEnvelope(format!("interest `{}` query must be an object", event))
                })?;
                for (name, path) in query {
                    let path = path.as_str().ok_or_else(|| {
                        BridgeError::MalformedEnvelope(format!(
                            "interest `{}` query `{}` must be a path string",
                            event, name
                        ))
                    })?;
                    interest.query.insert(name.clone(), AccessorPath::parse(path)?);
                }
            }
            Ok(Some(interest))
        }
        other => Err(BridgeError::MalformedEnvelope(format!(
            "interest `{}` must be a bool or object, got {}",
            event,
            shape_of(other)
        ))),
    }
}

/// 处理函数可用的桥接服务
///
/// 通过它发送事件、修改兴趣或请求注销自身；对象永远不直接访问注册表。
pub struct ObjectContext<'a> {
    id: &'a str,
    interests: &'a mut Interests,
    outbox: &'a mut Vec<Envelope>,
    resources: Option<&'a dyn ResourceLoader>,
    retire: bool,
}

impl<'a> ObjectContext<'a> {
    pub(crate) fn new(
        id: &'a str,
        interests: &'a mut Interests,
        outbox: &'a mut Vec<Envelope>,
        resources: Option<&'a dyn ResourceLoader>,
    ) -> Self {
        Self {
            id,
            interests,
            outbox,
            resources,
            retire: false,
        }
    }

    pub fn id(&self) -> &str {
        self.id
    }

    /// 向控制端发送事件
    pub fn notify(&mut self, event: impl Into<String>, data: Value) {
        self.outbox.push(Envelope::for_object(self.id, event, data));
    }

    /// 仅当控制端订阅了 `event` 时发送，并附带兴趣查询结果
    pub fn notify_interested(&mut self, object: &dyn Reflect, event: &str, data: Value) -> bool {
        let Some(interest) = self.interests.get(event) else {
            return false;
        };
        let mut data = data;
        if !interest.query.is_empty() {
            let ctx = ConvertContext::new(self.resources, Some(self.id));
            let mut results = Map::new();
            for (name, path) in &interest.query {
                let value = match evaluate(object, path, &ctx) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(target: "bridge", "Interest query `{}` on {} failed: {}", name, self.id, e);
                        Value::Null
                    }
                };
                results.insert(name.clone(), value);
            }
            data = match data {
                Value::Object(mut map) => {
                    map.insert("query".into(), Value::Object(results));
                    Value::Object(map)
                }
                Value::Null => serde_json::json!({ "query": results }),
                other => serde_json::json!({ "value": other, "query": results }),
            };
        }
        self.notify(event.to_string(), data);
        true
    }

    pub fn is_interested(&self, event: &str) -> bool {
        self.interests.contains(event)
    }

    pub fn interests(&self) -> &Interests {
        &*self.interests
    }

    pub fn interests_mut(&mut self) -> &mut Interests {
        &mut *self.interests
    }

    pub fn resources(&self) -> Option<&'a dyn ResourceLoader> {
        self.resources
    }

    /// 以本对象为请求方的转换上下文
    pub fn convert_context(&self) -> ConvertContext<'_> {
        ConvertContext::new(self.resources, Some(self.id))
    }

    /// 处理完成后从注册表注销本对象
    pub fn retire(&mut self) {
        self.retire = true;
    }

    pub fn is_retired(&self) -> bool {
        self.retire
    }
}

/// 可通过桥接层寻址的宿主对象
pub trait BridgeObject: Reflect + 'static {
    /// 事件分发表，注册时构建一次
    fn event_table() -> EventTable<Self>
    where
        Self: Sized,
    {
        EventTable::new()
    }

    /// 注册完成后调用
    fn on_registered(&mut self, _ctx: &mut ObjectContext<'_>) {}

    /// 分发表中没有对应处理函数的已订阅事件
    fn handle_event(&mut self, envelope: &Envelope, _ctx: &mut ObjectContext<'_>) -> BridgeResult<()> {
        tracing::trace!(target: "bridge", "{} has no handler for `{}`", self.type_name(), envelope.event);
        Ok(())
    }

    /// 每帧调用一次，在入站分发之后
    fn update(&mut self, _dt: f32, _ctx: &mut ObjectContext<'_>) {}

    /// 从注册表移除前调用
    fn on_destroyed(&mut self, _ctx: &mut ObjectContext<'_>) {}
}

/// 类型擦除后的注册表条目
pub(crate) trait ErasedObject {
    fn reflect(&self) -> &dyn Reflect;
    fn reflect_mut(&mut self) -> &mut dyn Reflect;
    fn default_events(&self) -> Vec<String>;
    fn handle(&mut self, envelope: &Envelope, ctx: &mut ObjectContext<'_>) -> BridgeResult<()>;
    fn registered(&mut self, ctx: &mut ObjectContext<'_>);
    fn update(&mut self, dt: f32, ctx: &mut ObjectContext<'_>);
    fn destroyed(&mut self, ctx: &mut ObjectContext<'_>);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct Slot<T: BridgeObject> {
    object: T,
    table: EventTable<T>,
}

impl<T: BridgeObject> Slot<T> {
    pub(crate) fn new(object: T) -> Self {
        Self {
            object,
            table: T::event_table(),
        }
    }
}

impl<T: BridgeObject> ErasedObject for Slot<T> {
    fn reflect(&self) -> &dyn Reflect {
        &self.object
    }

    fn reflect_mut(&mut self) -> &mut dyn Reflect {
        &mut self.object
    }

    fn default_events(&self) -> Vec<String> {
        self.table.events().map(str::to_owned).collect()
    }

    fn handle(&mut self, envelope: &Envelope, ctx: &mut ObjectContext<'_>) -> BridgeResult<()> {
        match self.table.get(&envelope.event) {
            Some(handler) => handler(&mut self.object, envelope, ctx),
            None => self.object.handle_event(envelope, ctx),
        }
    }

    fn registered(&mut self, ctx: &mut ObjectContext<'_>) {
        self.object.on_registered(ctx);
    }

    fn update(&mut self, dt: f32, ctx: &mut ObjectContext<'_>) {
        self.object.update(dt, ctx);
    }

    fn destroyed(&mut self, ctx: &mut ObjectContext<'_>) {
        self.object.on_destroyed(ctx);
    }

    fn as_any(&self) -> &dyn Any {
        &self.object
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        &mut self.object
    }
}
