//! 场景节点模型
//!
//! 访问器的 `transform:` 与 `component:` 步骤在这里落地：`SceneNode` 持有
//! 变换、按名称索引的组件以及子节点层级。`SceneObject` 把一棵节点树包装成
//! 可通过桥接层寻址的对象。

use std::collections::BTreeMap;

use glam::{Mat4, Quat, Vec3};
use serde_json::{json, Map, Value};

use crate::accessor::reflect::{resolve_member_name, set_members};
use crate::accessor::Reflect;
use crate::bridge::{BridgeObject, Envelope, EventTable, ObjectContext};
use crate::convert::{encode_f32, shape_of, Convert, ConvertContext};
use crate::core::{BridgeError, BridgeResult, ConvertError, ConvertResult};
use crate::impl_default;

/// 局部空间变换
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl_default!(Transform {
    position: Vec3::ZERO,
    rotation: Quat::IDENTITY,
    scale: Vec3::ONE,
});

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

impl Reflect for Transform {
    fn type_name(&self) -> &'static str {
        "Transform"
    }

    fn to_json(&self) -> Value {
        json!({
            "position": self.position.encode(),
            "rotation": self.rotation.encode(),
            "scale": self.scale.encode(),
        })
    }

    fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()> {
        set_members(self, value, ctx)
    }

    fn member(&self, name: &str) -> Option<&dyn Reflect> {
        match name {
            "position" => Some(&self.position),
            "rotation" => Some(&self.rotation),
            "scale" => Some(&self.scale),
            _ => None,
        }
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
        match name {
            "position" => Some(&mut self.position),
            "rotation" => Some(&mut self.rotation),
            "scale" => Some(&mut self.scale),
            _ => None,
        }
    }

    fn member_names(&self) -> Vec<String> {
        vec!["position".into(), "rotation".into(), "scale".into()]
    }

    fn call(&self, method: &str, _args: &[Value]) -> Option<Result<Value, String>> {
        let direction = match method {
            "forward" => self.forward(),
            "right" => self.right(),
            "up" => self.up(),
            "matrix" => return Some(Ok(self.matrix().encode())),
            _ => return None,
        };
        Some(Ok(direction.encode()))
    }
}

/// 场景层级中的一个节点
pub struct SceneNode {
    pub name: String,
    pub active: bool,
    pub transform: Transform,
    components: BTreeMap<String, Box<dyn Reflect>>,
    children: Vec<SceneNode>,
}

impl Default for SceneNode {
    fn default() -> Self {
        Self::new("node")
    }
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            transform: Transform::default(),
            components: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_component(mut self, name: impl Into<String>, component: impl Reflect + 'static) -> Self {
        self.add_component(name, component);
        self
    }

    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn add_component(&mut self, name: impl Into<String>, component: impl Reflect + 'static) {
        self.components.insert(name.into(), Box::new(component));
    }

    pub fn remove_component(&mut self, name: &str) -> bool {
        self.components.remove(name).is_some()
    }

    pub fn add_child(&mut self, child: SceneNode) {
        self.children.push(child);
    }

    pub fn child_node(&self, name: &str) -> Option<&SceneNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_node_mut(&mut self, name: &str) -> Option<&mut SceneNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn children(&self) -> &[SceneNode] {
        &self.children
    }

    pub fn component_names(&self) -> Vec<String> {
        self.components.keys().cloned().collect()
    }

    /// 深度优先查找后代节点，返回以 `/` 连接的相对路径
    pub fn find(&self, name: &str) -> Option<String> {
        for child in &self.children {
            if child.name == name {
                return Some(child.name.clone());
            }
            if let Some(rest) = child.find(name) {
                return Some(format!("{}/{}", child.name, rest));
            }
        }
        None
    }

    /// 写入组件；`saved` 记录被改动组件的旧值，供失败时恢复
    fn set_components(
        &mut self,
        value: &Value,
        ctx: &ConvertContext<'_>,
        saved: &mut Vec<(String, Value)>,
    ) -> ConvertResult<()> {
        let map = value.as_object().ok_or_else(|| {
            ConvertError::new("object", format!("components expects an object, got {}", shape_of(value)))
        })?;
        for (name, item) in map {
            let component = self.components.get_mut(name).ok_or_else(|| {
                ConvertError::new("object", format!("node `{}` has no component `{}`", self.name, name))
            })?;
            saved.push((name.clone(), component.to_json()));
            component.set_json(item, ctx)?;
        }
        Ok(())
    }

    fn set_fields(
        &mut self,
        map: &Map<String, Value>,
        ctx: &ConvertContext<'_>,
        saved: &mut Vec<(String, Value)>,
    ) -> ConvertResult<()> {
        for (key, item) in map {
            if key == "components" {
                self.set_components(item, ctx, saved)?;
                continue;
            }
            let name = resolve_member_name(&*self, key).ok_or_else(|| {
                ConvertError::new("object", format!("SceneNode has no field `{}`", key))
            })?;
            if let Some(member) = self.member_mut(&name) {
                member.set_json(item, ctx)?;
            }
        }
        Ok(())
    }
}

impl Reflect for SceneNode {
    fn type_name(&self) -> &'static str {
        "SceneNode"
    }

    fn to_json(&self) -> Value {
        let mut components = Map::new();
        for (name, component) in &self.components {
            components.insert(name.clone(), component.to_json());
        }
        json!({
            "name": self.name,
            "active": self.active,
            "transform": self.transform.to_json(),
            "components": components,
            "children": self.children.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
        })
    }

    fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()> {
        let map = value.as_object().ok_or_else(|| {
            ConvertError::new("object", format!("SceneNode expects an object, got {}", shape_of(value)))
        })?;
        let name = self.name.clone();
        let active = self.active;
        let transform = self.transform;
        let mut saved = Vec::new();
        let result = self.set_fields(map, ctx, &mut saved);
        if result.is_err() {
            self.name = name;
            self.active = active;
            self.transform = transform;
            for (component, previous) in saved.into_iter().rev() {
                if let Some(slot) = self.components.get_mut(&component) {
                    if let Err(e) = slot.set_json(&previous, ctx) {
                        tracing::warn!(target: "scene", "Could not restore component `{}`: {}", component, e);
                    }
                }
            }
        }
        result
    }

    // position / rotation / scale 是 transform 成员的快捷方式
    fn member(&self, name: &str) -> Option<&dyn Reflect> {
        match name {
            "name" => Some(&self.name),
            "active" => Some(&self.active),
            "transform" => Some(&self.transform),
            "position" => Some(&self.transform.position),
            "rotation" => Some(&self.transform.rotation),
            "scale" => Some(&self.transform.scale),
            _ => None,
        }
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
        match name {
            "name" => Some(&mut self.name),
            "active" => Some(&mut self.active),
            "transform" => Some(&mut self.transform),
            "position" => Some(&mut self.transform.position),
            "rotation" => Some(&mut self.transform.rotation),
            "scale" => Some(&mut self.transform.scale),
            _ => None,
        }
    }

    fn member_names(&self) -> Vec<String> {
        ["name", "active", "transform", "position", "rotation", "scale"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn component(&self, name: &str) -> Option<&dyn Reflect> {
        self.components.get(name).map(|c| c.as_ref())
    }

    fn component_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
        match self.components.get_mut(name) {
            Some(c) => Some(c.as_mut()),
            None => None,
        }
    }

    fn child(&self, name: &str) -> Option<&dyn Reflect> {
        self.child_node(name).map(|c| c as &dyn Reflect)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
        self.child_node_mut(name).map(|c| c as &mut dyn Reflect)
    }

    fn call(&self, method: &str, args: &[Value]) -> Option<Result<Value, String>> {
        match method {
            "childCount" => Some(Ok(Value::from(self.children.len()))),
            "childNames" => Some(Ok(json!(self
                .children
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()))),
            "componentNames" => Some(Ok(json!(self.component_names()))),
            "hasComponent" => Some(
                args.first()
                    .and_then(Value::as_str)
                    .map(|name| Value::Bool(self.components.contains_key(name)))
                    .ok_or_else(|| "hasComponent expects a component name".to_string()),
            ),
            "find" => Some(
                args.first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| "find expects a node name".to_string())
                    .map(|name| self.find(name).map(Value::String).unwrap_or(Value::Null)),
            ),
            _ => self.transform.call(method, args),
        }
    }
}

/// 通过桥接层暴露的场景对象
///
/// 事件:
/// - `setActive` (bool)
/// - `translate` (vector3)：在当前位置上叠加偏移
/// - `setVelocity` (vector3)
///
/// 每帧按 `velocity` 移动；控制端注册了 `moved` 兴趣时回报新位置。
#[derive(Default)]
pub struct SceneObject {
    pub node: SceneNode,
    pub velocity: Vec3,
}

impl SceneObject {
    pub fn new(node: SceneNode) -> Self {
        Self {
            node,
            velocity: Vec3::ZERO,
        }
    }

    fn decode_data<T: Convert>(envelope: &Envelope, ctx: &ObjectContext<'_>) -> BridgeResult<T> {
        let data = envelope.data.as_ref().ok_or_else(|| {
            BridgeError::MalformedEnvelope(format!("`{}` requires data", envelope.event))
        })?;
        Ok(T::decode(data, &ctx.convert_context())?)
    }

    fn on_set_active(&mut self, envelope: &Envelope, ctx: &mut ObjectContext<'_>) -> BridgeResult<()> {
        self.node.active = Self::decode_data(envelope, ctx)?;
        Ok(())
    }

    fn on_translate(&mut self, envelope: &Envelope, ctx: &mut ObjectContext<'_>) -> BridgeResult<()> {
        let offset: Vec3 = Self::decode_data(envelope, ctx)?;
        self.node.transform.position += offset;
        ctx.notify_interested(&*self, "moved", json!({"position": self.node.transform.position.encode()}));
        Ok(())
    }

    fn on_set_velocity(&mut self, envelope: &Envelope, ctx: &mut ObjectContext<'_>) -> BridgeResult<()> {
        self.velocity = Self::decode_data(envelope, ctx)?;
        Ok(())
    }
}

impl Reflect for SceneObject {
    fn type_name(&self) -> &'static str {
        "SceneObject"
    }

    fn to_json(&self) -> Value {
        let mut value = self.node.to_json();
        value["velocity"] = self.velocity.encode();
        value
    }

    fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()> {
        match value.as_object() {
            Some(map) if map.contains_key("velocity") => {
                let mut rest = map.clone();
                let velocity = match rest.remove("velocity") {
                    Some(velocity) => Vec3::decode(&velocity, ctx)?,
                    None => self.velocity,
                };
                self.node.set_json(&Value::Object(rest), ctx)?;
                self.velocity = velocity;
                Ok(())
            }
            _ => self.node.set_json(value, ctx),
        }
    }

    fn member(&self, name: &str) -> Option<&dyn Reflect> {
        match name {
            "velocity" => Some(&self.velocity),
            _ => self.node.member(name),
        }
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
        match name {
            "velocity" => Some(&mut self.velocity),
            _ => self.node.member_mut(name),
        }
    }

    fn member_names(&self) -> Vec<String> {
        let mut names = self.node.member_names();
        names.push("velocity".into());
        names
    }

    fn component(&self, name: &str) -> Option<&dyn Reflect> {
        self.node.component(name)
    }

    fn component_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
        self.node.component_mut(name)
    }

    fn child(&self, name: &str) -> Option<&dyn Reflect> {
        self.node.child(name)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
        self.node.child_mut(name)
    }

    fn call(&self, method: &str, args: &[Value]) -> Option<Result<Value, String>> {
        match method {
            "speed" => Some(Ok(encode_f32(self.velocity.length()))),
            _ => self.node.call(method, args),
        }
    }
}

impl BridgeObject for SceneObject {
    fn event_table() -> EventTable<Self> {
        EventTable::new()
            .on("setActive", Self::on_set_active)
            .on("translate", Self::on_translate)
            .on("setVelocity", Self::on_set_velocity)
    }

    fn update(&mut self, dt: f32, ctx: &mut ObjectContext<'_>) {
        if !self.node.active || self.velocity == Vec3::ZERO {
            return;
        }
        self.node.transform.position += self.velocity * dt;
        ctx.notify_interested(&*self, "moved", json!({"position": self.node.transform.position.encode()}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::{assign, evaluate, AccessorPath};
    use crate::convert::Color;

    #[derive(Default)]
    struct Light {
        color: Color,
        intensity: f32,
    }

    impl_reflect!(Light {
        "color" => color,
        "intensity" => intensity,
    });

    fn rig() -> SceneNode {
        SceneNode::new("rig")
            .with_child(
                SceneNode::new("arm")
                    .with_transform(Transform::from_position(Vec3::new(0.0, 1.0, 0.0)))
                    .with_child(SceneNode::new("hand").with_component(
                        "Light",
                        Light {
                            color: Color::WHITE,
                            intensity: 3.0,
                        },
                    )),
            )
            .with_child(SceneNode::new("base"))
    }

    fn get(root: &dyn Reflect, path: &str) -> Value {
        evaluate(root, &AccessorPath::parse(path).unwrap(), &ConvertContext::default()).unwrap()
    }

    #[test]
    fn test_transform_and_component_steps() {
        let node = rig();
        assert_eq!(get(&node, "transform:arm/position/y").as_f64(), Some(1.0));
        assert_eq!(
            get(&node, "transform:arm/transform:hand/component:Light/intensity").as_f64(),
            Some(3.0)
        );
    }

    #[test]
    fn test_parent_step_returns_to_previous_node() {
        let node = rig();
        assert_eq!(get(&node, "transform:arm/transform:../name"), json!("rig"));
        assert_eq!(
            get(&node, "transform:arm/transform:hand/transform:../transform:../method:childCount"),
            json!(2)
        );
    }

    #[test]
    fn test_assign_through_hierarchy() {
        let mut node = rig();
        let path = AccessorPath::parse("transform:arm/transform:hand/component:Light/color").unwrap();
        assign(&mut node, &path, &json!("#00FF00"), &ConvertContext::default()).unwrap();
        assert_eq!(get(&node, "transform:arm/transform:hand/component:Light/color/g").as_f64(), Some(1.0));

        let parent = AccessorPath::parse("transform:arm/transform:../name").unwrap();
        assert!(assign(&mut node, &parent, &json!("x"), &ConvertContext::default()).is_err());
    }

    #[test]
    fn test_node_methods() {
        let node = rig();
        assert_eq!(get(&node, "method:find(\"hand\")"), json!("arm/hand"));
        assert_eq!(get(&node, "method:find(nobody)"), Value::Null);
        assert_eq!(get(&node, "transform:arm/transform:hand/method:hasComponent(Light)"), json!(true));
        assert_eq!(get(&node, "method:forward"), json!({"x": 0.0, "y": 0.0, "z": -1.0}));
    }

    #[test]
    fn test_node_set_json_updates_components() {
        let mut node = SceneNode::new("lamp").with_component("Light", Light::default());
        node.set_json(
            &json!({"position": [1, 2, 3], "components": {"Light": {"intensity": 5}}}),
            &ConvertContext::default(),
        )
        .unwrap();
        assert_eq!(node.transform.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(get(&node, "component:Light/intensity").as_f64(), Some(5.0));
        assert!(node
            .set_json(&json!({"components": {"Camera": {}}}), &ConvertContext::default())
            .is_err());
    }

    #[test]
    fn test_failed_node_write_leaves_node_unchanged() {
        let mut node = SceneNode::new("lamp").with_component(
            "Light",
            Light {
                color: Color::WHITE,
                intensity: 1.0,
            },
        );
        let ctx = ConvertContext::default();
        let result = node.set_json(
            &json!({
                "name": "renamed",
                "components": {"Light": {"intensity": 4}},
                "transform": {"position": [1, 2, 3], "scale": "bad"}
            }),
            &ctx,
        );
        assert!(result.is_err());
        assert_eq!(node.name, "lamp");
        assert_eq!(node.transform, Transform::default());
        assert_eq!(get(&node, "component:Light/intensity").as_f64(), Some(1.0));
    }

    #[test]
    fn test_failed_object_write_keeps_velocity() {
        let mut object = SceneObject::default();
        let result = object.set_json(
            &json!({"velocity": [1, 0, 0], "position": "nowhere"}),
            &ConvertContext::default(),
        );
        assert!(result.is_err());
        assert_eq!(object.velocity, Vec3::ZERO);
        assert_eq!(object.node.transform.position, Vec3::ZERO);
    }

    #[test]
    fn test_transform_directions() {
        let t = Transform {
            rotation: Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            ..Default::default()
        };
        assert!((t.forward() - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-5);
        assert!((t.up() - Vec3::Y).length() < 1e-5);
    }
}
