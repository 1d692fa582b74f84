//! Field tables for accessor navigation
//!
//! Every type reachable by a path implements `Reflect`: an explicit table of
//! named members, indexed elements, keyed entries and host-structural links
//! (components, child nodes). There is no runtime type introspection; structs
//! get their table from the `impl_reflect!` macro.

use std::collections::{BTreeMap, HashMap};

use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use serde_json::Value;

use crate::convert::vector::quat_to_euler_degrees;
use crate::convert::{encode_f32, shape_of, Color, Convert, ConvertContext};
use crate::core::{ConvertError, ConvertResult};

/// A value that accessor paths can read, write and walk through.
pub trait Reflect {
    fn type_name(&self) -> &'static str;

    /// Encode the whole value as JSON
    fn to_json(&self) -> Value;

    /// Replace the value from JSON. Object-shaped structs only touch the
    /// fields present in `value`.
    fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()>;

    fn is_null(&self) -> bool {
        false
    }

    fn member(&self, _name: &str) -> Option<&dyn Reflect> {
        None
    }

    fn member_mut(&mut self, _name: &str) -> Option<&mut dyn Reflect> {
        None
    }

    fn member_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Element count for ordered containers
    fn len(&self) -> Option<usize> {
        None
    }

    fn index(&self, _index: usize) -> Option<&dyn Reflect> {
        None
    }

    fn index_mut(&mut self, _index: usize) -> Option<&mut dyn Reflect> {
        None
    }

    fn key(&self, _key: &str) -> Option<&dyn Reflect> {
        None
    }

    fn key_mut(&mut self, _key: &str) -> Option<&mut dyn Reflect> {
        None
    }

    /// Insert a new keyed entry. `None` when the value is not a map.
    fn insert_key(
        &mut self,
        _key: &str,
        _value: &Value,
        _ctx: &ConvertContext<'_>,
    ) -> Option<ConvertResult<()>> {
        None
    }

    /// Component attached to an entity
    fn component(&self, _name: &str) -> Option<&dyn Reflect> {
        None
    }

    fn component_mut(&mut self, _name: &str) -> Option<&mut dyn Reflect> {
        None
    }

    /// Child in the spatial hierarchy
    fn child(&self, _name: &str) -> Option<&dyn Reflect> {
        None
    }

    fn child_mut(&mut self, _name: &str) -> Option<&mut dyn Reflect> {
        None
    }

    /// Invoke a named read-only operation. `None` when the method is unknown.
    fn call(&self, _method: &str, _args: &[Value]) -> Option<Result<Value, String>> {
        None
    }
}

/// Exact match first, then ASCII case-insensitive.
pub fn resolve_member_name(target: &dyn Reflect, name: &str) -> Option<String> {
    if target.member(name).is_some() {
        return Some(name.to_string());
    }
    target
        .member_names()
        .into_iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(name))
}

fn expect_object<'v>(
    value: &'v Value,
    type_name: &'static str,
) -> ConvertResult<&'v serde_json::Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        ConvertError::new(
            "object",
            format!("{} expects an object, got {}", type_name, shape_of(value)),
        )
    })
}

fn missing_field(type_name: &str, key: &str) -> ConvertError {
    ConvertError::new("object", format!("{} has no field `{}`", type_name, key))
}

/// Apply each key of `value` to the matching member of `target`.
///
/// All or nothing: when a key fails, the members already written get their
/// previous values back.
pub fn set_members(
    target: &mut dyn Reflect,
    value: &Value,
    ctx: &ConvertContext<'_>,
) -> ConvertResult<()> {
    let type_name = target.type_name();
    let map = expect_object(value, type_name)?;
    let mut written: Vec<(String, Value)> = Vec::with_capacity(map.len());
    for (key, item) in map {
        let result = match resolve_member_name(&*target, key) {
            Some(name) => match target.member_mut(&name) {
                Some(member) => {
                    written.push((name, member.to_json()));
                    member.set_json(item, ctx)
                }
                None => Err(missing_field(type_name, key)),
            },
            None => Err(missing_field(type_name, key)),
        };
        if let Err(e) = result {
            restore_members(target, written, ctx);
            return Err(e);
        }
    }
    Ok(())
}

/// Write saved member values back, newest first.
pub(crate) fn restore_members(
    target: &mut dyn Reflect,
    saved: Vec<(String, Value)>,
    ctx: &ConvertContext<'_>,
) {
    for (name, previous) in saved.into_iter().rev() {
        if let Some(member) = target.member_mut(&name) {
            if let Err(e) = member.set_json(&previous, ctx) {
                tracing::warn!(target: "accessor", "Could not restore `{}` after a failed write: {}", name, e);
            }
        }
    }
}

/// Encode every member of `target` into an object.
pub fn members_to_json(target: &dyn Reflect) -> Value {
    let mut map = serde_json::Map::new();
    for name in target.member_names() {
        if let Some(member) = target.member(&name) {
            map.insert(name, member.to_json());
        }
    }
    Value::Object(map)
}

macro_rules! impl_reflect_scalar {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl Reflect for $ty {
                fn type_name(&self) -> &'static str {
                    $name
                }

                fn to_json(&self) -> Value {
                    self.encode()
                }

                fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()> {
                    *self = <$ty as Convert>::decode(value, ctx)?;
                    Ok(())
                }
            }
        )*
    };
}

impl_reflect_scalar!(
    bool => "bool",
    f32 => "f32",
    f64 => "f64",
    i32 => "i32",
    i64 => "i64",
    u32 => "u32",
    u64 => "u64",
    usize => "usize",
    Mat3 => "Mat3",
    Mat4 => "Mat4",
);

impl Reflect for String {
    fn type_name(&self) -> &'static str {
        "String"
    }

    fn to_json(&self) -> Value {
        self.encode()
    }

    fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()> {
        *self = String::decode(value, ctx)?;
        Ok(())
    }

    fn len(&self) -> Option<usize> {
        Some(self.chars().count())
    }

    fn call(&self, method: &str, _args: &[Value]) -> Option<Result<Value, String>> {
        match method {
            "length" => Some(Ok(Value::from(self.chars().count()))),
            "toUpper" => Some(Ok(Value::String(self.to_uppercase()))),
            "toLower" => Some(Ok(Value::String(self.to_lowercase()))),
            _ => None,
        }
    }
}

macro_rules! impl_reflect_vector {
    ($ty:ty, $name:literal, [$($field:ident),+]) => {
        impl Reflect for $ty {
            fn type_name(&self) -> &'static str {
                $name
            }

            fn to_json(&self) -> Value {
                self.encode()
            }

            fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()> {
                *self = <$ty as Convert>::decode(value, ctx)?;
                Ok(())
            }

            fn member(&self, name: &str) -> Option<&dyn Reflect> {
                $(
                    if name == stringify!($field) {
                        return Some(&self.$field);
                    }
                )+
                None
            }

            fn member_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
                $(
                    if name == stringify!($field) {
                        return Some(&mut self.$field);
                    }
                )+
                None
            }

            fn member_names(&self) -> Vec<String> {
                vec![$(stringify!($field).to_string()),+]
            }

            fn call(&self, method: &str, args: &[Value]) -> Option<Result<Value, String>> {
                vector_method(self.to_array().as_slice(), method, args)
            }
        }
    };
}

impl_reflect_vector!(Vec2, "Vec2", [x, y]);
impl_reflect_vector!(Vec3, "Vec3", [x, y, z]);
impl_reflect_vector!(Vec4, "Vec4", [x, y, z, w]);

fn vector_method(components: &[f32], method: &str, args: &[Value]) -> Option<Result<Value, String>> {
    match method {
        "length" | "magnitude" => {
            let sq: f32 = components.iter().map(|c| c * c).sum();
            Some(Ok(encode_f32(sq.sqrt())))
        }
        "dot" => {
            let other: Result<Vec<f32>, String> = args
                .iter()
                .map(|a| a.as_f64().map(|n| n as f32).ok_or_else(|| "dot expects numbers".to_string()))
                .collect();
            Some(other.and_then(|other| {
                if other.len() != components.len() {
                    return Err(format!(
                        "dot expects {} arguments, got {}",
                        components.len(),
                        other.len()
                    ));
                }
                Ok(encode_f32(components.iter().zip(&other).map(|(a, b)| a * b).sum()))
            }))
        }
        _ => None,
    }
}

impl Reflect for Quat {
    fn type_name(&self) -> &'static str {
        "Quat"
    }

    fn to_json(&self) -> Value {
        self.encode()
    }

    fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()> {
        *self = Quat::decode(value, ctx)?;
        Ok(())
    }

    fn member(&self, name: &str) -> Option<&dyn Reflect> {
        match name {
            "x" => Some(&self.x),
            "y" => Some(&self.y),
            "z" => Some(&self.z),
            "w" => Some(&self.w),
            _ => None,
        }
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
        match name {
            "x" => Some(&mut self.x),
            "y" => Some(&mut self.y),
            "z" => Some(&mut self.z),
            "w" => Some(&mut self.w),
            _ => None,
        }
    }

    fn member_names(&self) -> Vec<String> {
        ["x", "y", "z", "w"].iter().map(|s| s.to_string()).collect()
    }

    fn call(&self, method: &str, _args: &[Value]) -> Option<Result<Value, String>> {
        match method {
            "eulerAngles" => {
                let (roll, pitch, yaw) = quat_to_euler_degrees(*self);
                Some(Ok(serde_json::json!({
                    "roll": encode_f32(roll),
                    "pitch": encode_f32(pitch),
                    "yaw": encode_f32(yaw),
                })))
            }
            _ => None,
        }
    }
}

impl Reflect for Color {
    fn type_name(&self) -> &'static str {
        "Color"
    }

    fn to_json(&self) -> Value {
        self.encode()
    }

    fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()> {
        *self = Color::decode(value, ctx)?;
        Ok(())
    }

    fn member(&self, name: &str) -> Option<&dyn Reflect> {
        match name {
            "r" => Some(&self.r),
            "g" => Some(&self.g),
            "b" => Some(&self.b),
            "a" => Some(&self.a),
            _ => None,
        }
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
        match name {
            "r" => Some(&mut self.r),
            "g" => Some(&mut self.g),
            "b" => Some(&mut self.b),
            "a" => Some(&mut self.a),
            _ => None,
        }
    }

    fn member_names(&self) -> Vec<String> {
        ["r", "g", "b", "a"].iter().map(|s| s.to_string()).collect()
    }

    fn call(&self, method: &str, _args: &[Value]) -> Option<Result<Value, String>> {
        match method {
            "toHex" => Some(Ok(Value::String(self.to_hex()))),
            _ => None,
        }
    }
}

impl Reflect for Value {
    fn type_name(&self) -> &'static str {
        "json"
    }

    fn to_json(&self) -> Value {
        self.clone()
    }

    fn set_json(&mut self, value: &Value, _ctx: &ConvertContext<'_>) -> ConvertResult<()> {
        *self = value.clone();
        Ok(())
    }

    fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn member(&self, name: &str) -> Option<&dyn Reflect> {
        match self {
            Value::Object(map) => map.get(name).map(|v| v as &dyn Reflect),
            Value::Array(items) => name
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .map(|v| v as &dyn Reflect),
            _ => None,
        }
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
        match self {
            Value::Object(map) => map.get_mut(name).map(|v| v as &mut dyn Reflect),
            Value::Array(items) => name
                .parse::<usize>()
                .ok()
                .and_then(move |i| items.get_mut(i))
                .map(|v| v as &mut dyn Reflect),
            _ => None,
        }
    }

    fn member_names(&self) -> Vec<String> {
        match self {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn len(&self) -> Option<usize> {
        match self {
            Value::Array(items) => Some(items.len()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        }
    }

    fn index(&self, index: usize) -> Option<&dyn Reflect> {
        self.as_array()
            .and_then(|items| items.get(index))
            .map(|v| v as &dyn Reflect)
    }

    fn index_mut(&mut self, index: usize) -> Option<&mut dyn Reflect> {
        self.as_array_mut()
            .and_then(|items| items.get_mut(index))
            .map(|v| v as &mut dyn Reflect)
    }

    fn key(&self, key: &str) -> Option<&dyn Reflect> {
        self.as_object()
            .and_then(|map| map.get(key))
            .map(|v| v as &dyn Reflect)
    }

    fn key_mut(&mut self, key: &str) -> Option<&mut dyn Reflect> {
        self.as_object_mut()
            .and_then(|map| map.get_mut(key))
            .map(|v| v as &mut dyn Reflect)
    }

    fn insert_key(
        &mut self,
        key: &str,
        value: &Value,
        _ctx: &ConvertContext<'_>,
    ) -> Option<ConvertResult<()>> {
        let map = self.as_object_mut()?;
        map.insert(key.to_string(), value.clone());
        Some(Ok(()))
    }

    fn call(&self, method: &str, _args: &[Value]) -> Option<Result<Value, String>> {
        match (method, self) {
            ("length" | "count", _) => Some(
                Reflect::len(self)
                    .map(Value::from)
                    .ok_or_else(|| format!("{} has no length", shape_of(self))),
            ),
            ("keys", Value::Object(map)) => Some(Ok(Value::Array(
                map.keys().cloned().map(Value::String).collect(),
            ))),
            _ => None,
        }
    }
}

impl<T: Reflect + Default> Reflect for Vec<T> {
    fn type_name(&self) -> &'static str {
        "list"
    }

    fn to_json(&self) -> Value {
        Value::Array(self.iter().map(Reflect::to_json).collect())
    }

    fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()> {
        let items = value.as_array().ok_or_else(|| {
            ConvertError::new("array", format!("list expects an array, got {}", shape_of(value)))
        })?;
        let mut next = Vec::with_capacity(items.len());
        for item in items {
            let mut slot = T::default();
            slot.set_json(item, ctx)?;
            next.push(slot);
        }
        *self = next;
        Ok(())
    }

    fn len(&self) -> Option<usize> {
        Some(Vec::len(self))
    }

    fn index(&self, index: usize) -> Option<&dyn Reflect> {
        self.get(index).map(|v| v as &dyn Reflect)
    }

    fn index_mut(&mut self, index: usize) -> Option<&mut dyn Reflect> {
        self.get_mut(index).map(|v| v as &mut dyn Reflect)
    }

    fn call(&self, method: &str, _args: &[Value]) -> Option<Result<Value, String>> {
        match method {
            "length" | "count" => Some(Ok(Value::from(Vec::len(self)))),
            _ => None,
        }
    }
}

macro_rules! impl_reflect_map {
    ($map:ident, $name:literal) => {
        impl<T: Reflect + Default> Reflect for $map<String, T> {
            fn type_name(&self) -> &'static str {
                $name
            }

            fn to_json(&self) -> Value {
                let mut keys: Vec<&String> = self.keys().collect();
                keys.sort();
                let mut map = serde_json::Map::new();
                for key in keys {
                    if let Some(item) = self.get(key) {
                        map.insert(key.clone(), item.to_json());
                    }
                }
                Value::Object(map)
            }

            fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()> {
                let map = expect_object(value, $name)?;
                let mut next = $map::new();
                for (key, item) in map {
                    let mut slot = T::default();
                    slot.set_json(item, ctx)?;
                    next.insert(key.clone(), slot);
                }
                *self = next;
                Ok(())
            }

            fn member(&self, name: &str) -> Option<&dyn Reflect> {
                self.key(name)
            }

            fn member_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
                self.key_mut(name)
            }

            fn member_names(&self) -> Vec<String> {
                self.keys().cloned().collect()
            }

            fn len(&self) -> Option<usize> {
                Some($map::len(self))
            }

            fn key(&self, key: &str) -> Option<&dyn Reflect> {
                self.get(key).map(|v| v as &dyn Reflect)
            }

            fn key_mut(&mut self, key: &str) -> Option<&mut dyn Reflect> {
                self.get_mut(key).map(|v| v as &mut dyn Reflect)
            }

            fn insert_key(
                &mut self,
                key: &str,
                value: &Value,
                ctx: &ConvertContext<'_>,
            ) -> Option<ConvertResult<()>> {
                let mut slot = T::default();
                Some(slot.set_json(value, ctx).map(|()| {
                    self.insert(key.to_string(), slot);
                }))
            }

            fn call(&self, method: &str, _args: &[Value]) -> Option<Result<Value, String>> {
                match method {
                    "length" | "count" => Some(Ok(Value::from($map::len(self)))),
                    "keys" => {
                        let mut keys: Vec<&String> = self.keys().collect();
                        keys.sort();
                        Some(Ok(Value::Array(
                            keys.into_iter().cloned().map(Value::String).collect(),
                        )))
                    }
                    _ => None,
                }
            }
        }
    };
}

impl_reflect_map!(HashMap, "map");
impl_reflect_map!(BTreeMap, "map");

impl<T: Reflect + Default> Reflect for Option<T> {
    fn type_name(&self) -> &'static str {
        match self {
            Some(inner) => inner.type_name(),
            None => "null",
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Some(inner) => inner.to_json(),
            None => Value::Null,
        }
    }

    fn set_json(&mut self, value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<()> {
        if value.is_null() {
            *self = None;
            return Ok(());
        }
        let mut inner = T::default();
        inner.set_json(value, ctx)?;
        *self = Some(inner);
        Ok(())
    }

    fn is_null(&self) -> bool {
        self.is_none()
    }

    fn member(&self, name: &str) -> Option<&dyn Reflect> {
        self.as_ref()?.member(name)
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut dyn Reflect> {
        self.as_mut()?.member_mut(name)
    }

    fn member_names(&self) -> Vec<String> {
        self.as_ref().map(Reflect::member_names).unwrap_or_default()
    }

    fn len(&self) -> Option<usize> {
        self.as_ref()?.len()
    }

    fn index(&self, index: usize) -> Option<&dyn Reflect> {
        self.as_ref()?.index(index)
    }

    fn index_mut(&mut self, index: usize) -> Option<&mut dyn Reflect> {
        self.as_mut()?.index_mut(index)
    }

    fn key(&self, key: &str) -> Option<&dyn Reflect> {
        self.as_ref()?.key(key)
    }

    fn key_mut(&mut self, key: &str) -> Option<&mut dyn Reflect> {
        self.as_mut()?.key_mut(key)
    }

    fn call(&self, method: &str, args: &[Value]) -> Option<Result<Value, String>> {
        self.as_ref()?.call(method, args)
    }
}
