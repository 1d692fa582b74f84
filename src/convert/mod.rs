//! JSON ↔ native value conversion
//!
//! Decoding is total for well-formed shapes. A recognizable-but-malformed
//! shape (wrong component type, wrong array length, bad hex digit) is a
//! `ConvertError` naming the expected shape; only genuinely absent fields
//! fall back to defaults.

use serde_json::{Map, Value};

use crate::core::{ConvertError, ConvertResult};
use crate::resources::ResourceLoader;

pub mod color;
pub mod vector;

pub use color::Color;

/// Host services available while decoding.
///
/// Resource references need a loader; everything else ignores the context.
#[derive(Clone, Copy, Default)]
pub struct ConvertContext<'a> {
    pub resources: Option<&'a dyn ResourceLoader>,
    /// Object on whose behalf a resource is requested
    pub requester: Option<&'a str>,
}

impl<'a> ConvertContext<'a> {
    pub fn new(resources: Option<&'a dyn ResourceLoader>, requester: Option<&'a str>) -> Self {
        Self {
            resources,
            requester,
        }
    }
}

/// Bidirectional mapping between a native shape and JSON.
pub trait Convert: Sized {
    /// Name of the shape, reported in conversion errors
    const SHAPE: &'static str;

    fn decode(value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<Self>;

    fn encode(&self) -> Value;
}

/// JSON kind name used in error messages
pub fn shape_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 将 f32 编码为 JSON 数值，非有限值编码为 null
pub fn encode_f32(value: f32) -> Value {
    serde_json::Number::from_f64(value as f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub(crate) fn number(value: &Value, expected: &'static str, field: &str) -> ConvertResult<f32> {
    value.as_f64().map(|n| n as f32).ok_or_else(|| {
        ConvertError::new(
            expected,
            format!("component `{}` must be a number, got {}", field, shape_of(value)),
        )
    })
}

/// 读取对象中的可选数值字段；字段缺失时返回默认值
pub(crate) fn field_or(
    map: &Map<String, Value>,
    field: &str,
    default: f32,
    expected: &'static str,
) -> ConvertResult<f32> {
    match map.get(field) {
        None => Ok(default),
        Some(v) => number(v, expected, field),
    }
}

/// Reject object keys outside a shape's field set.
pub(crate) fn known_fields(
    map: &Map<String, Value>,
    fields: &[&str],
    expected: &'static str,
) -> ConvertResult<()> {
    match map.keys().find(|key| !fields.contains(&key.as_str())) {
        Some(key) => Err(ConvertError::new(
            expected,
            format!("unknown field `{}`, expected one of {}", key, fields.join("/")),
        )),
        None => Ok(()),
    }
}

pub(crate) fn fixed_array<const N: usize>(
    items: &[Value],
    expected: &'static str,
) -> ConvertResult<[f32; N]> {
    if items.len() != N {
        return Err(ConvertError::new(
            expected,
            format!("expected {} components, got {}", N, items.len()),
        ));
    }
    let mut out = [0.0f32; N];
    for (i, item) in items.iter().enumerate() {
        out[i] = number(item, expected, &i.to_string())?;
    }
    Ok(out)
}

/// Decode a JSON value into any convertible shape.
pub fn decode<T: Convert>(value: &Value, ctx: &ConvertContext<'_>) -> ConvertResult<T> {
    T::decode(value, ctx)
}

pub fn encode<T: Convert>(value: &T) -> Value {
    value.encode()
}

impl Convert for bool {
    const SHAPE: &'static str = "bool";

    fn decode(value: &Value, _ctx: &ConvertContext<'_>) -> ConvertResult<Self> {
        value
            .as_bool()
            .ok_or_else(|| ConvertError::new(Self::SHAPE, format!("got {}", shape_of(value))))
    }

    fn encode(&self) -> Value {
        Value::Bool(*self)
    }
}

impl Convert for String {
    const SHAPE: &'static str = "string";

    fn decode(value: &Value, _ctx: &ConvertContext<'_>) -> ConvertResult<Self> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| ConvertError::new(Self::SHAPE, format!("got {}", shape_of(value))))
    }

    fn encode(&self) -> Value {
        Value::String(self.clone())
    }
}

impl Convert for f32 {
    const SHAPE: &'static str = "number";

    fn decode(value: &Value, _ctx: &ConvertContext<'_>) -> ConvertResult<Self> {
        value
            .as_f64()
            .map(|n| n as f32)
            .ok_or_else(|| ConvertError::new(Self::SHAPE, format!("got {}", shape_of(value))))
    }

    fn encode(&self) -> Value {
        encode_f32(*self)
    }
}

impl Convert for f64 {
    const SHAPE: &'static str = "number";

    fn decode(value: &Value, _ctx: &ConvertContext<'_>) -> ConvertResult<Self> {
        value
            .as_f64()
            .ok_or_else(|| ConvertError::new(Self::SHAPE, format!("got {}", shape_of(value))))
    }

    fn encode(&self) -> Value {
        serde_json::Number::from_f64(*self)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

macro_rules! impl_convert_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Convert for $ty {
                const SHAPE: &'static str = "integer";

                fn decode(value: &Value, _ctx: &ConvertContext<'_>) -> ConvertResult<Self> {
                    let wide = if let Some(n) = value.as_i64() {
                        n as i128
                    } else if let Some(n) = value.as_u64() {
                        n as i128
                    } else if let Some(f) = value.as_f64().filter(|f| f.fract() == 0.0) {
                        f as i128
                    } else {
                        return Err(ConvertError::new(
                            Self::SHAPE,
                            format!("got {}", shape_of(value)),
                        ));
                    };
                    <$ty>::try_from(wide).map_err(|_| {
                        ConvertError::new(
                            Self::SHAPE,
                            format!("{} is out of range for {}", wide, stringify!($ty)),
                        )
                    })
                }

                fn encode(&self) -> Value {
                    Value::from(*self)
                }
            }
        )*
    };
}

impl_convert_integer!(i32, i64, u32, u64, usize);

impl Convert for Value {
    const SHAPE: &'static str = "json";

    fn decode(value: &Value, _ctx: &ConvertContext<'_>) -> ConvertResult<Self> {
        Ok(value.clone())
    }

    fn encode(&self) -> Value {
        self.clone()
    }
}
