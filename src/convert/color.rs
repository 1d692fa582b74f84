//! Color conversion
//!
//! Accepts `"#RRGGBB"`, `"#RRGGBBAA"`, `{"r","g","b","a"}` (0..1 floats, alpha
//! optional) and `[r, g, b]` / `[r, g, b, a]`. Always encodes to the component
//! object, so re-encoding a decoded value is stable.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{encode_f32, field_or, fixed_array, known_fields, shape_of, Convert, ConvertContext};
use crate::core::{ConvertError, ConvertResult};

/// Linear RGBA color with components in 0..1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl Color {
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::rgba(r, g, b, 1.0)
    }

    /// Parse `#RRGGBB` or `#RRGGBBAA`
    pub fn from_hex(text: &str) -> ConvertResult<Self> {
        let digits = text.strip_prefix('#').ok_or_else(|| {
            ConvertError::new(Color::SHAPE, format!("hex color `{}` must start with '#'", text))
        })?;
        if digits.len() != 6 && digits.len() != 8 {
            return Err(ConvertError::new(
                Color::SHAPE,
                format!("hex color `{}` must have 6 or 8 digits", text),
            ));
        }
        let channel = |i: usize| -> ConvertResult<f32> {
            let pair = digits.get(i * 2..i * 2 + 2).unwrap_or_default();
            u8::from_str_radix(pair, 16)
                .map(|v| v as f32 / 255.0)
                .map_err(|_| {
                    ConvertError::new(
                        Color::SHAPE,
                        format!("invalid hex digits `{}` in `{}`", pair, text),
                    )
                })
        };
        let a = if digits.len() == 8 { channel(3)? } else { 1.0 };
        Ok(Color::rgba(channel(0)?, channel(1)?, channel(2)?, a))
    }

    /// Format as `#RRGGBBAA`
    pub fn to_hex(&self) -> String {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!(
            "#{:02X}{:02X}{:02X}{:02X}",
            q(self.r),
            q(self.g),
            q(self.b),
            q(self.a)
        )
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Convert for Color {
    const SHAPE: &'static str = "color";

    fn decode(value: &Value, _ctx: &ConvertContext<'_>) -> ConvertResult<Self> {
        match value {
            Value::String(text) => Color::from_hex(text),
            Value::Object(map) => {
                known_fields(map, &["r", "g", "b", "a"], Self::SHAPE)?;
                Ok(Color::rgba(
                    field_or(map, "r", 0.0, Self::SHAPE)?,
                    field_or(map, "g", 0.0, Self::SHAPE)?,
                    field_or(map, "b", 0.0, Self::SHAPE)?,
                    field_or(map, "a", 1.0, Self::SHAPE)?,
                ))
            }
            Value::Array(items) if items.len() == 3 => {
                let [r, g, b] = fixed_array::<3>(items, Self::SHAPE)?;
                Ok(Color::rgb(r, g, b))
            }
            Value::Array(items) => {
                let [r, g, b, a] = fixed_array::<4>(items, Self::SHAPE)?;
                Ok(Color::rgba(r, g, b, a))
            }
            other => Err(ConvertError::new(
                Self::SHAPE,
                format!("expected hex string, object or array, got {}", shape_of(other)),
            )),
        }
    }

    fn encode(&self) -> Value {
        json!({
            "r": encode_f32(self.r),
            "g": encode_f32(self.g),
            "b": encode_f32(self.b),
            "a": encode_f32(self.a),
        })
    }
}
