//! 向量、四元数与矩阵的转换
//!
//! 支持的 JSON 形状：
//! - 向量：`{"x":1,"y":2,"z":3}`（缺失分量取 0）或定长数组 `[1,2,3]`
//! - 四元数：分量 `{"x","y","z","w"}`、欧拉角 `{"roll","pitch","yaw"}`（角度制）或 `[x,y,z,w]`
//! - 矩阵：按列优先展开的扁平数组（Mat3 为 9 个，Mat4 为 16 个）

use glam::{EulerRot, Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use serde_json::{json, Value};

use super::{encode_f32, field_or, fixed_array, known_fields, shape_of, Convert, ConvertContext};
use crate::core::{ConvertError, ConvertResult};

macro_rules! impl_convert_vector {
    ($ty:ty, $shape:literal, $n:literal, [$($field:ident),+]) => {
        impl Convert for $ty {
            const SHAPE: &'static str = $shape;

            fn decode(value: &Value, _ctx: &ConvertContext<'_>) -> ConvertResult<Self> {
                match value {
                    Value::Object(map) => {
                        known_fields(map, &[$(stringify!($field)),+], Self::SHAPE)?;
                        Ok(<$ty>::new(
                            $(field_or(map, stringify!($field), 0.0, Self::SHAPE)?),+
                        ))
                    }
                    Value::Array(items) => {
                        let parts = fixed_array::<$n>(items, Self::SHAPE)?;
                        Ok(<$ty>::from_array(parts))
                    }
                    other => Err(ConvertError::new(
                        Self::SHAPE,
                        format!("expected object or array, got {}", shape_of(other)),
                    )),
                }
            }

            fn encode(&self) -> Value {
                let mut map = serde_json::Map::new();
                $(map.insert(stringify!($field).to_string(), encode_f32(self.$field));)+
                Value::Object(map)
            }
        }
    };
}

impl_convert_vector!(Vec2, "vector2", 2, [x, y]);
impl_convert_vector!(Vec3, "vector3", 3, [x, y, z]);
impl_convert_vector!(Vec4, "vector4", 4, [x, y, z, w]);

const EULER_KEYS: [&str; 3] = ["roll", "pitch", "yaw"];
const COMPONENT_KEYS: [&str; 4] = ["x", "y", "z", "w"];

/// Pitch about X, yaw about Y, roll about Z, applied roll → pitch → yaw.
pub fn quat_from_euler_degrees(roll: f32, pitch: f32, yaw: f32) -> Quat {
    Quat::from_euler(
        EulerRot::YXZ,
        yaw.to_radians(),
        pitch.to_radians(),
        roll.to_radians(),
    )
}

/// Inverse of [`quat_from_euler_degrees`], returns `(roll, pitch, yaw)` in degrees
pub fn quat_to_euler_degrees(q: Quat) -> (f32, f32, f32) {
    let (yaw, pitch, roll) = q.to_euler(EulerRot::YXZ);
    (roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
}

impl Convert for Quat {
    const SHAPE: &'static str = "quaternion";

    fn decode(value: &Value, _ctx: &ConvertContext<'_>) -> ConvertResult<Self> {
        match value {
            Value::Object(map) => {
                let has_euler = EULER_KEYS.iter().any(|k| map.contains_key(*k));
                let has_components = COMPONENT_KEYS.iter().any(|k| map.contains_key(*k));
                if has_euler && has_components {
                    return Err(ConvertError::new(
                        Self::SHAPE,
                        "mixes component keys (x/y/z/w) with euler keys (roll/pitch/yaw)",
                    ));
                }
                if has_euler {
                    known_fields(map, &EULER_KEYS, Self::SHAPE)?;
                    let roll = field_or(map, "roll", 0.0, Self::SHAPE)?;
                    let pitch = field_or(map, "pitch", 0.0, Self::SHAPE)?;
                    let yaw = field_or(map, "yaw", 0.0, Self::SHAPE)?;
                    return Ok(quat_from_euler_degrees(roll, pitch, yaw));
                }
                known_fields(map, &COMPONENT_KEYS, Self::SHAPE)?;
                Ok(Quat::from_xyzw(
                    field_or(map, "x", 0.0, Self::SHAPE)?,
                    field_or(map, "y", 0.0, Self::SHAPE)?,
                    field_or(map, "z", 0.0, Self::SHAPE)?,
                    field_or(map, "w", 1.0, Self::SHAPE)?,
                ))
            }
            Value::Array(items) => {
                let [x, y, z, w] = fixed_array::<4>(items, Self::SHAPE)?;
                Ok(Quat::from_xyzw(x, y, z, w))
            }
            other => Err(ConvertError::new(
                Self::SHAPE,
                format!("expected object or array, got {}", shape_of(other)),
            )),
        }
    }

    fn encode(&self) -> Value {
        json!({
            "x": encode_f32(self.x),
            "y": encode_f32(self.y),
            "z": encode_f32(self.z),
            "w": encode_f32(self.w),
        })
    }
}

fn decode_matrix<const N: usize>(value: &Value, shape: &'static str) -> ConvertResult<[f32; N]> {
    match value {
        Value::Array(items) => fixed_array::<N>(items, shape),
        other => Err(ConvertError::new(
            shape,
            format!("expected flat array of {} numbers, got {}", N, shape_of(other)),
        )),
    }
}

fn encode_matrix(cols: &[f32]) -> Value {
    Value::Array(cols.iter().copied().map(encode_f32).collect())
}

impl Convert for Mat3 {
    const SHAPE: &'static str = "matrix3";

    fn decode(value: &Value, _ctx: &ConvertContext<'_>) -> ConvertResult<Self> {
        decode_matrix::<9>(value, Self::SHAPE).map(|cols| Mat3::from_cols_array(&cols))
    }

    fn encode(&self) -> Value {
        encode_matrix(&self.to_cols_array())
    }
}

impl Convert for Mat4 {
    const SHAPE: &'static str = "matrix4";

    fn decode(value: &Value, _ctx: &ConvertContext<'_>) -> ConvertResult<Self> {
        decode_matrix::<16>(value, Self::SHAPE).map(|cols| Mat4::from_cols_array(&cols))
    }

    fn encode(&self) -> Value {
        encode_matrix(&self.to_cols_array())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ConvertContext<'static> {
        ConvertContext::default()
    }

    #[test]
    fn test_vector_from_object_and_array() {
        let a = Vec3::decode(&json!({"x": 1, "y": 2, "z": 3}), &ctx()).unwrap();
        let b = Vec3::decode(&json!([1, 2, 3]), &ctx()).unwrap();
        assert_eq!(a, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_absent_components_default_to_zero() {
        let v = Vec3::decode(&json!({"y": 5}), &ctx()).unwrap();
        assert_eq!(v, Vec3::new(0.0, 5.0, 0.0));
    }

    #[test]
    fn test_malformed_vector_is_rejected() {
        let err = Vec3::decode(&json!({"x": "one"}), &ctx()).unwrap_err();
        assert_eq!(err.expected, "vector3");
        let err = Vec2::decode(&json!([1, 2, 3]), &ctx()).unwrap_err();
        assert!(err.reason.contains("expected 2 components"));
        assert!(Vec4::decode(&json!(7), &ctx()).is_err());
    }

    #[test]
    fn test_unknown_vector_keys_rejected() {
        let err = Vec3::decode(&json!({"X": 1, "Y": 2}), &ctx()).unwrap_err();
        assert_eq!(err.expected, "vector3");
        assert!(err.reason.contains("`X`"));
        assert!(Vec2::decode(&json!({"x": 1, "z": 2}), &ctx()).is_err());
    }

    #[test]
    fn test_unknown_quaternion_keys_rejected() {
        let err = Quat::decode(&json!({"foo": 1}), &ctx()).unwrap_err();
        assert_eq!(err.expected, "quaternion");
        assert!(Quat::decode(&json!({"yaw": 90, "spin": 1}), &ctx()).is_err());
    }

    #[test]
    fn test_quaternion_euler_matches_components() {
        let from_euler = Quat::decode(&json!({"yaw": 90}), &ctx()).unwrap();
        let expected = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        assert!(from_euler.abs_diff_eq(expected, 1e-5));

        let (roll, pitch, yaw) = quat_to_euler_degrees(from_euler);
        assert!(roll.abs() < 1e-3 && pitch.abs() < 1e-3);
        assert!((yaw - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_quaternion_missing_w_is_identity_component() {
        let q = Quat::decode(&json!({}), &ctx()).unwrap();
        assert_eq!(q, Quat::IDENTITY);
    }

    #[test]
    fn test_quaternion_rejects_mixed_keys() {
        assert!(Quat::decode(&json!({"x": 0, "yaw": 10}), &ctx()).is_err());
    }

    #[test]
    fn test_matrix_flat_array() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let encoded = m.encode();
        assert_eq!(encoded.as_array().map(Vec::len), Some(16));
        assert_eq!(Mat4::decode(&encoded, &ctx()).unwrap(), m);
        assert!(Mat3::decode(&json!([1, 2, 3]), &ctx()).is_err());
    }
}
