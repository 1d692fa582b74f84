//! 核心宏定义
//!
//! 提供统一的宏来减少代码重复

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```ignore
/// struct MyStruct {
///     field1: u32,
///     field2: String,
/// }
///
/// impl_default!(MyStruct {
///     field1: 0,
///     field2: String::new(),
/// });
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}

/// 同时实现Default和new()的宏
#[macro_export]
macro_rules! impl_default_and_new {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }

        impl $struct_name {
            pub fn new() -> Self {
                Self::default()
            }
        }
    };
}

/// 为结构体生成访问器字段表
///
/// 每个条目把路径中使用的成员名映射到结构体字段，字段类型必须实现
/// `Reflect`。JSON 编码包含全部成员，解码只更新出现的键。
///
/// 使用示例:
/// ```ignore
/// struct Light {
///     color: Color,
///     intensity: f32,
/// }
///
/// impl_reflect!(Light {
///     "color" => color,
///     "intensity" => intensity,
/// });
/// ```
#[macro_export]
macro_rules! impl_reflect {
    ($ty:ident {
        $($name:literal => $field:ident),* $(,)?
    }) => {
        impl $crate::accessor::Reflect for $ty {
            fn type_name(&self) -> &'static str {
                stringify!($ty)
            }

            fn to_json(&self) -> $crate::JsonValue {
                $crate::accessor::reflect::members_to_json(self)
            }

            fn set_json(
                &mut self,
                value: &$crate::JsonValue,
                ctx: &$crate::convert::ConvertContext<'_>,
            ) -> $crate::core::ConvertResult<()> {
                $crate::accessor::reflect::set_members(self, value, ctx)
            }

            #[allow(unused_variables)]
            fn member(&self, name: &str) -> Option<&dyn $crate::accessor::Reflect> {
                $(
                    if name == $name {
                        return Some(&self.$field);
                    }
                )*
                None
            }

            #[allow(unused_variables)]
            fn member_mut(&mut self, name: &str) -> Option<&mut dyn $crate::accessor::Reflect> {
                $(
                    if name == $name {
                        return Some(&mut self.$field);
                    }
                )*
                None
            }

            fn member_names(&self) -> Vec<String> {
                vec![$($name.to_string()),*]
            }
        }
    };
}
