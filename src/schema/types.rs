//! Schema 文档类型
//!
//! 以 `type` 字段区分形状，例如：
//! ```toml
//! [handler.input_schema]
//! type = "object"
//! required = ["value"]
//! properties = { value = { type = "number" } }
//! ```

use std::collections::{BTreeMap, HashSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 声明式 Schema；对象允许未知字段，除非 `closed = true`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schema {
    Object(ObjectSchema),
    Array {
        items: Box<Schema>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_items: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },
    Boolean,
    /// 取值必须是 `values` 之一
    Enum { values: Vec<Value> },
    /// 不做任何约束
    Any,
}

/// 对象形状：字段 schema、必填字段、是否封闭
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ObjectSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, Schema>,
    #[serde(default)]
    pub required: Vec<String>,
    /// 封闭对象不接受 `properties` 之外的字段
    #[serde(default)]
    pub closed: bool,
}

/// Schema 自身不合法（配置错误，注册时报出）
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed schema at {path}: {reason}")]
pub struct SchemaError {
    pub path: String,
    pub reason: String,
}

impl Default for Schema {
    fn default() -> Self {
        Schema::Any
    }
}

impl Schema {
    pub fn object() -> ObjectSchema {
        ObjectSchema::default()
    }

    pub fn array(items: Schema) -> Self {
        Schema::Array {
            items: Box::new(items),
            min_items: None,
            max_items: None,
        }
    }

    pub fn string() -> Self {
        Schema::String {
            min_length: None,
            max_length: None,
        }
    }

    pub fn number() -> Self {
        Schema::Number {
            minimum: None,
            maximum: None,
        }
    }

    pub fn integer() -> Self {
        Schema::Integer {
            minimum: None,
            maximum: None,
        }
    }

    pub fn boolean() -> Self {
        Schema::Boolean
    }

    pub fn any() -> Self {
        Schema::Any
    }

    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Schema::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// 数值区间（仅对 number / integer 生效，其余形状原样返回）
    pub fn between(self, min: Option<f64>, max: Option<f64>) -> Self {
        match self {
            Schema::Number { .. } => Schema::Number {
                minimum: min,
                maximum: max,
            },
            Schema::Integer { .. } => Schema::Integer {
                minimum: min,
                maximum: max,
            },
            other => other,
        }
    }

    /// 自检：必填字段必须已声明、区间有序、枚举非空且不重复
    pub fn check(&self) -> Result<(), SchemaError> {
        self.check_at("$")
    }

    fn check_at(&self, path: &str) -> Result<(), SchemaError> {
        let fail = |reason: String| {
            Err(SchemaError {
                path: path.to_string(),
                reason,
            })
        };

        match self {
            Schema::Object(object) => {
                let mut seen = HashSet::new();
                for name in &object.required {
                    if !object.properties.contains_key(name) {
                        return fail(format!("required field '{name}' is not declared in properties"));
                    }
                    if !seen.insert(name) {
                        return fail(format!("required field '{name}' is listed twice"));
                    }
                }
                for (name, field) in &object.properties {
                    if name.is_empty() {
                        return fail("property name must not be empty".to_string());
                    }
                    field.check_at(&format!("{path}.{name}"))?;
                }
                Ok(())
            }
            Schema::Array {
                items,
                min_items,
                max_items,
            } => {
                if let (Some(min), Some(max)) = (min_items, max_items) {
                    if min > max {
                        return fail(format!("min_items {min} exceeds max_items {max}"));
                    }
                }
                items.check_at(&format!("{path}[]"))
            }
            Schema::String {
                min_length,
                max_length,
            } => match (min_length, max_length) {
                (Some(min), Some(max)) if min > max => {
                    fail(format!("min_length {min} exceeds max_length {max}"))
                }
                _ => Ok(()),
            },
            Schema::Number { minimum, maximum } | Schema::Integer { minimum, maximum } => {
                for bound in [minimum, maximum].into_iter().flatten() {
                    if !bound.is_finite() {
                        return fail(format!("bound {bound} is not finite"));
                    }
                }
                match (minimum, maximum) {
                    (Some(min), Some(max)) if min > max => {
                        fail(format!("minimum {min} exceeds maximum {max}"))
                    }
                    _ => Ok(()),
                }
            }
            Schema::Enum { values } => {
                if values.is_empty() {
                    return fail("enum must list at least one value".to_string());
                }
                for (i, value) in values.iter().enumerate() {
                    if values[..i].contains(value) {
                        return fail(format!("enum value {value} is listed twice"));
                    }
                }
                Ok(())
            }
            Schema::Boolean | Schema::Any => Ok(()),
        }
    }
}

impl ObjectSchema {
    pub fn required(mut self, name: impl Into<String>, schema: Schema) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    pub fn optional(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }
}

impl From<ObjectSchema> for Schema {
    fn from(object: ObjectSchema) -> Self {
        Schema::Object(object)
    }
}
