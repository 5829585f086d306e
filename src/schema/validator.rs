//! Schema 校验器
//!
//! `validate(schema, value)` 为纯函数：不抛错、不修改输入，只收集违规项。
//! 违规路径形如 `$.a.b[2]`。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ObjectSchema, Schema};

/// 校验结果：空列表即通过
pub type ValidationResult = Vec<Violation>;

/// 单条违规：字段路径 + 原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub reason: ViolationReason,
}

/// 违规原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ViolationReason {
    MissingRequired,
    TypeMismatch { expected: String, found: String },
    EnumViolation { allowed: Vec<Value> },
    OutOfRange { detail: String },
    /// 封闭对象中出现了未声明字段
    UnexpectedField,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            ViolationReason::MissingRequired => write!(f, "{}: missing required field", self.path),
            ViolationReason::TypeMismatch { expected, found } => {
                write!(f, "{}: expected {expected}, found {found}", self.path)
            }
            ViolationReason::EnumViolation { allowed } => {
                let allowed: Vec<String> = allowed.iter().map(Value::to_string).collect();
                write!(f, "{}: not one of [{}]", self.path, allowed.join(", "))
            }
            ViolationReason::OutOfRange { detail } => write!(f, "{}: {detail}", self.path),
            ViolationReason::UnexpectedField => write!(f, "{}: unexpected field", self.path),
        }
    }
}

/// 按 schema 校验 value，返回全部违规项
pub fn validate(schema: &Schema, value: &Value) -> ValidationResult {
    let mut violations = Vec::new();
    walk(schema, value, "$", &mut violations);
    violations
}

fn walk(schema: &Schema, value: &Value, path: &str, out: &mut Vec<Violation>) {
    match schema {
        Schema::Any => {}
        Schema::Object(object) => match value {
            Value::Object(map) => walk_object(object, map, path, out),
            other => out.push(mismatch(path, "object", other)),
        },
        Schema::Array {
            items,
            min_items,
            max_items,
        } => match value {
            Value::Array(elements) => {
                check_len(path, "items", elements.len(), *min_items, *max_items, out);
                for (i, element) in elements.iter().enumerate() {
                    walk(items, element, &format!("{path}[{i}]"), out);
                }
            }
            other => out.push(mismatch(path, "array", other)),
        },
        Schema::String {
            min_length,
            max_length,
        } => match value {
            Value::String(s) => {
                check_len(path, "characters", s.chars().count(), *min_length, *max_length, out)
            }
            other => out.push(mismatch(path, "string", other)),
        },
        Schema::Number { minimum, maximum } => match value.as_f64() {
            Some(n) => check_range(path, n, *minimum, *maximum, out),
            None => out.push(mismatch(path, "number", value)),
        },
        Schema::Integer { minimum, maximum } => match value.as_f64() {
            Some(n) if n.fract() == 0.0 => check_range(path, n, *minimum, *maximum, out),
            _ => out.push(mismatch(path, "integer", value)),
        },
        Schema::Boolean => {
            if !value.is_boolean() {
                out.push(mismatch(path, "boolean", value));
            }
        }
        Schema::Enum { values } => {
            if !values.contains(value) {
                out.push(Violation {
                    path: path.to_string(),
                    reason: ViolationReason::EnumViolation {
                        allowed: values.clone(),
                    },
                });
            }
        }
    }
}

fn walk_object(
    object: &ObjectSchema,
    map: &serde_json::Map<String, Value>,
    path: &str,
    out: &mut Vec<Violation>,
) {
    for name in &object.required {
        if !map.contains_key(name) {
            out.push(Violation {
                path: format!("{path}.{name}"),
                reason: ViolationReason::MissingRequired,
            });
        }
    }

    for (name, field) in map {
        let field_path = format!("{path}.{name}");
        match object.properties.get(name) {
            Some(field_schema) => walk(field_schema, field, &field_path, out),
            None if object.closed => out.push(Violation {
                path: field_path,
                reason: ViolationReason::UnexpectedField,
            }),
            None => {}
        }
    }
}

fn check_len(
    path: &str,
    unit: &str,
    len: usize,
    min: Option<usize>,
    max: Option<usize>,
    out: &mut Vec<Violation>,
) {
    let detail = match (min, max) {
        (Some(min), _) if len < min => format!("{len} {unit}, at least {min} required"),
        (_, Some(max)) if len > max => format!("{len} {unit}, at most {max} allowed"),
        _ => return,
    };
    out.push(Violation {
        path: path.to_string(),
        reason: ViolationReason::OutOfRange { detail },
    });
}

fn check_range(path: &str, n: f64, min: Option<f64>, max: Option<f64>, out: &mut Vec<Violation>) {
    let detail = match (min, max) {
        (Some(min), _) if n < min => format!("{n} is below minimum {min}"),
        (_, Some(max)) if n > max => format!("{n} is above maximum {max}"),
        _ => return,
    };
    out.push(Violation {
        path: path.to_string(),
        reason: ViolationReason::OutOfRange { detail },
    });
}

fn mismatch(path: &str, expected: &str, found: &Value) -> Violation {
    Violation {
        path: path.to_string(),
        reason: ViolationReason::TypeMismatch {
            expected: expected.to_string(),
            found: type_name(found).to_string(),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
