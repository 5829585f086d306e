//! 上下文模板
//!
//! 整个字符串恰为 `${ref}` 时才是引用，`ref` 为 `step` 或 `step.a.b.0`（数字段索引数组）。
//! 替换是对 JSON 树的纯遍历，不做字符串插值：引用值原样（保留类型）放入。
//! 引用无值时，对象字段被省略，数组元素变为 null。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::context::ExecutionContext;

/// 一处模板引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub step: String,
    pub path: Vec<String>,
}

fn reference_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\$\{([A-Za-z0-9_\-]+)((?:\.[A-Za-z0-9_\-]+)*)\}$").ok())
        .as_ref()
}

fn step_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]+$").ok())
        .as_ref()
}

/// 步骤 id 是否可被引用：仅字母、数字、`_`、`-`
pub fn is_referenceable(step_id: &str) -> bool {
    step_id_pattern().is_some_and(|re| re.is_match(step_id))
}

impl Reference {
    /// 解析整串引用；普通字符串返回 None
    pub fn parse(s: &str) -> Option<Self> {
        let caps = reference_pattern()?.captures(s)?;
        let step = caps.get(1)?.as_str().to_string();
        let path = caps
            .get(2)
            .map(|m| {
                m.as_str()
                    .split('.')
                    .filter(|seg| !seg.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Some(Self { step, path })
    }
}

/// 收集模板中的全部引用（按出现顺序，含重复）
pub fn references(template: &Value) -> Vec<Reference> {
    let mut out = Vec::new();
    collect(template, &mut out);
    out
}

/// 形如 `${...}` 却无法解析的整串（返回花括号内文本）
pub fn malformed_references(template: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_malformed(template, &mut out);
    out
}

fn collect_malformed(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if let Some(inner) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                if Reference::parse(s).is_none() {
                    out.push(inner.to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_malformed(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_malformed(v, out)),
        _ => {}
    }
}

fn collect(value: &Value, out: &mut Vec<Reference>) {
    match value {
        Value::String(s) => {
            if let Some(r) = Reference::parse(s) {
                out.push(r);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect(v, out)),
        _ => {}
    }
}

/// 用上下文中的输出替换模板引用
pub fn render(template: &Value, ctx: &ExecutionContext) -> Value {
    substitute(template, ctx).unwrap_or(Value::Null)
}

fn substitute(value: &Value, ctx: &ExecutionContext) -> Option<Value> {
    match value {
        Value::String(s) => match Reference::parse(s) {
            Some(r) => lookup(&r, ctx).cloned(),
            None => Some(value.clone()),
        },
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .map(|v| substitute(v, ctx).unwrap_or(Value::Null))
                .collect(),
        )),
        Value::Object(map) => {
            let mut rendered = Map::new();
            for (key, v) in map {
                if let Some(v) = substitute(v, ctx) {
                    rendered.insert(key.clone(), v);
                }
            }
            Some(Value::Object(rendered))
        }
        _ => Some(value.clone()),
    }
}

fn lookup<'a>(reference: &Reference, ctx: &'a ExecutionContext) -> Option<&'a Value> {
    let root = ctx.get(&reference.step)?;
    resolve_path(root, &reference.path)
}

/// 沿路径取值；数字段在数组上作为下标
pub fn resolve_path<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |current, seg| match current {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
