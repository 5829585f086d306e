//! 执行上下文
//!
//! 单次运行独占：步骤 id → 已校验输出，加上运行 id、开始时间与初始输入。
//! 每个步骤至多写入一次。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::types::INPUT_REF;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    input: Value,
    outputs: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(input: Value) -> Self {
        Self {
            run_id: format!("run_{}", uuid::Uuid::new_v4()),
            started_at: Utc::now(),
            input,
            outputs: HashMap::new(),
        }
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    /// 写入步骤输出；已存在时保持原值并返回 false
    pub fn record(&mut self, step_id: &str, output: Value) -> bool {
        if self.outputs.contains_key(step_id) {
            tracing::warn!(run_id = %self.run_id, step_id, "step output already recorded, ignoring");
            return false;
        }
        self.outputs.insert(step_id.to_string(), output);
        true
    }

    /// 按引用名取值：`input` 指向初始上下文
    pub fn get(&self, name: &str) -> Option<&Value> {
        if name == INPUT_REF {
            Some(&self.input)
        } else {
            self.outputs.get(name)
        }
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.outputs.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
