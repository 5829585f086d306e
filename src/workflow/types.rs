//! 流程类型定义
//!
//! 定义流程、步骤、失败策略、运行与步骤结果等核心数据类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::StepError;
use crate::resolver::TaskRequest;

pub type ProcessId = String;
pub type StepId = String;

/// 运行初始上下文的保留引用名：`${input.xxx}`
pub const INPUT_REF: &str = "input";

/// 步骤失败策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// 跳过所有未开始的后继步骤，整个运行失败
    #[default]
    Abort,
    /// 仅跳过本步骤；依赖本步骤输出的步骤随之跳过，无关分支继续
    Skip,
    /// 以空对象 `{}` 作为本步骤输出继续执行
    Continue,
}

/// 流程中的一个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// 步骤ID（流程内唯一）
    pub id: StepId,
    /// 处理器选择
    pub request: TaskRequest,
    /// 上下文模板，可包含 `${step}` / `${step.path}` 引用
    #[serde(default = "empty_object")]
    pub context: Value,
    /// 显式依赖；模板引用会自动补充
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<StepId>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// 覆盖流程级超时
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// 覆盖执行器级重试次数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl StepSpec {
    pub fn new(id: impl Into<StepId>, request: TaskRequest) -> Self {
        Self {
            id: id.into(),
            request,
            context: empty_object(),
            depends_on: Vec::new(),
            on_failure: FailurePolicy::Abort,
            timeout_secs: None,
            max_retries: None,
        }
    }
}

/// 流程定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// 流程唯一标识
    pub id: ProcessId,
    /// 流程名称
    #[serde(default)]
    pub name: String,
    /// 流程描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 按声明顺序排列的步骤
    pub steps: Vec<StepSpec>,
    /// 流程默认单次调用超时
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ProcessDefinition {
    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// 已创建，尚未开始调度
    Pending,
    /// 正在执行
    Running,
    /// 全部步骤成功或非中止性跳过
    Succeeded,
    /// 执行失败
    Failed,
    /// 已取消
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// 步骤终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

/// 步骤被跳过的原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// 本步骤失败，按 Skip / Continue 策略处理
    OwnFailure { error: StepError },
    /// 上游按 Abort 策略失败
    UpstreamFailed { step: StepId },
    /// 上游没有可替换的输出
    UpstreamUnavailable { step: StepId },
    /// 运行被取消，步骤未开始
    RunCancelled,
}

impl SkipReason {
    /// 中止性跳过会使运行失败
    pub fn is_aborting(&self) -> bool {
        matches!(self, SkipReason::UpstreamFailed { .. })
    }
}

/// 单个步骤的最终结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: StepId,
    pub status: StepStatus,
    /// 仅 Succeeded 时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// 仅 Failed 时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// 实际调用次数（解析失败时为 0）
    pub attempts: u32,
    /// 解析到的处理器
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl StepResult {
    pub fn succeeded(step_id: impl Into<StepId>, output: Value, attempts: u32, handler: String) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Succeeded,
            output: Some(output),
            error: None,
            skip_reason: None,
            attempts,
            handler: Some(handler),
        }
    }

    pub fn failed(
        step_id: impl Into<StepId>,
        error: StepError,
        attempts: u32,
        handler: Option<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            skip_reason: None,
            attempts,
            handler,
        }
    }

    pub fn skipped(step_id: impl Into<StepId>, reason: SkipReason) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            output: None,
            error: None,
            skip_reason: Some(reason),
            attempts: 0,
            handler: None,
        }
    }

    pub fn cancelled(step_id: impl Into<StepId>, attempts: u32, handler: Option<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Cancelled,
            output: None,
            error: None,
            skip_reason: None,
            attempts,
            handler,
        }
    }
}

/// 一次运行的最终结果：每个步骤一条记录（按声明顺序）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub run_id: String,
    pub process_id: ProcessId,
    pub status: RunStatus,
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProcessResult {
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == id)
    }

    pub fn output(&self, id: &str) -> Option<&Value> {
        self.step(id).and_then(|s| s.output.as_ref())
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_from_toml_defaults() {
        let step: StepSpec = toml::from_str(
            r#"
id = "review"
request = { capabilities = ["code.review"] }
"#,
        )
        .unwrap();
        assert_eq!(step.on_failure, FailurePolicy::Abort);
        assert_eq!(step.context, json!({}));
        assert!(step.depends_on.is_empty());
    }

    #[test]
    fn test_skip_reason_serialization() {
        let reason = SkipReason::UpstreamUnavailable { step: "a".into() };
        assert_eq!(
            serde_json::to_value(&reason).unwrap(),
            json!({"reason": "upstream_unavailable", "step": "a"})
        );
        assert!(!reason.is_aborting());
        assert!(SkipReason::UpstreamFailed { step: "a".into() }.is_aborting());
    }
}
