//! 错误分类
//!
//! 注册期（DescriptorError）与启动期（ProcessStructureError）错误同步返回，不会部分生效；
//! 调用期错误（解析 / 契约 / 执行 / 超时）收敛为 StepError，写入对应 StepResult。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::HandlerKind;
use crate::schema::Violation;

/// 注册表写入失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("Duplicate handler id: {0}")]
    DuplicateId(String),

    #[error("Invalid descriptor '{id}': {reason}")]
    InvalidDescriptor { id: String, reason: String },

    #[error("Handler not registered: {0}")]
    NotRegistered(String),
}

/// 无法为请求找到唯一处理器
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResolutionError {
    #[error("Handler not found: {0}")]
    HandlerNotFound(String),

    #[error("Handler '{id}' is a {actual}, request asked for a {expected}")]
    KindMismatch {
        id: String,
        expected: HandlerKind,
        actual: HandlerKind,
    },

    /// 多个处理器同样满足，拒绝静默选择
    #[error("Ambiguous capability [{}]: candidates {}", .tags.join(", "), .candidates.join(", "))]
    AmbiguousCapability {
        tags: Vec<String>,
        candidates: Vec<String>,
    },

    #[error("No handler matches capability [{}]", .tags.join(", "))]
    NoCapabilityMatch { tags: Vec<String> },
}

/// 输入 / 输出契约不满足
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContractError {
    #[error("Input rejected by '{handler}': {}", render(.violations))]
    InputValidation {
        handler: String,
        violations: Vec<Violation>,
    },

    #[error("Output of '{handler}' violates its contract: {}", render(.violations))]
    OutputContractViolation {
        handler: String,
        violations: Vec<Violation>,
    },
}

impl ContractError {
    pub fn violations(&self) -> &[Violation] {
        match self {
            ContractError::InputValidation { violations, .. }
            | ContractError::OutputContractViolation { violations, .. } => violations,
        }
    }
}

/// 处理器自身报错；未分类时按 Fatal 处理
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HandlerExecutionError {
    #[error("Handler '{handler}' failed (retryable): {message}")]
    Retryable { handler: String, message: String },

    #[error("Handler '{handler}' failed: {message}")]
    Fatal { handler: String, message: String },
}

/// 单次调用边界的失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvocationError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Execution(#[from] HandlerExecutionError),

    #[error("Handler '{handler}' timed out after {after_ms}ms")]
    TimedOut { handler: String, after_ms: u64 },

    #[error("Invocation cancelled")]
    Cancelled,
}

impl InvocationError {
    /// 超时与 Retryable 可重试；契约错误、Fatal、取消都不重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InvocationError::Execution(HandlerExecutionError::Retryable { .. })
                | InvocationError::TimedOut { .. }
        )
    }
}

/// 步骤最终错误（随 ProcessResult 汇报）
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Execution(#[from] HandlerExecutionError),

    #[error("Handler '{handler}' timed out after {after_ms}ms")]
    TimedOut { handler: String, after_ms: u64 },
}

impl StepError {
    /// 稳定的错误种类名，用于日志与快照
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::Resolution(ResolutionError::HandlerNotFound(_)) => "handler_not_found",
            StepError::Resolution(ResolutionError::KindMismatch { .. }) => "kind_mismatch",
            StepError::Resolution(ResolutionError::AmbiguousCapability { .. }) => {
                "ambiguous_capability"
            }
            StepError::Resolution(ResolutionError::NoCapabilityMatch { .. }) => {
                "no_capability_match"
            }
            StepError::Contract(ContractError::InputValidation { .. }) => "input_validation",
            StepError::Contract(ContractError::OutputContractViolation { .. }) => {
                "output_contract_violation"
            }
            StepError::Execution(HandlerExecutionError::Retryable { .. }) => "retryable",
            StepError::Execution(HandlerExecutionError::Fatal { .. }) => "fatal",
            StepError::TimedOut { .. } => "timed_out",
        }
    }
}

/// 流程结构错误：启动前发现，任何处理器都不会被调用
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessStructureError {
    #[error("Process '{0}' has no steps")]
    EmptyProcess(String),

    #[error("Duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("Step id '{0}' is reserved for the run input")]
    ReservedStepId(String),

    #[error("Step id '{0}' may only contain letters, digits, '_' and '-'")]
    InvalidStepId(String),

    #[error("Step '{step}' references unknown step '{reference}'")]
    UnknownStepReference { step: String, reference: String },

    #[error("Step '{step}' references later step '{reference}' without listing it in depends_on")]
    ForwardReference { step: String, reference: String },

    #[error("Cyclic dependency: {}", .steps.join(" -> "))]
    CyclicDependency { steps: Vec<String> },
}

/// 运行句柄层面的失败
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Structure(#[from] ProcessStructureError),

    #[error("Run {run_id} terminated abnormally: {reason}")]
    Aborted { run_id: String, reason: String },
}

fn render(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
