//! 调用边界
//!
//! 包裹一次处理器调用：输入校验 → 在超时与取消令牌下执行 → 输出校验 → 归一化错误；
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::{ContractError, HandlerExecutionError, InvocationError};
use crate::invocation::{FailureClass, HandlerError, HandlerSet};
use crate::registry::HandlerDescriptor;
use crate::schema::validate;

const PAYLOAD_PREVIEW_CHARS: usize = 200;

/// 调用边界：持有处理器实现集合，本身无状态
#[derive(Clone)]
pub struct InvocationBoundary {
    handlers: Arc<HandlerSet>,
}

impl InvocationBoundary {
    pub fn new(handlers: Arc<HandlerSet>) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &Arc<HandlerSet> {
        &self.handlers
    }

    /// 调用处理器；输入不合法时实现不会被调用
    pub async fn invoke(
        &self,
        descriptor: &HandlerDescriptor,
        payload: &Value,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, InvocationError> {
        let start = Instant::now();
        let result = self.invoke_inner(descriptor, payload, limit, cancel).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(InvocationError::Contract(ContractError::InputValidation { .. })) => "input_rejected",
            Err(InvocationError::Contract(ContractError::OutputContractViolation { .. })) => {
                "output_rejected"
            }
            Err(InvocationError::Execution(HandlerExecutionError::Retryable { .. })) => "retryable",
            Err(InvocationError::Execution(HandlerExecutionError::Fatal { .. })) => "fatal",
            Err(InvocationError::TimedOut { .. }) => "timeout",
            Err(InvocationError::Cancelled) => "cancelled",
        };
        let audit = serde_json::json!({
            "event": "handler_audit",
            "handler": descriptor.id,
            "kind": descriptor.kind,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "payload_preview": payload_preview(payload),
        });
        tracing::info!(audit = %audit.to_string(), "handler");

        result
    }

    async fn invoke_inner(
        &self,
        descriptor: &HandlerDescriptor,
        payload: &Value,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, InvocationError> {
        let violations = validate(&descriptor.input_schema, payload);
        if !violations.is_empty() {
            return Err(ContractError::InputValidation {
                handler: descriptor.id.clone(),
                violations,
            }
            .into());
        }

        let handler = self.handlers.get(&descriptor.id).ok_or_else(|| {
            HandlerExecutionError::Fatal {
                handler: descriptor.id.clone(),
                message: "no implementation bound to this handler".to_string(),
            }
        })?;

        if cancel.is_cancelled() {
            return Err(InvocationError::Cancelled);
        }

        let value = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InvocationError::Cancelled),
            settled = timeout(limit, handler.invoke(payload.clone(), cancel.child_token())) => {
                match settled {
                    Ok(Ok(value)) => value,
                    Ok(Err(err)) => return Err(classify(&descriptor.id, err).into()),
                    Err(_) => {
                        return Err(InvocationError::TimedOut {
                            handler: descriptor.id.clone(),
                            after_ms: limit.as_millis() as u64,
                        })
                    }
                }
            }
        };

        let violations = validate(&descriptor.output_schema, &value);
        if !violations.is_empty() {
            return Err(ContractError::OutputContractViolation {
                handler: descriptor.id.clone(),
                violations,
            }
            .into());
        }

        Ok(value)
    }
}

fn classify(handler: &str, err: HandlerError) -> HandlerExecutionError {
    match err.class {
        Some(FailureClass::Retryable) => HandlerExecutionError::Retryable {
            handler: handler.to_string(),
            message: err.message,
        },
        Some(FailureClass::Fatal) | None => HandlerExecutionError::Fatal {
            handler: handler.to_string(),
            message: err.message,
        },
    }
}

fn payload_preview(payload: &Value) -> String {
    let s = payload.to_string();
    if s.chars().count() > PAYLOAD_PREVIEW_CHARS {
        format!("{}...", s.chars().take(PAYLOAD_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
