//! 处理器实现
//!
//! 每个不透明实现都实现 Handler trait（id / invoke），由 HandlerSet 按 id 绑定；
//! 描述符负责契约，实现只负责「给定已校验的输入，返回结果或分类后的错误」。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// 失败分类：由实现方给出，未分类按 Fatal 处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 暂时性失败（网络抖动、限流等），可重试
    Retryable,
    /// 请求本身不可处理，重试无意义
    Fatal,
}

/// 处理器返回的错误
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub class: Option<FailureClass>,
}

impl HandlerError {
    /// 未分类错误
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: None,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: Some(FailureClass::Retryable),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: Some(FailureClass::Fatal),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class == Some(FailureClass::Retryable)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::new(format!("{err:#}"))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::new(message)
    }
}

/// 处理器 trait：id 与描述符 id 对应；invoke 收到的 payload 已通过输入校验
#[async_trait]
pub trait Handler: Send + Sync {
    fn id(&self) -> &str;

    /// 执行；长时间运行的实现应观察 cancel 并尽早返回
    async fn invoke(&self, payload: Value, cancel: CancellationToken) -> Result<Value, HandlerError>;
}

/// 以闭包实现的处理器，适合轻量技能与测试
pub struct FnHandler<F> {
    id: String,
    f: F,
}

/// 用闭包构造处理器
pub fn handler_fn<F, Fut>(id: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    FnHandler { id: id.into(), f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, payload: Value, _cancel: CancellationToken) -> Result<Value, HandlerError> {
        (self.f)(payload).await
    }
}

/// 处理器实现集合：按 id 存储 Arc<dyn Handler>
#[derive(Default)]
pub struct HandlerSet {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定实现；同 id 的旧实现被替换
    pub fn register(&mut self, handler: impl Handler + 'static) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn Handler>) {
        let id = handler.id().to_string();
        if self.handlers.insert(id.clone(), handler).is_some() {
            tracing::warn!(handler = %id, "handler implementation replaced");
        }
    }

    pub fn with(mut self, handler: impl Handler + 'static) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_handler_invokes_closure() {
        let handler = handler_fn("double", |payload: Value| async move {
            let n = payload["n"].as_i64().ok_or_else(|| HandlerError::fatal("n missing"))?;
            Ok::<_, HandlerError>(json!({ "n": n * 2 }))
        });
        let out = handler
            .invoke(json!({"n": 21}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, json!({"n": 42}));
    }

    #[test]
    fn test_error_classification_defaults() {
        assert_eq!(HandlerError::new("x").class, None);
        assert!(HandlerError::retryable("x").is_retryable());
        assert!(!HandlerError::fatal("x").is_retryable());
        assert_eq!(HandlerError::from(anyhow::anyhow!("boom")).message, "boom");
    }

    #[test]
    fn test_error_displays_message() {
        let err = HandlerError::retryable("rate limited");
        assert_eq!(err.to_string(), "rate limited");
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert_eq!(boxed.to_string(), "rate limited");
    }

    #[test]
    fn test_handler_set_lookup() {
        let set = HandlerSet::new()
            .with(handler_fn("a", |v: Value| async move { Ok(v) }))
            .with(handler_fn("b", |v: Value| async move { Ok(v) }));
        assert_eq!(set.ids(), vec!["a", "b"]);
        assert!(set.get("a").is_some());
        assert!(set.get("c").is_none());
    }
}
