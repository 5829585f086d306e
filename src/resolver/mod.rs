//! 处理器解析
//!
//! 按 id 直接查找，或按能力标签查询；多个候选时依次应用：
//! 1. 请求声明了 kind 则优先该 kind；
//! 2. 只剩一个候选即选中；
//! 3. 否则返回 AmbiguousCapability（列出全部候选），绝不静默挑选。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::ResolutionError;
use crate::registry::{HandlerDescriptor, HandlerKind, HandlerRegistry};

/// 处理器选择方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerSelector {
    /// 指定处理器 id
    #[serde(rename = "handler")]
    Id(String),
    /// 需要同时具备的能力标签
    #[serde(rename = "capabilities")]
    Capabilities(Vec<String>),
}

/// 任务请求：可选的 kind + 选择方式
///
/// TOML 形式：`request = { handler = "formatter" }` 或
/// `request = { capabilities = ["code.review"], kind = "agent" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<HandlerKind>,
    #[serde(flatten)]
    pub selector: HandlerSelector,
}

impl TaskRequest {
    pub fn handler(id: impl Into<String>) -> Self {
        Self {
            kind: None,
            selector: HandlerSelector::Id(id.into()),
        }
    }

    pub fn capabilities<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: None,
            selector: HandlerSelector::Capabilities(tags.into_iter().map(Into::into).collect()),
        }
    }

    pub fn of_kind(mut self, kind: HandlerKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// 解析器：每次解析基于同一份注册表快照
#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Arc<HandlerRegistry>,
}

impl Resolver {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn resolve(&self, request: &TaskRequest) -> Result<Arc<HandlerDescriptor>, ResolutionError> {
        let snapshot = self.registry.snapshot();

        match &request.selector {
            HandlerSelector::Id(id) => {
                let descriptor = snapshot
                    .get(id)
                    .ok_or_else(|| ResolutionError::HandlerNotFound(id.clone()))?;
                match request.kind {
                    Some(expected) if expected != descriptor.kind => {
                        Err(ResolutionError::KindMismatch {
                            id: id.clone(),
                            expected,
                            actual: descriptor.kind,
                        })
                    }
                    _ => Ok(descriptor),
                }
            }
            HandlerSelector::Capabilities(tags) => {
                let mut candidates = if tags.is_empty() {
                    Vec::new()
                } else {
                    snapshot.matching_all(tags)
                };
                if candidates.is_empty() {
                    return Err(ResolutionError::NoCapabilityMatch { tags: tags.clone() });
                }

                if let Some(kind) = request.kind {
                    let preferred: Vec<_> = candidates
                        .iter()
                        .filter(|d| d.kind == kind)
                        .cloned()
                        .collect();
                    if !preferred.is_empty() {
                        candidates = preferred;
                    }
                }

                if candidates.len() == 1 {
                    return Ok(candidates.remove(0));
                }

                Err(ResolutionError::AmbiguousCapability {
                    tags: tags.clone(),
                    candidates: candidates.iter().map(|d| d.id.clone()).collect(),
                })
            }
        }
    }
}
