//! 处理器描述符
//!
//! 描述一个技能（Skill）或智能体（Agent）的身份与契约：能力标签、输入 / 输出 Schema、
//! 所参与的流程。人设文本（persona）只作文档，从不参与解析。

use std::collections::BTreeSet;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::DescriptorError;
use crate::schema::Schema;

/// 处理器种类，注册后不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Skill,
    Agent,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::Skill => f.write_str("skill"),
            HandlerKind::Agent => f.write_str("agent"),
        }
    }
}

/// 处理器描述符（handler.toml 中的 `[handler]` 表）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HandlerDescriptor {
    /// 全局唯一标识，跨运行稳定
    pub id: String,
    pub kind: HandlerKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 能力标签：按标签解析处理器的唯一依据
    #[serde(default)]
    pub capability_tags: BTreeSet<String>,
    #[serde(default)]
    pub input_schema: Schema,
    #[serde(default)]
    pub output_schema: Schema,
    /// 参与的流程（仅用于发现，调用时不强制）
    #[serde(default)]
    pub target_processes: BTreeSet<String>,
    /// 相关处理器，仅供人工参考，不做自动替换
    #[serde(default)]
    pub related_handlers: Vec<String>,
    /// 人设 / 说明文档（persona.md）
    #[serde(skip)]
    pub documentation: Option<String>,
}

impl HandlerDescriptor {
    pub fn new(id: impl Into<String>, kind: HandlerKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            description: String::new(),
            capability_tags: BTreeSet::new(),
            input_schema: Schema::Any,
            output_schema: Schema::Any,
            target_processes: BTreeSet::new(),
            related_handlers: Vec::new(),
            documentation: None,
        }
    }

    pub fn skill(id: impl Into<String>) -> Self {
        Self::new(id, HandlerKind::Skill)
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self::new(id, HandlerKind::Agent)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capability_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_input(mut self, schema: impl Into<Schema>) -> Self {
        self.input_schema = schema.into();
        self
    }

    pub fn with_output(mut self, schema: impl Into<Schema>) -> Self {
        self.output_schema = schema.into();
        self
    }

    pub fn for_process(mut self, process_id: impl Into<String>) -> Self {
        self.target_processes.insert(process_id.into());
        self
    }

    pub fn related_to(mut self, handler_id: impl Into<String>) -> Self {
        self.related_handlers.push(handler_id.into());
        self
    }

    /// 是否具备全部给定能力
    pub fn has_capabilities<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter()
            .all(|tag| self.capability_tags.contains(tag.as_ref()))
    }

    /// 注册前自检：id 非空、至少一个能力标签、Schema 合法
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let invalid = |reason: String| DescriptorError::InvalidDescriptor {
            id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty".to_string()));
        }
        if self.capability_tags.is_empty() {
            return Err(invalid("capability_tags must not be empty".to_string()));
        }
        if self.capability_tags.iter().any(|tag| tag.trim().is_empty()) {
            return Err(invalid("capability tags must not be blank".to_string()));
        }
        self.input_schema
            .check()
            .map_err(|e| invalid(format!("input_schema: {e}")))?;
        self.output_schema
            .check()
            .map_err(|e| invalid(format!("output_schema: {e}")))?;
        Ok(())
    }

    /// 简短摘要，供列表展示
    pub fn summary(&self) -> String {
        let tags: Vec<&str> = self.capability_tags.iter().map(String::as_str).collect();
        format!("[{}] {} ({}): {}", self.kind, self.id, tags.join(", "), self.description)
    }
}
