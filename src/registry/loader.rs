//! 描述符加载器
//!
//! 从描述符目录（按领域分子目录）加载处理器描述符。
//!
//! 目录结构：
//! ```text
//! config/handlers/
//! ├── backend/
//! │   └── api-designer/
//! │       ├── handler.toml   # [handler] 表：id、kind、能力标签、Schema
//! │       └── persona.md     # 人设说明（可选，仅作文档）
//! └── ...
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use schemars::schema_for;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::registry::{HandlerDescriptor, HandlerRegistry};

pub const DESCRIPTOR_FILE: &str = "handler.toml";
pub const PERSONA_FILE: &str = "persona.md";

#[derive(Debug, Deserialize)]
struct HandlerToml {
    handler: HandlerDescriptor,
}

/// 描述符加载器
pub struct DescriptorLoader {
    root: PathBuf,
}

impl DescriptorLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 递归加载全部 handler.toml，按路径排序以保证注册顺序稳定；目录不存在时返回空
    pub fn load_all(&self) -> anyhow::Result<Vec<HandlerDescriptor>> {
        let mut descriptors = Vec::new();
        if !self.root.exists() {
            tracing::warn!(root = %self.root.display(), "descriptor directory not found");
            return Ok(descriptors);
        }

        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry
                .with_context(|| format!("failed to walk {}", self.root.display()))?;
            if entry.file_type().is_file() && entry.file_name() == DESCRIPTOR_FILE {
                descriptors.push(load_file(entry.path())?);
            }
        }

        tracing::info!("Loaded {} handler descriptors", descriptors.len());
        Ok(descriptors)
    }

    /// 加载并逐个注册；遇到第一个注册错误即停止
    pub fn register_all(&self, registry: &HandlerRegistry) -> anyhow::Result<usize> {
        let descriptors = self.load_all()?;
        let count = descriptors.len();
        for descriptor in descriptors {
            let id = descriptor.id.clone();
            registry
                .register(descriptor)
                .with_context(|| format!("failed to register handler '{id}'"))?;
        }
        Ok(count)
    }
}

/// 读取单个 handler.toml（及同目录 persona.md）
pub fn load_file(path: &Path) -> anyhow::Result<HandlerDescriptor> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: HandlerToml =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    let mut descriptor = parsed.handler;

    if let Some(dir) = path.parent() {
        let persona = dir.join(PERSONA_FILE);
        if persona.exists() {
            descriptor.documentation = Some(
                std::fs::read_to_string(&persona)
                    .with_context(|| format!("failed to read {}", persona.display()))?,
            );
        }
    }

    Ok(descriptor)
}

/// handler.toml 中 `[handler]` 表的 JSON Schema，便于编辑器补全与外部校验
pub fn descriptor_file_schema_json() -> String {
    let schema = schema_for!(HandlerDescriptor);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
