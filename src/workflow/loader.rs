//! 流程定义加载器
//!
//! 读取流程目录下的 `*.toml`，每个文件一个 `[process]` 表：
//! ```toml
//! [process]
//! id = "code-review"
//!
//! [[process.steps]]
//! id = "lint"
//! request = { capabilities = ["code.lint"] }
//! context = { source = "${input.source}" }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::workflow::types::ProcessDefinition;

#[derive(Debug, Deserialize)]
struct ProcessToml {
    process: ProcessDefinition,
}

/// 流程定义加载器
pub struct ProcessLoader {
    root: PathBuf,
}

impl ProcessLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 加载目录下全部流程，按文件名排序；流程 id 重复视为错误
    pub fn load_all(&self) -> anyhow::Result<Vec<ProcessDefinition>> {
        let mut processes = Vec::new();
        if !self.root.exists() {
            tracing::warn!(root = %self.root.display(), "process directory not found");
            return Ok(processes);
        }

        let mut seen = HashSet::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.with_context(|| format!("failed to walk {}", self.root.display()))?;
            let is_toml = entry.path().extension().is_some_and(|ext| ext == "toml");
            if !entry.file_type().is_file() || !is_toml {
                continue;
            }
            let process = load_process_file(entry.path())?;
            if !seen.insert(process.id.clone()) {
                anyhow::bail!(
                    "duplicate process id '{}' in {}",
                    process.id,
                    entry.path().display()
                );
            }
            processes.push(process);
        }

        tracing::info!("Loaded {} process definitions", processes.len());
        Ok(processes)
    }
}

/// 读取单个流程文件
pub fn load_process_file(path: &Path) -> anyhow::Result<ProcessDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: ProcessToml =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    let mut process = parsed.process;
    if process.name.is_empty() {
        process.name = process.id.clone();
    }
    Ok(process)
}
