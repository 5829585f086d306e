//! 步骤快照
//!
//! 每个步骤结束时写一条 StepSnapshot，供审计 / 崩溃排查；运行期间只写不读。
//! 写入失败只记 warn，不影响运行（至多一次）。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::workflow::types::StepResult;

/// 一条步骤快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub run_id: String,
    pub process_id: String,
    pub recorded_at: DateTime<Utc>,
    pub result: StepResult,
}

/// 快照接收端
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn record(&self, snapshot: &StepSnapshot) -> anyhow::Result<()>;
}

/// 追加写 JSONL 文件
pub struct JsonlSnapshotSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlSnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotSink for JsonlSnapshotSink {
    async fn record(&self, snapshot: &StepSnapshot) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(snapshot)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// 内存快照，测试与嵌入场景使用
#[derive(Default)]
pub struct MemorySnapshotSink {
    records: Mutex<Vec<StepSnapshot>>,
}

impl MemorySnapshotSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StepSnapshot> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SnapshotSink for MemorySnapshotSink {
    async fn record(&self, snapshot: &StepSnapshot) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(snapshot.clone());
        Ok(())
    }
}
