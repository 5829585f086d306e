//! 流程构建器
//!
//! 提供流畅的API来构建流程定义

use serde_json::Value;

use crate::core::ProcessStructureError;
use crate::resolver::TaskRequest;
use crate::workflow::graph::DependencyGraph;
use crate::workflow::types::*;

/// 流程构建器
pub struct ProcessBuilder {
    id: ProcessId,
    name: String,
    description: Option<String>,
    timeout_secs: Option<u64>,
    steps: Vec<StepSpec>,
}

impl ProcessBuilder {
    /// 创建新的流程构建器
    pub fn new(id: impl Into<ProcessId>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            timeout_secs: None,
            steps: Vec::new(),
        }
    }

    /// 设置名称
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 设置描述
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// 设置流程默认超时
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// 添加步骤
    pub fn step(mut self, id: impl Into<StepId>, request: TaskRequest, context: Value) -> Self {
        let mut step = StepSpec::new(id, request);
        step.context = context;
        self.steps.push(step);
        self
    }

    /// 添加完整的步骤定义
    pub fn push(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    /// 设置显式依赖
    pub fn depends_on<I, S>(mut self, step_id: &str, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        if let Some(step) = self.step_mut(step_id) {
            step.depends_on = deps.into_iter().map(Into::into).collect();
        }
        self
    }

    /// 设置失败策略
    pub fn on_failure(mut self, step_id: &str, policy: FailurePolicy) -> Self {
        if let Some(step) = self.step_mut(step_id) {
            step.on_failure = policy;
        }
        self
    }

    /// 设置步骤超时
    pub fn step_timeout(mut self, step_id: &str, secs: u64) -> Self {
        if let Some(step) = self.step_mut(step_id) {
            step.timeout_secs = Some(secs);
        }
        self
    }

    /// 设置步骤重试次数
    pub fn step_retries(mut self, step_id: &str, retries: u32) -> Self {
        if let Some(step) = self.step_mut(step_id) {
            step.max_retries = Some(retries);
        }
        self
    }

    fn step_mut(&mut self, step_id: &str) -> Option<&mut StepSpec> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    /// 构建流程，并做一次结构校验
    pub fn build(self) -> Result<ProcessDefinition, ProcessStructureError> {
        let def = ProcessDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            steps: self.steps,
            timeout_secs: self.timeout_secs,
        };
        DependencyGraph::build(&def)?;
        Ok(def)
    }
}
