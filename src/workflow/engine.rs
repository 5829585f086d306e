//! 流程执行引擎
//!
//! 每次运行由一个驱动任务推进：按声明顺序准入就绪步骤，各自 spawn 后放入 FuturesUnordered，
//! 任一步骤结束即被唤醒，按失败策略结算后再次准入。
//! 步骤输出先写入执行上下文，依赖它的步骤才会被准入。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, ExecutorSection};
use crate::core::{
    HandlerExecutionError, InvocationError, ProcessStructureError, ResolutionError, RunError,
    StepError,
};
use crate::invocation::InvocationBoundary;
use crate::registry::HandlerDescriptor;
use crate::resolver::{Resolver, TaskRequest};
use crate::workflow::context::ExecutionContext;
use crate::workflow::graph::{DependencyGraph, EdgeKind};
use crate::workflow::snapshot::{JsonlSnapshotSink, SnapshotSink, StepSnapshot};
use crate::workflow::template;
use crate::workflow::types::*;

/// 执行器参数
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOptions {
    /// 最大并发调用数；None 表示不限
    pub max_in_flight: Option<usize>,
    pub default_timeout: Duration,
    /// 可重试失败的重试次数（不含首次调用）
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_in_flight: None,
            default_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_millis(5000),
        }
    }
}

impl ExecutorOptions {
    /// 第 n 次重试前的等待：base * 2^n，封顶 max
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

impl From<&ExecutorSection> for ExecutorOptions {
    fn from(section: &ExecutorSection) -> Self {
        Self {
            max_in_flight: section.max_in_flight.filter(|n| *n > 0),
            default_timeout: Duration::from_secs(section.default_timeout_secs),
            max_retries: section.max_retries,
            retry_base_delay: Duration::from_millis(section.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(section.retry_max_delay_ms),
        }
    }
}

/// 干跑检查中单个步骤的解析结果
#[derive(Debug, Clone)]
pub struct StepCheck {
    pub step_id: StepId,
    pub resolution: Result<Arc<HandlerDescriptor>, ResolutionError>,
}

/// 流程执行器：可克隆，多次运行之间只共享注册表与处理器实现
#[derive(Clone)]
pub struct ProcessExecutor {
    resolver: Resolver,
    boundary: InvocationBoundary,
    options: ExecutorOptions,
    sink: Option<Arc<dyn SnapshotSink>>,
}

impl ProcessExecutor {
    pub fn new(resolver: Resolver, boundary: InvocationBoundary) -> Self {
        Self {
            resolver,
            boundary,
            options: ExecutorOptions::default(),
            sink: None,
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_snapshot_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// 按应用配置设置执行参数；[snapshot] 启用时挂接 JSONL 快照
    pub fn with_config(self, config: &AppConfig) -> Self {
        let executor = self.with_options(ExecutorOptions::from(&config.executor));
        if config.snapshot.enabled {
            tracing::info!(path = %config.snapshot.path.display(), "step snapshots enabled");
            executor.with_snapshot_sink(Arc::new(JsonlSnapshotSink::new(&config.snapshot.path)))
        } else {
            executor
        }
    }

    pub fn snapshot_sink(&self) -> Option<&Arc<dyn SnapshotSink>> {
        self.sink.as_ref()
    }

    /// 校验结构后启动运行；结构错误同步返回，此时没有任何处理器被调用
    pub fn start_run(
        &self,
        def: ProcessDefinition,
        input: Value,
    ) -> Result<RunHandle, ProcessStructureError> {
        let graph = DependencyGraph::build(&def)?;
        let ctx = ExecutionContext::new(input);
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(RunStatus::Pending);

        let run_id = ctx.run_id.clone();
        let process_id = def.id.clone();
        let slots = (0..def.steps.len()).map(|_| Slot::Waiting).collect();

        let driver = RunDriver {
            executor: self.clone(),
            def,
            graph,
            ctx,
            cancel: cancel.clone(),
            status_tx,
            slots,
        };
        let join = tokio::spawn(driver.drive());

        Ok(RunHandle {
            run_id,
            process_id,
            cancel,
            status: status_rx,
            join,
        })
    }

    /// 启动并等待结果
    pub async fn run(&self, def: ProcessDefinition, input: Value) -> Result<ProcessResult, RunError> {
        let handle = self.start_run(def, input)?;
        handle.await_result().await
    }

    /// 干跑：校验结构并解析每个步骤的处理器，不调用任何处理器
    pub fn check(&self, def: &ProcessDefinition) -> Result<Vec<StepCheck>, ProcessStructureError> {
        DependencyGraph::build(def)?;
        Ok(def
            .steps
            .iter()
            .map(|step| StepCheck {
                step_id: step.id.clone(),
                resolution: self.resolver.resolve(&step.request),
            })
            .collect())
    }

    /// 解析并调用一个步骤，按需重试
    async fn execute_step(&self, job: StepJob) -> StepOutcome {
        let StepJob {
            run_id,
            step_id,
            request,
            payload,
            limit,
            max_retries,
            cancel,
        } = job;
        let descriptor = match self.resolver.resolve(&request) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::warn!(run_id = %run_id, step_id = %step_id, error = %err, "step resolution failed");
                return StepOutcome::Failed {
                    error: err.into(),
                    attempts: 0,
                    handler: None,
                };
            }
        };
        let handler = descriptor.id.clone();

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            tracing::debug!(run_id = %run_id, step_id = %step_id, handler = %handler, attempt = attempts, "invoking");

            let err = match self.boundary.invoke(&descriptor, &payload, limit, &cancel).await {
                Ok(output) => {
                    return StepOutcome::Succeeded {
                        output,
                        attempts,
                        handler,
                    }
                }
                Err(err) => err,
            };

            if err.is_retryable() && attempts <= max_retries {
                let delay = self.options.backoff(attempts - 1);
                tracing::warn!(
                    run_id = %run_id,
                    step_id = %step_id,
                    handler = %handler,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable failure, backing off"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return StepOutcome::Cancelled { attempts, handler: Some(handler) };
                    }
                    _ = tokio::time::sleep(delay) => continue,
                }
            }

            let error = match err {
                InvocationError::Contract(e) => StepError::Contract(e),
                InvocationError::Execution(e) => StepError::Execution(e),
                InvocationError::TimedOut { handler, after_ms } => {
                    StepError::TimedOut { handler, after_ms }
                }
                InvocationError::Cancelled => {
                    return StepOutcome::Cancelled {
                        attempts,
                        handler: Some(handler),
                    }
                }
            };
            return StepOutcome::Failed {
                error,
                attempts,
                handler: Some(handler),
            };
        }
    }
}

/// 运行句柄
pub struct RunHandle {
    run_id: String,
    process_id: ProcessId,
    cancel: CancellationToken,
    status: watch::Receiver<RunStatus>,
    join: JoinHandle<ProcessResult>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// 当前运行状态
    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// 订阅状态变化
    pub fn watch_status(&self) -> watch::Receiver<RunStatus> {
        self.status.clone()
    }

    /// 取消运行：进行中的调用以 Cancelled 结束，未开始的步骤不再启动
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn await_result(self) -> Result<ProcessResult, RunError> {
        let run_id = self.run_id;
        self.join.await.map_err(|e| RunError::Aborted {
            run_id,
            reason: e.to_string(),
        })
    }
}

fn abnormal_exit_message(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("step task did not complete: {err}");
    }
    let panic = err.into_panic();
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("handler panicked: {detail}")
}

/// 一次步骤执行所需的全部输入（已完成模板替换）
struct StepJob {
    run_id: String,
    step_id: StepId,
    request: TaskRequest,
    payload: Value,
    limit: Duration,
    max_retries: u32,
    cancel: CancellationToken,
}

enum StepOutcome {
    Succeeded {
        output: Value,
        attempts: u32,
        handler: String,
    },
    Failed {
        error: StepError,
        attempts: u32,
        handler: Option<String>,
    },
    Cancelled {
        attempts: u32,
        handler: Option<String>,
    },
}

enum Slot {
    Waiting,
    Running,
    Done(StepResult),
}

enum Readiness {
    Blocked,
    Ready,
    Skip(SkipReason),
}

type InFlight = FuturesUnordered<BoxFuture<'static, (usize, StepOutcome)>>;

/// 单次运行的驱动状态，运行结束即销毁
struct RunDriver {
    executor: ProcessExecutor,
    def: ProcessDefinition,
    graph: DependencyGraph,
    ctx: ExecutionContext,
    cancel: CancellationToken,
    status_tx: watch::Sender<RunStatus>,
    slots: Vec<Slot>,
}

impl RunDriver {
    async fn drive(mut self) -> ProcessResult {
        self.status_tx.send_replace(RunStatus::Running);
        tracing::info!(
            run_id = %self.ctx.run_id,
            process_id = %self.def.id,
            steps = self.def.steps.len(),
            "run started"
        );

        let mut in_flight: InFlight = FuturesUnordered::new();
        loop {
            if self.cancel.is_cancelled() {
                self.skip_unstarted().await;
            } else {
                self.admit(&mut in_flight).await;
            }

            match in_flight.next().await {
                Some((idx, outcome)) => self.settle(idx, outcome).await,
                None => break,
            }
        }

        self.finish()
    }

    /// 按声明顺序准入；跳过会级联，因此重复扫描直到没有变化
    async fn admit(&mut self, in_flight: &mut InFlight) {
        loop {
            let mut changed = false;
            for idx in 0..self.slots.len() {
                if !matches!(self.slots[idx], Slot::Waiting) {
                    continue;
                }
                match self.readiness(idx) {
                    Readiness::Blocked => {}
                    Readiness::Skip(reason) => {
                        let result = StepResult::skipped(self.def.steps[idx].id.clone(), reason);
                        self.complete(idx, result).await;
                        changed = true;
                    }
                    Readiness::Ready => {
                        let full = self
                            .executor
                            .options
                            .max_in_flight
                            .is_some_and(|max| in_flight.len() >= max);
                        if !full {
                            self.launch(idx, in_flight);
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn readiness(&self, idx: usize) -> Readiness {
        let mut blocked = false;
        for dep in self.graph.dependencies(idx) {
            let dep_id = self.graph.id(dep.step);
            match &self.slots[dep.step] {
                Slot::Waiting | Slot::Running => blocked = true,
                Slot::Done(result) => match result.status {
                    StepStatus::Succeeded => {}
                    StepStatus::Failed => {
                        return Readiness::Skip(SkipReason::UpstreamFailed {
                            step: dep_id.to_string(),
                        })
                    }
                    StepStatus::Cancelled => return Readiness::Skip(SkipReason::RunCancelled),
                    StepStatus::Skipped => {
                        let aborting = result
                            .skip_reason
                            .as_ref()
                            .is_some_and(SkipReason::is_aborting);
                        if aborting {
                            return Readiness::Skip(SkipReason::UpstreamFailed {
                                step: dep_id.to_string(),
                            });
                        }
                        if dep.kind == EdgeKind::Output && !self.ctx.contains(dep_id) {
                            return Readiness::Skip(SkipReason::UpstreamUnavailable {
                                step: dep_id.to_string(),
                            });
                        }
                    }
                },
            }
        }
        if blocked {
            Readiness::Blocked
        } else {
            Readiness::Ready
        }
    }

    fn launch(&mut self, idx: usize, in_flight: &mut InFlight) {
        let step = &self.def.steps[idx];
        let payload = template::render(&step.context, &self.ctx);
        let limit = step
            .timeout_secs
            .or(self.def.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(self.executor.options.default_timeout);
        let max_retries = step.max_retries.unwrap_or(self.executor.options.max_retries);

        tracing::info!(
            run_id = %self.ctx.run_id,
            step_id = %step.id,
            timeout_ms = limit.as_millis() as u64,
            "step admitted"
        );

        let job = StepJob {
            run_id: self.ctx.run_id.clone(),
            step_id: step.id.clone(),
            request: step.request.clone(),
            payload,
            limit,
            max_retries,
            cancel: self.cancel.child_token(),
        };
        let executor = self.executor.clone();
        self.slots[idx] = Slot::Running;

        // 每个步骤独立 spawn：实现 panic 只终结该步骤，驱动任务继续结算
        let step_id = job.step_id.clone();
        let task = tokio::spawn(async move { executor.execute_step(job).await });
        in_flight.push(
            async move {
                let outcome = task.await.unwrap_or_else(|err| {
                    tracing::error!(step_id = %step_id, error = %err, "step task terminated abnormally");
                    StepOutcome::Failed {
                        error: StepError::Execution(HandlerExecutionError::Fatal {
                            handler: step_id,
                            message: abnormal_exit_message(err),
                        }),
                        attempts: 1,
                        handler: None,
                    }
                });
                (idx, outcome)
            }
            .boxed(),
        );
    }

    /// 按步骤的失败策略结算
    async fn settle(&mut self, idx: usize, outcome: StepOutcome) {
        let step_id = self.def.steps[idx].id.clone();
        let policy = self.def.steps[idx].on_failure;

        let result = match outcome {
            StepOutcome::Succeeded {
                output,
                attempts,
                handler,
            } => {
                tracing::info!(run_id = %self.ctx.run_id, step_id = %step_id, handler = %handler, attempt = attempts, "step succeeded");
                self.ctx.record(&step_id, output.clone());
                StepResult::succeeded(step_id.clone(), output, attempts, handler)
            }
            StepOutcome::Cancelled { attempts, handler } => {
                tracing::info!(run_id = %self.ctx.run_id, step_id = %step_id, "step cancelled");
                StepResult::cancelled(step_id.clone(), attempts, handler)
            }
            StepOutcome::Failed {
                error,
                attempts,
                handler,
            } => {
                tracing::warn!(
                    run_id = %self.ctx.run_id,
                    step_id = %step_id,
                    error_kind = error.kind(),
                    error = %error,
                    policy = ?policy,
                    "step failed"
                );
                match policy {
                    FailurePolicy::Abort => {
                        StepResult::failed(step_id.clone(), error, attempts, handler)
                    }
                    FailurePolicy::Skip | FailurePolicy::Continue => {
                        if policy == FailurePolicy::Continue {
                            self.ctx.record(&step_id, Value::Object(Default::default()));
                        }
                        let mut result =
                            StepResult::skipped(step_id.clone(), SkipReason::OwnFailure { error });
                        result.attempts = attempts;
                        result.handler = handler;
                        result
                    }
                }
            }
        };

        let aborted = result.status == StepStatus::Failed;
        self.complete(idx, result).await;

        if aborted {
            for descendant in self.graph.descendants(idx) {
                if matches!(self.slots[descendant], Slot::Waiting) {
                    let skipped = StepResult::skipped(
                        self.def.steps[descendant].id.clone(),
                        SkipReason::UpstreamFailed {
                            step: step_id.clone(),
                        },
                    );
                    self.complete(descendant, skipped).await;
                }
            }
        }
    }

    async fn skip_unstarted(&mut self) {
        for idx in 0..self.slots.len() {
            if matches!(self.slots[idx], Slot::Waiting) {
                let result = StepResult::skipped(self.def.steps[idx].id.clone(), SkipReason::RunCancelled);
                self.complete(idx, result).await;
            }
        }
    }

    /// 记录终态并写快照
    async fn complete(&mut self, idx: usize, result: StepResult) {
        if let Some(sink) = &self.executor.sink {
            let snapshot = StepSnapshot {
                run_id: self.ctx.run_id.clone(),
                process_id: self.def.id.clone(),
                recorded_at: chrono::Utc::now(),
                result: result.clone(),
            };
            if let Err(e) = sink.record(&snapshot).await {
                tracing::warn!(run_id = %self.ctx.run_id, step_id = %result.step_id, error = %e, "snapshot write failed");
            }
        }
        self.slots[idx] = Slot::Done(result);
    }

    fn finish(self) -> ProcessResult {
        let steps: Vec<StepResult> = self
            .slots
            .into_iter()
            .zip(self.def.steps.iter())
            .map(|(slot, step)| match slot {
                Slot::Done(result) => result,
                Slot::Waiting | Slot::Running => {
                    StepResult::skipped(step.id.clone(), SkipReason::RunCancelled)
                }
            })
            .collect();

        let cancelled = steps.iter().any(|s| {
            s.status == StepStatus::Cancelled || s.skip_reason == Some(SkipReason::RunCancelled)
        });
        let failed = steps.iter().any(|s| {
            s.status == StepStatus::Failed
                || s.skip_reason.as_ref().is_some_and(SkipReason::is_aborting)
        });
        let status = if cancelled {
            RunStatus::Cancelled
        } else if failed {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        let finished_at = chrono::Utc::now();
        tracing::info!(
            run_id = %self.ctx.run_id,
            process_id = %self.def.id,
            status = ?status,
            duration_ms = (finished_at - self.ctx.started_at).num_milliseconds(),
            "run finished"
        );
        self.status_tx.send_replace(status);

        ProcessResult {
            run_id: self.ctx.run_id,
            process_id: self.def.id,
            status,
            steps,
            started_at: self.ctx.started_at,
            finished_at,
        }
    }
}
