//! 流程执行
//!
//! 流程定义 → 依赖图 → 执行引擎按就绪顺序解析并调用处理器 → 输出写入执行上下文 → ProcessResult

pub mod builder;
pub mod context;
pub mod engine;
pub mod graph;
pub mod loader;
pub mod snapshot;
pub mod template;
pub mod types;

pub use builder::ProcessBuilder;
pub use context::ExecutionContext;
pub use engine::{ExecutorOptions, ProcessExecutor, RunHandle, StepCheck};
pub use graph::{Dependency, DependencyGraph, EdgeKind};
pub use loader::{load_process_file, ProcessLoader};
pub use snapshot::{JsonlSnapshotSink, MemorySnapshotSink, SnapshotSink, StepSnapshot};
pub use types::*;
