//! 核心：错误分类

pub mod error;

pub use error::{
    ContractError, DescriptorError, HandlerExecutionError, InvocationError, ProcessStructureError,
    ResolutionError, RunError, StepError,
};
