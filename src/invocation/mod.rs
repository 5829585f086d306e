//! 调用层：处理器实现（Handler / HandlerSet）与调用边界（InvocationBoundary）

mod boundary;
mod handler;

pub use boundary::InvocationBoundary;
pub use handler::{handler_fn, FailureClass, FnHandler, Handler, HandlerError, HandlerSet};
