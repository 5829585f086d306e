//! 契约 Schema：结构描述与校验
//!
//! - **types**: Schema 文档（object / array / string / number / integer / boolean / enum / any），可从 TOML 或 JSON 读取
//! - **validator**: 纯函数校验，返回违规列表（空列表即通过）

mod types;
mod validator;

pub use types::{ObjectSchema, Schema, SchemaError};
pub use validator::{validate, ValidationResult, Violation, ViolationReason};
