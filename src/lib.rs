//! Hive - 技能 / 智能体处理器编排核心
//!
//! 模块划分：
//! - **schema**: Schema 文档与纯函数校验
//! - **registry**: 处理器描述符、注册表（写时复制）、描述符加载
//! - **resolver**: 按 id 或能力标签解析处理器
//! - **invocation**: 处理器实现与调用边界（契约校验、超时、取消）
//! - **workflow**: 流程定义、依赖图、模板替换、执行引擎、快照
//! - **core**: 错误分类
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod invocation;
pub mod observability;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod workflow;
