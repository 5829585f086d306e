//! 处理器注册表
//!
//! 处理器（Handler）是一个技能或智能体的描述符，加上在运行时绑定的不透明实现。
//! 注册表只保存描述符：按 id、能力标签、目标流程建立索引。

mod descriptor;
mod loader;
mod store;

pub use descriptor::{HandlerDescriptor, HandlerKind};
pub use loader::{descriptor_file_schema_json, load_file, DescriptorLoader, DESCRIPTOR_FILE, PERSONA_FILE};
pub use store::{HandlerRegistry, RegistrySnapshot};
