//! 外部工具提供者（资源）：生命周期监管与命令型实现

pub mod command;
pub mod provider;
pub mod supervisor;

pub use command::CommandResource;
pub use provider::ResourceProvider;
pub use supervisor::{ResourceHandle, ResourceSupervisor};
