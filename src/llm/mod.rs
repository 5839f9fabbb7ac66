//! LLM 层：后端抽象、注册表与 Mock 实现

pub mod mock;
pub mod registry;
pub mod traits;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use registry::BackendRegistry;
pub use traits::LlmClient;
