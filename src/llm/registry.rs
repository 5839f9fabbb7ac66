//! 后端注册表
//!
//! actor 只记后端名（可序列化），调用时按名查到 Arc<dyn LlmClient>。

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{AgencyError, AgencyResult};
use crate::llm::LlmClient;

/// 后端注册表：按名称存储 Arc<dyn LlmClient>
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn LlmClient>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, client: Arc<dyn LlmClient>) {
        self.backends.insert(name.into(), client);
    }

    pub fn with(mut self, name: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        self.register(name, client);
        self
    }

    pub fn get(&self, name: &str) -> AgencyResult<Arc<dyn LlmClient>> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| AgencyError::Backend(format!("unknown backend '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}
