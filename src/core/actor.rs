//! Actor：树上的一个节点
//!
//! 父子关系只用 id 表示（parent_id 为弱回指，child_ids 为拥有关系），对象之间没有活指针，
//! 因此删除与序列化都不需要断环。

use serde::{Deserialize, Serialize};

use crate::core::Capabilities;
use crate::memory::Message;

/// Actor id（树内分配的计数器字符串，如 "0"、"1"）
pub type ActorId = String;

/// 树节点：身份、指令、能力表、有序历史、后端引用、资源引用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    /// 系统指令；同时是 history 的首条 System 条目
    pub directive: String,
    /// 后端名（在 BackendRegistry 中查找）
    pub backend: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub parent_id: Option<ActorId>,
    /// 有序且去重；顺序即会议入场顺序
    #[serde(default)]
    pub child_ids: Vec<ActorId>,
    #[serde(default)]
    pub resource_ids: Vec<String>,
}

impl Actor {
    /// 新建 actor：history 以指令条目开头，无父子连接
    pub fn new(id: ActorId, spec: NewActor, backend: String) -> Self {
        let history = vec![Message::system(spec.directive.clone())];
        Self {
            id,
            name: spec.name,
            directive: spec.directive,
            backend,
            capabilities: spec.capabilities,
            history,
            parent_id: None,
            child_ids: Vec::new(),
            resource_ids: spec.resource_ids,
        }
    }

    /// 替换指令，并同步 history 首条指令条目
    pub fn set_directive(&mut self, directive: impl Into<String>) {
        let directive = directive.into();
        match self.history.first_mut() {
            Some(first) if first.role == crate::memory::Role::System => {
                first.content = directive.clone();
            }
            _ => self.history.insert(0, Message::system(directive.clone())),
        }
        self.directive = directive;
    }

    pub fn has_child(&self, id: &str) -> bool {
        self.child_ids.iter().any(|c| c == id)
    }

    pub(crate) fn add_child(&mut self, id: &str) {
        if !self.has_child(id) {
            self.child_ids.push(id.to_string());
        }
    }

    pub(crate) fn remove_child(&mut self, id: &str) {
        self.child_ids.retain(|c| c != id);
    }
}

/// createActor 的输入
#[derive(Clone, Debug, Default)]
pub struct NewActor {
    pub name: String,
    pub directive: String,
    pub capabilities: Capabilities,
    pub resource_ids: Vec<String>,
    /// 未设置时继承父节点的后端
    pub backend: Option<String>,
}

impl NewActor {
    pub fn new(name: impl Into<String>, directive: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directive: directive.into(),
            ..Default::default()
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_resources(mut self, resource_ids: Vec<String>) -> Self {
        self.resource_ids = resource_ids;
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }
}
