//! 对话历史：带时间戳的有序条目
//!
//! 每个 Actor 的 history 只追加不删改（set_directive 例外：替换首条指令条目）。
//! 条目分三类：指令（System）、入站提示（User）、出站回复（Assistant）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 入站：用户提示、工具观察、会议广播
    User,
    /// 出站：后端回复
    Assistant,
    /// 指令 / 系统条目
    System,
}

/// 单条历史消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn is_inbound(&self) -> bool {
        self.role == Role::User
    }
}

/// 取最后一条入站消息内容（Mock 后端与日志预览用）
pub fn last_inbound(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.is_inbound())
        .map(|m| m.content.as_str())
}
