//! 推理后端抽象
//!
//! 控制面只把 actor 的有序历史交给后端并取回文本；模型、协议一概不关心。
//! 后端以 String 报告失败，由调用方统一转为 AgencyError::Backend。

use async_trait::async_trait;

use crate::memory::Message;

/// 推理后端：给定有序历史返回一段文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
