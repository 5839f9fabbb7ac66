//! Mock 与脚本化后端（用于测试与本地演示，无需 API）
//!
//! - MockLlmClient：回显最后一条入站消息
//! - ScriptedLlmClient：按顺序返回预置回复或失败，耗尽后返回默认回复；记录每次请求

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{last_inbound, Message};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last = last_inbound(messages).unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {last}"))
    }
}

/// 脚本化客户端：逐条消费脚本
#[derive(Debug)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: Result<String, String>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    /// 允许脚本中混入失败
    pub fn from_results(script: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: Ok("Nothing further to add.".to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 一直失败的后端
    pub fn failing(error: impl Into<String>) -> Self {
        Self::from_results(Vec::new()).with_fallback(Err(error.into()))
    }

    pub fn with_fallback(mut self, fallback: Result<String, String>) -> Self {
        self.fallback = fallback;
        self
    }

    /// 迄今收到的全部请求
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_last_inbound() {
        let history = vec![Message::system("be brief"), Message::user("hello")];
        let reply = MockLlmClient.complete(&history).await.unwrap();
        assert_eq!(reply, "Echo from Mock: hello");
    }

    #[tokio::test]
    async fn test_scripted_replays_then_falls_back() {
        let client = ScriptedLlmClient::from_results(vec![
            Ok("one".to_string()),
            Err("boom".to_string()),
        ]);
        let history = vec![Message::user("x")];
        assert_eq!(client.complete(&history).await.unwrap(), "one");
        assert_eq!(client.complete(&history).await.unwrap_err(), "boom");
        assert_eq!(
            client.complete(&history).await.unwrap(),
            "Nothing further to add."
        );
        assert_eq!(client.call_count(), 3);
    }
}
