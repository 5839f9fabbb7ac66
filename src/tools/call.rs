//! 工具调用的线格式
//!
//! 后端输出若是 `{"tool": "...", "args": {...}}`（可包在 ```json 代码块中）且 tool 非空，即为工具调用；
//! 其余一律视为普通回复。与严格解析不同，这里解析失败不是错误：后端说的话本身就是回答。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// 一次后端输出的解释结果
#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutput {
    Reply(String),
    ToolCall(ToolCall),
}

fn extract_json(trimmed: &str) -> Option<&str> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析后端输出
pub fn parse_backend_output(output: &str) -> TurnOutput {
    let trimmed = output.trim();
    let call = extract_json(trimmed)
        .and_then(|json| serde_json::from_str::<ToolCall>(json).ok())
        .filter(|call| !call.tool.trim().is_empty());
    match call {
        Some(call) => TurnOutput::ToolCall(call),
        None => TurnOutput::Reply(trimmed.to_string()),
    }
}
