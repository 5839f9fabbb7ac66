//! 工具调用 JSON Schema 生成（schemars）
//!
//! 用于将「合法 tool call」的 JSON 结构注入工具提示，减少后端输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde_json::{Map, Value};

/// 工具调用请求格式：与 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名（取自可用工具列表）
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: Map<String, Value>,
}

/// 返回工具调用的 JSON Schema 字符串
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
