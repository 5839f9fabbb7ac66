//! 工具审计
//!
//! 每次操作调用输出一行结构化审计日志（JSON）：工具名、结果、耗时、参数预览。

use std::time::Instant;

use serde_json::Value;

use crate::core::AgencyResult;

/// 记录一次工具调用的审计日志
pub fn audit<T>(agent_id: &str, tool_name: &str, args: &Value, started: Instant, result: &AgencyResult<T>) {
    let outcome = match result {
        Ok(_) => "ok".to_string(),
        Err(e) => e.to_string(),
    };
    let audit = serde_json::json!({
        "event": "tool_audit",
        "agent_id": agent_id,
        "tool": tool_name,
        "ok": result.is_ok(),
        "outcome": outcome,
        "duration_ms": started.elapsed().as_millis() as u64,
        "args_preview": args_preview(args),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
