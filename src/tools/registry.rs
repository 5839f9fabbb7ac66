//! 操作工具表：每个受能力门控制的操作对应一个工具定义（名称、描述、参数 schema）
//!
//! 参数结构同时用于 schemars 生成 schema 与 serde 反序列化，保证暴露给后端的格式与解析一致。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{AgencyError, AgencyResult, Operation};
use crate::tools::{tool_call_schema_json, ToolCall};

/// 会议默认每人发言轮数
pub const DEFAULT_MEETING_TURNS: usize = 15;

fn default_meeting_turns() -> usize {
    DEFAULT_MEETING_TURNS
}

/// create_agent 参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CreateAgentArgs {
    /// 新 agent 的名称
    pub name: String,
    /// 新 agent 的系统指令
    pub directive: String,
}

/// send_message 参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SendMessageArgs {
    /// 目标子 agent 的 id
    pub agent_id: String,
    pub message: String,
}

/// call_meeting 参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallMeetingArgs {
    /// 会议目标
    pub objective: String,
    /// 每位参与者最多发言轮数
    #[serde(default = "default_meeting_turns")]
    pub max_turns: usize,
}

/// internal_monologue 参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InternalMonologueArgs {
    /// Your detailed thought process, planning, or reasoning steps
    pub thought: String,
}

/// call_resource 参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallResourceArgs {
    /// 已挂载资源的 id
    pub resource: String,
    /// 资源提供的操作名
    pub operation: String,
    #[serde(default)]
    pub arguments: Value,
}

/// 已解析、已类型化的操作调用
#[derive(Clone, Debug, PartialEq)]
pub enum OperationCall {
    CreateAgent(CreateAgentArgs),
    SendMessage(SendMessageArgs),
    CallMeeting(CallMeetingArgs),
    InternalMonologue(InternalMonologueArgs),
    CallResource(CallResourceArgs),
}

fn typed_args<T: serde::de::DeserializeOwned>(op: Operation, args: &Value) -> AgencyResult<T> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args.clone()
    };
    serde_json::from_value(args)
        .map_err(|e| AgencyError::InvalidArgument(format!("{op}: {e}")))
}

impl OperationCall {
    /// 把线格式的工具调用解析为具体操作；未知工具为 NotFound，参数不合法为 InvalidArgument
    pub fn parse(call: &ToolCall) -> AgencyResult<Self> {
        let op: Operation = call.tool.trim().parse()?;
        Ok(match op {
            Operation::CreateAgent => OperationCall::CreateAgent(typed_args(op, &call.args)?),
            Operation::SendMessage => OperationCall::SendMessage(typed_args(op, &call.args)?),
            Operation::CallMeeting => OperationCall::CallMeeting(typed_args(op, &call.args)?),
            Operation::InternalMonologue => {
                OperationCall::InternalMonologue(typed_args(op, &call.args)?)
            }
            Operation::CallResource => OperationCall::CallResource(typed_args(op, &call.args)?),
        })
    }

    pub fn operation(&self) -> Operation {
        match self {
            OperationCall::CreateAgent(_) => Operation::CreateAgent,
            OperationCall::SendMessage(_) => Operation::SendMessage,
            OperationCall::CallMeeting(_) => Operation::CallMeeting,
            OperationCall::InternalMonologue(_) => Operation::InternalMonologue,
            OperationCall::CallResource(_) => Operation::CallResource,
        }
    }
}

/// 工具定义（供后端理解）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null)
}

/// 操作对应的工具定义
pub fn spec_for(op: Operation) -> ToolSpec {
    let (description, parameters) = match op {
        Operation::CreateAgent => (
            "Create a new child agent with the given name and directive. Returns the new agent id.",
            schema_of::<CreateAgentArgs>(),
        ),
        Operation::SendMessage => (
            "Send a message to one of your child agents and receive its reply.",
            schema_of::<SendMessageArgs>(),
        ),
        Operation::CallMeeting => (
            "Hold a round-robin meeting with all of your child agents about an objective. Returns the meeting summary.",
            schema_of::<CallMeetingArgs>(),
        ),
        Operation::InternalMonologue => (
            "Think through complex problems step by step before taking action. Your thoughts are saved but not shown to the user.",
            schema_of::<InternalMonologueArgs>(),
        ),
        Operation::CallResource => (
            "Call an operation on one of your attached resources.",
            schema_of::<CallResourceArgs>(),
        ),
    };
    ToolSpec {
        name: op.as_str().to_string(),
        description: description.to_string(),
        parameters,
    }
}

/// 已挂载资源及其操作（用于工具提示）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceListing {
    pub id: String,
    pub operations: Vec<String>,
}

/// 生成本次调用的工具提示；没有可用操作时返回 None（不发送工具提示）
pub fn render_tools_prompt(ops: &[Operation], resources: &[ResourceListing]) -> Option<String> {
    if ops.is_empty() {
        return None;
    }
    let specs: Vec<ToolSpec> = ops.iter().copied().map(spec_for).collect();
    let specs_json = serde_json::to_string_pretty(&specs).unwrap_or_else(|_| "[]".to_string());

    let mut prompt = String::from(
        "You may call one tool per reply. To call a tool, reply with JSON only, in this format:\n",
    );
    prompt.push_str("{\"tool\": \"<name>\", \"args\": {...}}\n\nTool call schema:\n");
    prompt.push_str(&tool_call_schema_json());
    prompt.push_str("\n\nAvailable tools:\n");
    prompt.push_str(&specs_json);
    if ops.contains(&Operation::CallResource) && !resources.is_empty() {
        prompt.push_str("\n\nAttached resources:\n");
        for r in resources {
            prompt.push_str(&format!("- {}: {}\n", r.id, r.operations.join(", ")));
        }
    }
    prompt.push_str("\nAny reply that is not a tool call is your final answer.");
    Some(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(tool: &str, args: Value) -> ToolCall {
        ToolCall {
            tool: tool.to_string(),
            args,
        }
    }

    #[test]
    fn test_parse_typed_operation() {
        let parsed = OperationCall::parse(&call(
            "create_agent",
            serde_json::json!({"name": "researcher", "directive": "Find sources."}),
        ))
        .unwrap();
        assert_eq!(parsed.operation(), Operation::CreateAgent);
    }

    #[test]
    fn test_meeting_turns_default() {
        let parsed =
            OperationCall::parse(&call("call_meeting", serde_json::json!({"objective": "plan"})))
                .unwrap();
        match parsed {
            OperationCall::CallMeeting(args) => assert_eq!(args.max_turns, DEFAULT_MEETING_TURNS),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            OperationCall::parse(&call("make_file", Value::Null)),
            Err(AgencyError::NotFound(_))
        ));
        assert!(matches!(
            OperationCall::parse(&call("send_message", serde_json::json!({"agent_id": "1"}))),
            Err(AgencyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_render_only_offered_tools() {
        assert!(render_tools_prompt(&[], &[]).is_none());
        let prompt = render_tools_prompt(&[Operation::InternalMonologue], &[]).unwrap();
        assert!(prompt.contains("internal_monologue"));
        assert!(!prompt.contains("\"create_agent\""));
    }

    #[test]
    fn test_render_lists_resources() {
        let prompt = render_tools_prompt(
            &[Operation::CallResource],
            &[ResourceListing {
                id: "sandbox".to_string(),
                operations: vec!["run_python".to_string()],
            }],
        )
        .unwrap();
        assert!(prompt.contains("- sandbox: run_python"));
    }
}
