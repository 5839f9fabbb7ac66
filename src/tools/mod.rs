//! 工具层：线格式解析、操作工具定义与 schema、调用审计

pub mod call;
pub mod executor;
pub mod registry;
pub mod schema;

pub use call::{parse_backend_output, ToolCall, TurnOutput};
pub use executor::audit;
pub use registry::{
    render_tools_prompt, spec_for, OperationCall, ResourceListing, ToolSpec, DEFAULT_MEETING_TURNS,
};
pub use schema::tool_call_schema_json;
