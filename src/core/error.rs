//! 控制面错误类型
//!
//! 每个对外操作要么返回成功值，要么返回下列错误之一；校验在提交之前完成，失败不会留下半成品状态。

use thiserror::Error;

/// 控制面操作可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgencyError {
    /// 深度 / 宽度 / 总数上限
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// 能力门拒绝
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// actor / resource / meeting id 不存在
    #[error("Not found: {0}")]
    NotFound(String),

    /// 主持人没有子节点，无法开会
    #[error("No participants: {0}")]
    NoParticipants(String),

    /// 推理后端调用失败（不自动重试）
    #[error("Backend error: {0}")]
    Backend(String),

    /// 资源未能启动或未在超时内就绪
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// 快照恢复时引用了缺失的 id（作为警告返回）
    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    /// 有会议进行中时请求快照
    #[error("Meeting in progress: {0}")]
    MeetingInProgress(String),

    /// 工具参数不合法、重挂载成环等
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 资源已就绪，但这一次调用本身失败
    #[error("Tool execution failed: {0}")]
    ToolFailed(String),
}

pub type AgencyResult<T> = Result<T, AgencyError>;

impl AgencyError {
    /// 工具调用中哪些错误必须中止整个 send_message，而不是作为观察结果回给后端
    pub fn is_fatal_for_turn(&self) -> bool {
        matches!(self, AgencyError::ResourceUnavailable(_))
    }
}
