//! 外部工具提供者（资源）的边界
//!
//! 资源有独立的生命周期：serve 进入作用域并一直运行到 shutdown 被取消；
//! probe 是廉价的能力探测（列出可用操作）；call 执行一次具体操作。

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// 资源提供者
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// 资源类型（日志与句柄展示用）
    fn kind(&self) -> &str;

    /// 进入生命周期作用域，直到 shutdown 取消后完成清理再返回；
    /// 未被取消就返回（无论 Ok 还是 Err）都视为崩溃
    async fn serve(&self, shutdown: CancellationToken) -> Result<(), String>;

    /// 探测：成功时返回可用操作名
    async fn probe(&self) -> Result<Vec<String>, String>;

    /// 执行一次操作
    async fn call(&self, operation: &str, args: Value) -> Result<String, String>;
}
