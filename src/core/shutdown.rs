//! 优雅关闭
//!
//! 提供统一的关闭信号监听和清理逻辑，确保：
//! - 所有资源的后台任务被取消并完成清理
//! - 退出前保存一份快照

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::core::Agency;
use crate::memory::{SnapshotFormat, SnapshotStore};

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭信号 token
    shutdown_token: CancellationToken,
}

/// 关闭原因
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    /// 用户发起的退出 (Ctrl+C 或输入结束)
    UserInitiated,
    /// SIGTERM 信号
    Signal,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            shutdown_token: CancellationToken::new(),
        }
    }

    /// 获取关闭 token（用于取消正在进行的任务）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭
    pub fn shutdown(&self, reason: ShutdownReason) {
        tracing::info!(reason = ?reason, "shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：按注册顺序执行清理任务，每个任务有超时
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    /// 单个清理任务的超时时间（秒）
    timeout_secs: u64,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 执行所有清理任务；单个失败或超时只记日志。开始前先把关闭信号置位
    pub async fn run_cleanup(&self) {
        if !self.manager.is_shutdown() {
            self.manager.shutdown(ShutdownReason::UserInitiated);
        }
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        let timeout = tokio::time::Duration::from_secs(self.timeout_secs);

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup task '{}' completed successfully", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Cleanup task '{}' failed: {:#}", name, e);
                }
                Err(_) => {
                    tracing::warn!("Cleanup task '{}' timed out after {}s", name, self.timeout_secs);
                }
            }
        }

        tracing::info!("All cleanup tasks finished");
    }

}

/// 保存快照的清理任务（先于资源停止执行）
pub struct SnapshotCleanup {
    agency: Arc<Agency>,
    store: SnapshotStore,
    format: SnapshotFormat,
}

impl SnapshotCleanup {
    pub fn new(agency: Arc<Agency>, dir: impl Into<PathBuf>, format: SnapshotFormat) -> Self {
        Self {
            agency,
            store: SnapshotStore::new(dir),
            format,
        }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for SnapshotCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let snapshot = self.agency.save().await.context("capture snapshot")?;
        let path = self.store.save(&snapshot, self.format).await?;
        tracing::info!(path = %path.display(), "snapshot saved");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Snapshot"
    }
}

/// 停止全部资源的清理任务
pub struct ResourceCleanup {
    agency: Arc<Agency>,
}

impl ResourceCleanup {
    pub fn new(agency: Arc<Agency>) -> Self {
        Self { agency }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for ResourceCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.agency.shutdown().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Resources"
    }
}

/// 运行主应用直到结束或收到关闭信号，然后执行清理
pub async fn run_with_graceful_shutdown<F, Fut>(
    shutdown_manager: Arc<ShutdownManager>,
    app: F,
    cleanup: impl FnOnce() -> Fut,
) where
    F: Future<Output = ()>,
    Fut: Future<Output = ()>,
{
    shutdown_manager.install_signal_handlers();

    tokio::select! {
        _ = app => {
            tracing::info!("Application finished normally");
        }
        _ = shutdown_manager.wait_for_shutdown() => {
            tracing::info!("Shutdown signal received");
        }
    }

    cleanup().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::AgencyBuilder;

    #[test]
    fn test_shutdown_manager_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_shutdown());
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(token.is_cancelled());
        assert!(manager.is_shutdown());
    }

    struct FailingCleanup;

    #[async_trait::async_trait]
    impl ShutdownCleanup for FailingCleanup {
        async fn cleanup(&self) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    #[tokio::test]
    async fn test_cleanup_saves_snapshot_despite_earlier_failure() {
        let dir = tempfile::tempdir().unwrap();
        let agency = Arc::new(
            AgencyBuilder::new(AppConfig::default())
                .build()
                .await
                .unwrap()
                .agency,
        );
        let manager = Arc::new(ShutdownManager::new());
        let token = manager.token();
        let mut coordinator = ShutdownCoordinator::new(Arc::clone(&manager));
        coordinator.register(FailingCleanup);
        coordinator.register(SnapshotCleanup::new(
            agency.clone(),
            dir.path(),
            SnapshotFormat::Json,
        ));
        coordinator.register(ResourceCleanup::new(agency));
        coordinator.run_cleanup().await;

        let saved = SnapshotStore::new(dir.path()).list().await.unwrap();
        assert_eq!(saved.len(), 1);
        assert!(token.is_cancelled());
        assert!(manager.is_shutdown());
    }
}
