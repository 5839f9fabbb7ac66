//! 资源监管：启动、停止、就绪探测
//!
//! start 为每个资源派生一个后台任务运行 serve；任务自行退出（崩溃）时把句柄标记为未运行并记录日志，
//! 不自动重启，下一个需要它的操作必须显式再次 start。
//! 同一资源的 start/stop 通过各自的生命周期锁串行；不同资源互不阻塞。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{AgencyError, AgencyResult};
use crate::resources::ResourceProvider;

/// 资源句柄（对外展示的状态）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceHandle {
    pub id: String,
    pub kind: String,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
}

/// 后台任务共享的运行状态
#[derive(Debug, Default)]
struct ResourceState {
    running: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl ResourceState {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn mark_started(&self) {
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        self.running.store(true, Ordering::SeqCst);
    }

    fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 被监管的后台任务
struct Supervised {
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct Entry {
    provider: Arc<dyn ResourceProvider>,
    state: Arc<ResourceState>,
    lifecycle: AsyncMutex<Option<Supervised>>,
}

/// 资源监管器（显式实例，经依赖注入传递）
#[derive(Default)]
pub struct ResourceSupervisor {
    entries: RwLock<HashMap<String, Arc<Entry>>>,
}

impl ResourceSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册资源；同名资源已存在时报错
    pub fn register(
        &self,
        id: impl Into<String>,
        provider: Arc<dyn ResourceProvider>,
    ) -> AgencyResult<()> {
        let id = id.into();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&id) {
            return Err(AgencyError::InvalidArgument(format!(
                "resource '{id}' already registered"
            )));
        }
        entries.insert(
            id,
            Arc::new(Entry {
                provider,
                state: Arc::new(ResourceState::default()),
                lifecycle: AsyncMutex::new(None),
            }),
        );
        Ok(())
    }

    fn entry(&self, id: &str) -> AgencyResult<Arc<Entry>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| AgencyError::NotFound(format!("resource '{id}'")))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.entry(id).map(|e| e.state.is_running()).unwrap_or(false)
    }

    pub fn handle(&self, id: &str) -> AgencyResult<ResourceHandle> {
        let entry = self.entry(id)?;
        Ok(ResourceHandle {
            id: id.to_string(),
            kind: entry.provider.kind().to_string(),
            running: entry.state.is_running(),
            started_at: entry.state.started_at(),
        })
    }

    pub fn handles(&self) -> Vec<ResourceHandle> {
        self.ids()
            .iter()
            .filter_map(|id| self.handle(id).ok())
            .collect()
    }

    /// 启动资源；已在运行时直接成功
    pub async fn start(&self, id: &str) -> AgencyResult<()> {
        let entry = self.entry(id)?;
        let mut slot = entry.lifecycle.lock().await;
        if entry.state.is_running() {
            return Ok(());
        }
        if let Some(crashed) = slot.take() {
            // 上一代任务已自行退出，回收即可
            let _ = crashed.task.await;
        }

        let token = CancellationToken::new();
        let shutdown = token.clone();
        let provider = Arc::clone(&entry.provider);
        let state = Arc::clone(&entry.state);
        let resource_id = id.to_string();

        entry.state.mark_started();
        let task = tokio::spawn(async move {
            let result = provider.serve(shutdown.clone()).await;
            if shutdown.is_cancelled() {
                tracing::debug!(resource = %resource_id, "resource scope closed");
                return;
            }
            state.mark_stopped();
            match result {
                Ok(()) => tracing::error!(resource = %resource_id, "resource exited unexpectedly"),
                Err(e) => tracing::error!(resource = %resource_id, error = %e, "resource crashed"),
            }
        });
        *slot = Some(Supervised { token, task });
        tracing::info!(resource = %id, kind = %entry.provider.kind(), "resource started");
        Ok(())
    }

    /// 停止资源：取消后台任务并等待其清理完成；未运行时为空操作
    pub async fn stop(&self, id: &str) -> AgencyResult<()> {
        let entry = self.entry(id)?;
        let mut slot = entry.lifecycle.lock().await;
        let Some(supervised) = slot.take() else {
            return Ok(());
        };
        supervised.token.cancel();
        let joined = supervised.task.await;
        entry.state.mark_stopped();
        tracing::info!(resource = %id, "resource stopped");
        joined.map_err(|e| {
            AgencyError::ResourceUnavailable(format!("resource '{id}' teardown failed: {e}"))
        })
    }

    /// 已启动过的后台任务自行退出且未被 stop 回收
    async fn has_crashed(entry: &Entry) -> bool {
        !entry.state.is_running() && entry.lifecycle.lock().await.is_some()
    }

    /// 轮询 probe 直到成功或超时；超时或后台任务已退出时返回 ResourceUnavailable
    pub async fn wait_until_ready(
        &self,
        id: &str,
        timeout: Duration,
        interval: Duration,
    ) -> AgencyResult<()> {
        let entry = self.entry(id)?;
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;
        let mut last_error = String::from("no probe attempted");

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            attempts += 1;
            match tokio::time::timeout(remaining, entry.provider.probe()).await {
                Ok(Ok(operations)) => {
                    tracing::debug!(
                        resource = %id,
                        attempts,
                        operations = operations.len(),
                        "resource ready"
                    );
                    return Ok(());
                }
                Ok(Err(e)) => last_error = e,
                Err(_) => last_error = "probe timed out".to_string(),
            }
            if Self::has_crashed(&entry).await {
                tracing::warn!(resource = %id, attempts, error = %last_error, "resource exited before ready");
                return Err(AgencyError::ResourceUnavailable(format!(
                    "resource '{id}' exited before becoming ready: {last_error}"
                )));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(interval.min(remaining)).await;
        }

        tracing::warn!(resource = %id, attempts, error = %last_error, "resource not ready in time");
        Err(AgencyError::ResourceUnavailable(format!(
            "resource '{id}' not ready after {}ms: {last_error}",
            timeout.as_millis()
        )))
    }

    /// 启动（如需要）并等待就绪；任何一步失败都是 ResourceUnavailable
    pub async fn ensure_ready(
        &self,
        id: &str,
        timeout: Duration,
        interval: Duration,
    ) -> AgencyResult<()> {
        if !self.contains(id) {
            return Err(AgencyError::ResourceUnavailable(format!(
                "resource '{id}' is not registered"
            )));
        }
        if !self.is_running(id) {
            tracing::info!(resource = %id, "starting resource on demand");
            self.start(id).await?;
        }
        self.wait_until_ready(id, timeout, interval).await
    }

    /// 列出资源可用操作
    pub async fn operations(&self, id: &str) -> AgencyResult<Vec<String>> {
        let entry = self.entry(id)?;
        entry
            .provider
            .probe()
            .await
            .map_err(|e| AgencyError::ResourceUnavailable(format!("resource '{id}': {e}")))
    }

    /// 调用资源操作：未运行为 ResourceUnavailable，操作本身失败为 ToolFailed
    pub async fn call(&self, id: &str, operation: &str, args: Value) -> AgencyResult<String> {
        let entry = self.entry(id)?;
        if !entry.state.is_running() {
            return Err(AgencyError::ResourceUnavailable(format!(
                "resource '{id}' is not running"
            )));
        }
        entry
            .provider
            .call(operation, args)
            .await
            .map_err(|e| AgencyError::ToolFailed(format!("{id}.{operation}: {e}")))
    }

    /// 尽力停止全部资源（仅整体关闭时使用），单个失败只记日志
    pub async fn stop_all(&self) {
        for id in self.ids() {
            if let Err(e) = self.stop(&id).await {
                tracing::warn!(resource = %id, error = %e, "failed to stop resource");
            }
        }
    }
}
