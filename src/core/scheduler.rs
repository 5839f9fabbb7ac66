//! 调用调度：同一 actor 串行，不同 actor 并发
//!
//! 每个 actor 一把异步锁；持有锁期间才允许对该 actor 调用后端并写历史。
//! 多把锁一次性获取时按 id 排序，避免两个调用方以相反顺序加锁。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::core::tree::id_order;

/// 调用许可：drop 时释放该 actor
pub type TurnPermit = OwnedMutexGuard<()>;

/// 按 actor 分发调用许可
#[derive(Debug, Default)]
pub struct ActorScheduler {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ActorScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, actor_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(actor_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// 获取单个 actor 的调用许可（该 actor 忙时等待）
    pub async fn acquire(&self, actor_id: &str) -> TurnPermit {
        self.lock_for(actor_id).lock_owned().await
    }

    /// 一次获取多个 actor 的许可（去重并按 id 排序）
    pub async fn acquire_all(&self, actor_ids: &[String]) -> Vec<TurnPermit> {
        let mut ids: Vec<&String> = actor_ids.iter().collect();
        ids.sort_by_key(|id| id_order(id));
        ids.dedup();
        let mut permits = Vec::with_capacity(ids.len());
        for id in ids {
            permits.push(self.acquire(id).await);
        }
        permits
    }

    /// 是否正在被占用
    pub fn is_busy(&self, actor_id: &str) -> bool {
        self.lock_for(actor_id).try_lock().is_err()
    }

    /// actor 删除后丢弃其锁
    pub fn forget(&self, actor_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(actor_id);
    }
}
