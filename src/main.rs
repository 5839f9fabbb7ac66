//! Agency - Rust 智能体层级控制面
//!
//! 入口：加载配置、初始化日志、装配 Agency（可选从快照恢复），
//! 从标准输入逐行读取请求交给根 actor，退出时保存快照并停止资源。

use std::path::PathBuf;
use std::sync::Arc;

use agency::{
    core::{
        create_agency_builder, ResourceCleanup, ShutdownCoordinator, ShutdownManager,
        ShutdownReason, SnapshotCleanup,
    },
    memory::{SnapshotFormat, SnapshotStore},
    observability,
};
use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut builder = create_agency_builder(None);
    let config = builder.config().clone();
    observability::init(config.app.json_logs());

    if let Some(path) = std::env::args().nth(1).map(PathBuf::from) {
        let snapshot = SnapshotStore::load(&path).await?;
        tracing::info!(path = %path.display(), "restoring from snapshot");
        builder = builder.with_snapshot(snapshot);
    }

    let built = builder.build().await.context("Failed to build agency")?;
    for warning in &built.warnings {
        tracing::warn!(%warning, "restore warning");
    }
    let agency = Arc::new(built.agency);

    let manager = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&manager));
    coordinator.register(SnapshotCleanup::new(
        Arc::clone(&agency),
        config.app.snapshot_dir.clone(),
        SnapshotFormat::Json,
    ));
    coordinator.register(ResourceCleanup::new(Arc::clone(&agency)));

    let repl = {
        let agency = Arc::clone(&agency);
        let manager = Arc::clone(&manager);
        let stop = manager.token();
        async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let next = tokio::select! {
                    next = lines.next_line() => next,
                    _ = stop.cancelled() => break,
                };
                let line = match next {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("stdin read failed: {}", e);
                        break;
                    }
                };
                let prompt = line.trim();
                if prompt.is_empty() {
                    continue;
                }
                if prompt == "/quit" || prompt == "/exit" {
                    break;
                }
                match agency.run(prompt).await {
                    Ok(reply) => println!("{reply}"),
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            manager.shutdown(ShutdownReason::UserInitiated);
        }
    };

    agency::core::run_with_graceful_shutdown(Arc::clone(&manager), repl, || async {
        coordinator.run_cleanup().await;
    })
    .await;

    Ok(())
}
