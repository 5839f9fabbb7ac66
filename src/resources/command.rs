//! 命令型资源：由配置 [[resources.providers]] 注册
//!
//! 可选的常驻进程（program + args）构成资源的生命周期：serve 拉起进程并持有它，取消时 kill；
//! 每个操作是「程序 + 参数模板」，{{key}} 从调用参数中取 key，执行时无 shell，带超时。
//! 未配置常驻进程时资源只是一组命令，serve 挂起直到取消。

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{ResourceEntry, ResourceOperationEntry};
use crate::resources::ResourceProvider;

/// 从配置项构建的命令型资源
pub struct CommandResource {
    id: String,
    program: String,
    args: Vec<String>,
    operations: Vec<ResourceOperationEntry>,
    call_timeout: Duration,
    alive: Arc<AtomicBool>,
}

impl CommandResource {
    pub fn new(entry: &ResourceEntry) -> Self {
        Self {
            id: entry.id.clone(),
            program: entry.program.clone(),
            args: entry.args.clone(),
            operations: entry.operations.clone(),
            call_timeout: Duration::from_secs(entry.call_timeout_secs),
            alive: Arc::new(AtomicBool::new(false)),
        }
    }

    fn has_process(&self) -> bool {
        !self.program.trim().is_empty()
    }

    /// 替换模板中的 {{key}}；args 为调用方传入的 JSON 对象
    fn substitute(template: &[String], args: &Value) -> Vec<String> {
        let empty = serde_json::Map::new();
        let obj = args.as_object().unwrap_or(&empty);
        template
            .iter()
            .map(|tpl| {
                let mut s = tpl.clone();
                for (k, v) in obj {
                    let placeholder = format!("{{{{{}}}}}", k);
                    let val = match v {
                        Value::String(x) => x.clone(),
                        _ => v.to_string(),
                    };
                    s = s.replace(&placeholder, &val);
                }
                s
            })
            .collect()
    }
}

#[async_trait]
impl ResourceProvider for CommandResource {
    fn kind(&self) -> &str {
        "command"
    }

    async fn serve(&self, shutdown: CancellationToken) -> Result<(), String> {
        if !self.has_process() {
            self.alive.store(true, Ordering::SeqCst);
            shutdown.cancelled().await;
            self.alive.store(false, Ordering::SeqCst);
            return Ok(());
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("spawn '{}' failed: {}", self.program, e))?;
        self.alive.store(true, Ordering::SeqCst);
        tracing::debug!(resource = %self.id, program = %self.program, "resource process spawned");

        let outcome = tokio::select! {
            _ = shutdown.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(resource = %self.id, error = %e, "failed to kill resource process");
                }
                Ok(())
            }
            status = child.wait() => match status {
                Ok(status) => Err(format!("process exited with {status}")),
                Err(e) => Err(format!("wait failed: {e}")),
            },
        };
        self.alive.store(false, Ordering::SeqCst);
        outcome
    }

    async fn probe(&self) -> Result<Vec<String>, String> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(format!("resource '{}' is not running", self.id));
        }
        Ok(self.operations.iter().map(|op| op.name.clone()).collect())
    }

    async fn call(&self, operation: &str, args: Value) -> Result<String, String> {
        let op = self
            .operations
            .iter()
            .find(|op| op.name == operation)
            .ok_or_else(|| format!("unknown operation '{operation}'"))?;
        let args_vec = Self::substitute(&op.args, &args);
        tracing::info!(resource = %self.id, operation, program = %op.program, "resource call");

        let child = Command::new(&op.program)
            .args(&args_vec)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("spawn failed: {}", e))?;
        let output = tokio::time::timeout(self.call_timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("timeout after {}s", self.call_timeout.as_secs()))?
            .map_err(|e| format!("wait failed: {}", e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "exit {:?}: stderr {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
