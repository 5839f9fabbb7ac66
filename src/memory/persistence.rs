//! 快照文件持久化
//!
//! 快照写入 `<dir>/<uuid>.json` 或 `.yaml`，按扩展名读取；编码只是载体，字段集合由 AgencySnapshot 决定。

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tokio::fs;

use crate::core::AgencySnapshot;

/// 快照文件编码
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Yaml,
}

impl SnapshotFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SnapshotFormat::Json => "json",
            SnapshotFormat::Yaml => "yaml",
        }
    }

    /// 由文件扩展名推断编码
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(SnapshotFormat::Json),
            "yaml" | "yml" => Some(SnapshotFormat::Yaml),
            _ => None,
        }
    }
}

/// 快照目录
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 保存快照，返回文件路径；目录不存在时自动创建
    pub async fn save(&self, snapshot: &AgencySnapshot, format: SnapshotFormat) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create snapshot dir {}", self.dir.display()))?;
        let path = self
            .dir
            .join(format!("{}.{}", uuid::Uuid::new_v4(), format.extension()));
        let content = match format {
            SnapshotFormat::Json => serde_json::to_string_pretty(snapshot)?,
            SnapshotFormat::Yaml => serde_yaml::to_string(snapshot)?,
        };
        fs::write(&path, content)
            .await
            .with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(path)
    }

    /// 按扩展名读取快照文件
    pub async fn load(path: &Path) -> anyhow::Result<AgencySnapshot> {
        let Some(format) = SnapshotFormat::from_path(path) else {
            bail!("unsupported snapshot file: {}", path.display());
        };
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("read snapshot {}", path.display()))?;
        let snapshot = match format {
            SnapshotFormat::Json => serde_json::from_str(&content)
                .with_context(|| format!("parse JSON snapshot {}", path.display()))?,
            SnapshotFormat::Yaml => serde_yaml::from_str(&content)
                .with_context(|| format!("parse YAML snapshot {}", path.display()))?,
        };
        Ok(snapshot)
    }

    /// 列出目录下的快照文件（按修改时间从新到旧）；目录不存在时为空
    pub async fn list(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("list {}", self.dir.display())),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if SnapshotFormat::from_path(&path).is_none() {
                continue;
            }
            let modified = entry.metadata().await.and_then(|m| m.modified()).ok();
            files.push((modified, path));
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }
}
