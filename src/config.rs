//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AGENCY__*` 覆盖（双下划线表示嵌套，如 `AGENCY__AGENCY__MAX_DEPTH=4`）。
//! 每个字段都有默认值，空文件也是合法配置。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{Operation, TreeLimits};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agency: AgencySection,
    pub resources: ResourcesSection,
}

/// [app] 段：应用名、快照目录、日志格式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 快照文件目录
    pub snapshot_dir: PathBuf,
    /// pretty / json
    pub log_format: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            snapshot_dir: PathBuf::from("conversations"),
            log_format: "pretty".to_string(),
        }
    }
}

impl AppSection {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// [agency] 段：树容量、根节点与默认能力
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgencySection {
    /// 未设置时生成 workspace_<8 位十六进制>
    pub workspace_id: Option<String>,
    pub root_name: String,
    pub root_directive: String,
    pub default_backend: String,
    pub max_depth: usize,
    pub max_breadth: usize,
    pub max_agents: usize,
    /// 单次 send_message 中最多执行的工具调用数
    pub max_tool_steps: usize,
    pub root_capabilities: Vec<Operation>,
    /// create_agent 工具创建的子节点获得的能力
    pub child_capabilities: Vec<Operation>,
    pub root_resources: Vec<String>,
}

impl Default for AgencySection {
    fn default() -> Self {
        Self {
            workspace_id: None,
            root_name: "main_agent".to_string(),
            root_directive: "You are a helpful assistant.".to_string(),
            default_backend: "mock".to_string(),
            max_depth: 3,
            max_breadth: 3,
            max_agents: 10,
            max_tool_steps: 8,
            root_capabilities: vec![
                Operation::CreateAgent,
                Operation::SendMessage,
                Operation::CallMeeting,
                Operation::InternalMonologue,
            ],
            child_capabilities: Vec::new(),
            root_resources: Vec::new(),
        }
    }
}

impl AgencySection {
    pub fn limits(&self) -> TreeLimits {
        TreeLimits {
            max_depth: self.max_depth,
            max_breadth: self.max_breadth,
            max_agents: self.max_agents,
        }
    }

    pub fn workspace_id(&self) -> String {
        self.workspace_id.clone().unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("workspace_{}", &id[..8])
        })
    }
}

/// [resources] 段：就绪等待参数与资源列表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResourcesSection {
    pub ready_timeout_secs: u64,
    pub ready_interval_secs: u64,
    pub providers: Vec<ResourceEntry>,
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            ready_timeout_secs: 120,
            ready_interval_secs: 2,
            providers: Vec::new(),
        }
    }
}

impl ResourcesSection {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn ready_interval(&self) -> Duration {
        Duration::from_secs(self.ready_interval_secs)
    }
}

/// [[resources.providers]] 条目：可选常驻进程 + 若干操作
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceEntry {
    pub id: String,
    /// 常驻进程；为空时资源只是一组命令
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub operations: Vec<ResourceOperationEntry>,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_call_timeout_secs() -> u64 {
    30
}

/// 资源操作：程序 + 参数模板（{{key}} 从调用参数替换）
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceOperationEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// 从 config 目录加载配置，环境变量 AGENCY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AGENCY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AGENCY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
