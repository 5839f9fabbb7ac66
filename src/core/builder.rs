//! Agency 构建器：从配置装配树、后端与资源
//!
//! 配置里的资源以 CommandResource 注册；测试与嵌入方可以额外注入后端与资源，或从快照恢复。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::snapshot::AgencySnapshot;
use crate::core::{
    capabilities_of, Agency, AgencyError, AgencyResult, AgencySettings, AgencyTree, NewActor,
};
use crate::llm::{BackendRegistry, LlmClient, MockLlmClient};
use crate::resources::{CommandResource, ResourceProvider, ResourceSupervisor};

/// Agency 构建器
pub struct AgencyBuilder {
    config: AppConfig,
    backends: BackendRegistry,
    extra_resources: Vec<(String, Arc<dyn ResourceProvider>)>,
    snapshot: Option<AgencySnapshot>,
}

/// 构建结果：服务本体与恢复快照时产生的警告
pub struct BuiltAgency {
    pub agency: Agency,
    pub warnings: Vec<AgencyError>,
}

impl AgencyBuilder {
    /// 创建新的构建器；内置 mock 后端总是可用
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            backends: BackendRegistry::new().with("mock", Arc::new(MockLlmClient)),
            extra_resources: Vec::new(),
            snapshot: None,
        }
    }

    /// 注册（或替换）一个命名后端
    pub fn with_backend(mut self, name: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        self.backends.register(name, client);
        self
    }

    /// 注册一个配置之外的资源
    pub fn with_resource(mut self, id: impl Into<String>, provider: Arc<dyn ResourceProvider>) -> Self {
        self.extra_resources.push((id.into(), provider));
        self
    }

    /// 从快照恢复而不是新建根节点
    pub fn with_snapshot(mut self, snapshot: AgencySnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 运行参数
    pub fn build_settings(&self) -> AgencySettings {
        AgencySettings {
            max_tool_steps: self.config.agency.max_tool_steps,
            child_capabilities: capabilities_of(&self.config.agency.child_capabilities),
            ready_timeout: self.config.resources.ready_timeout(),
            ready_interval: self.config.resources.ready_interval(),
        }
    }

    /// 资源监管器：配置中的资源 + 额外注入的资源
    pub fn build_resources(&self) -> AgencyResult<Arc<ResourceSupervisor>> {
        let supervisor = ResourceSupervisor::new();
        for entry in &self.config.resources.providers {
            supervisor.register(entry.id.clone(), Arc::new(CommandResource::new(entry)))?;
        }
        for (id, provider) in &self.extra_resources {
            supervisor.register(id.clone(), Arc::clone(provider))?;
        }
        Ok(Arc::new(supervisor))
    }

    /// 只有根节点的新树
    pub fn build_tree(&self) -> AgencyResult<AgencyTree> {
        let section = &self.config.agency;
        if !self.backends.contains(&section.default_backend) {
            return Err(AgencyError::Backend(format!(
                "default backend '{}' is not registered",
                section.default_backend
            )));
        }
        let root = NewActor::new(section.root_name.clone(), section.root_directive.clone())
            .with_capabilities(capabilities_of(&section.root_capabilities))
            .with_resources(section.root_resources.clone());
        Ok(AgencyTree::new(root, section.default_backend.clone(), section.limits()))
    }

    /// 装配完整的 Agency
    pub async fn build(self) -> AgencyResult<BuiltAgency> {
        let resources = self.build_resources()?;
        for id in &self.config.agency.root_resources {
            if !resources.contains(id) {
                return Err(AgencyError::NotFound(format!("resource '{id}'")));
            }
        }
        let settings = self.build_settings();
        let tree = self.build_tree()?;
        let agency = Agency::new(
            tree,
            self.backends.clone(),
            resources,
            settings,
            self.config.agency.workspace_id(),
        );

        let warnings = match self.snapshot {
            Some(snapshot) => agency.restore(snapshot).await?,
            None => Vec::new(),
        };
        tracing::info!(
            workspace_id = %agency.workspace_id(),
            backends = ?agency.backends().names(),
            resources = ?agency.resources().ids(),
            "agency ready"
        );
        Ok(BuiltAgency { agency, warnings })
    }
}

/// 便捷函数：从默认路径加载配置创建构建器，加载失败时使用默认配置
pub fn create_agency_builder(config_path: Option<PathBuf>) -> AgencyBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    AgencyBuilder::new(config)
}
