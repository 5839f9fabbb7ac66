//! Agency：对外的控制面服务
//!
//! 持有树、调用调度器、后端注册表与资源监管器（显式实例，无全局状态）。
//! send_message 在该 actor 的调用许可内跑一个有界的工具循环：每次调用后端前由能力门重新计算可用操作，
//! 后端输出若是工具调用就分发执行并把结果作为观察回给后端，否则即为回复。
//! 本轮条目只在整轮成功后才写入历史。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use tokio::sync::RwLock;

use crate::core::meeting::{Meeting, MeetingCoordinator};
use crate::core::snapshot::{self, AgencySnapshot};
use crate::core::{
    Actor, ActorId, ActorScheduler, AgencyError, AgencyResult, AgencyTree, Capabilities, NewActor,
    Operation,
};
use crate::llm::BackendRegistry;
use crate::memory::Message;
use crate::resources::ResourceSupervisor;
use crate::tools::{
    audit, parse_backend_output, render_tools_prompt, OperationCall, ResourceListing, ToolCall,
    TurnOutput,
};

/// 运行参数（由配置生成）
#[derive(Debug, Clone)]
pub struct AgencySettings {
    /// 单次 send_message 最多执行的工具调用数，之后做一次不带工具的收尾调用
    pub max_tool_steps: usize,
    /// create_agent 工具创建的子节点获得的能力
    pub child_capabilities: Capabilities,
    pub ready_timeout: Duration,
    pub ready_interval: Duration,
}

impl Default for AgencySettings {
    fn default() -> Self {
        Self {
            max_tool_steps: 8,
            child_capabilities: Capabilities::new(),
            ready_timeout: Duration::from_secs(120),
            ready_interval: Duration::from_secs(2),
        }
    }
}

/// 会议计数守卫：存活期间禁止保存快照
struct MeetingGuard<'a>(&'a AtomicUsize);

impl<'a> MeetingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for MeetingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 控制面服务
pub struct Agency {
    tree: RwLock<AgencyTree>,
    scheduler: ActorScheduler,
    backends: BackendRegistry,
    resources: Arc<ResourceSupervisor>,
    settings: AgencySettings,
    workspace_id: StdRwLock<String>,
    meetings_in_flight: AtomicUsize,
}

impl Agency {
    pub fn new(
        tree: AgencyTree,
        backends: BackendRegistry,
        resources: Arc<ResourceSupervisor>,
        settings: AgencySettings,
        workspace_id: impl Into<String>,
    ) -> Self {
        Self {
            tree: RwLock::new(tree),
            scheduler: ActorScheduler::new(),
            backends,
            resources,
            settings,
            workspace_id: StdRwLock::new(workspace_id.into()),
            meetings_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn workspace_id(&self) -> String {
        self.workspace_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn resources(&self) -> &Arc<ResourceSupervisor> {
        &self.resources
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    pub fn settings(&self) -> &AgencySettings {
        &self.settings
    }

    pub fn meetings_in_flight(&self) -> usize {
        self.meetings_in_flight.load(Ordering::SeqCst)
    }

    pub async fn root_id(&self) -> ActorId {
        self.tree.read().await.root_id().to_string()
    }

    // ---- 查询 ----

    pub async fn actor(&self, id: &str) -> AgencyResult<Actor> {
        self.tree.read().await.actor(id).cloned()
    }

    /// 全部 actor（按 id 数值顺序）
    pub async fn actors(&self) -> Vec<Actor> {
        self.tree.read().await.actors().into_iter().cloned().collect()
    }

    pub async fn actor_count(&self) -> usize {
        self.tree.read().await.len()
    }

    /// 能力门此刻会向该 actor 暴露的操作
    pub async fn offered_operations(&self, id: &str) -> AgencyResult<Vec<Operation>> {
        self.tree.read().await.offered_operations(id)
    }

    // ---- 结构修改 ----

    /// 在 parent 下创建 actor（需要 parent 的 create_agent 能力与剩余容量）
    pub async fn create_actor(&self, parent_id: &str, spec: NewActor) -> AgencyResult<ActorId> {
        if let Some(backend) = &spec.backend {
            if !self.backends.contains(backend) {
                return Err(AgencyError::Backend(format!("unknown backend '{backend}'")));
            }
        }
        self.tree.write().await.create_actor(parent_id, spec)
    }

    /// 删除 actor；等待它手上的调用结束
    pub async fn remove_actor(&self, id: &str) -> AgencyResult<Actor> {
        self.tree.read().await.actor(id)?;
        let permit = self.scheduler.acquire(id).await;
        let removed = self.tree.write().await.remove_actor(id);
        drop(permit);
        if removed.is_ok() {
            self.scheduler.forget(id);
        }
        removed
    }

    pub async fn reparent(&self, id: &str, new_parent_id: &str) -> AgencyResult<()> {
        self.tree.write().await.reparent(id, new_parent_id)
    }

    /// 显式的权限操作
    pub async fn set_capability(&self, id: &str, op: Operation, enabled: bool) -> AgencyResult<()> {
        self.tree.write().await.set_capability(id, op, enabled)
    }

    pub async fn set_directive(&self, id: &str, directive: &str) -> AgencyResult<()> {
        let _permit = self.scheduler.acquire(id).await;
        self.tree.write().await.set_directive(id, directive)
    }

    /// 挂载资源：资源必须已在监管器中注册
    pub async fn attach_resource(&self, id: &str, resource_id: &str) -> AgencyResult<()> {
        if !self.resources.contains(resource_id) {
            return Err(AgencyError::NotFound(format!("resource '{resource_id}'")));
        }
        self.tree.write().await.attach_resource(id, resource_id)
    }

    pub async fn detach_resource(&self, id: &str, resource_id: &str) -> AgencyResult<()> {
        self.tree.write().await.detach_resource(id, resource_id)
    }

    // ---- 调用 ----

    /// 外部调用方向 actor 发送消息，返回其回复
    pub async fn send_message(&self, actor_id: &str, text: &str) -> AgencyResult<String> {
        self.tree.read().await.actor(actor_id)?;
        let _permit = self.scheduler.acquire(actor_id).await;
        self.run_turn(actor_id, text.to_string()).await
    }

    /// 向根 actor 发送提示
    pub async fn run(&self, prompt: &str) -> AgencyResult<String> {
        let root_id = self.root_id().await;
        self.send_message(&root_id, prompt).await
    }

    /// 外部调用方召开会议：纪要作为入站条目写入主持人历史并返回
    pub async fn call_meeting(
        &self,
        host_id: &str,
        objective: &str,
        max_turns: usize,
    ) -> AgencyResult<String> {
        self.tree.read().await.check(host_id, Operation::CallMeeting)?;
        let _permit = self.scheduler.acquire(host_id).await;
        let meeting = self.hold_meeting(host_id, objective, max_turns, &[]).await?;
        let summary = meeting.summary();
        self.tree
            .write()
            .await
            .append_history(host_id, [Message::user(summary.clone())])?;
        Ok(summary)
    }

    /// 会议本体；调用方已持有主持人的许可
    async fn hold_meeting(
        &self,
        host_id: &str,
        objective: &str,
        max_turns: usize,
        host_context: &[Message],
    ) -> AgencyResult<Meeting> {
        let children = self.tree.read().await.children(host_id)?;
        if children.is_empty() {
            return Err(AgencyError::NoParticipants(format!(
                "agent '{host_id}' has no child agents"
            )));
        }
        let _permits = self.scheduler.acquire_all(&children).await;
        let _guard = MeetingGuard::enter(&self.meetings_in_flight);
        MeetingCoordinator::new(&self.tree, &self.backends)
            .hold(host_id, objective, max_turns, host_context)
            .await
    }

    /// 启动并等待 actor 用到的资源
    async fn ensure_resources(&self, resource_ids: &[String]) -> AgencyResult<()> {
        for id in resource_ids {
            self.resources
                .ensure_ready(id, self.settings.ready_timeout, self.settings.ready_interval)
                .await?;
        }
        Ok(())
    }

    async fn resource_listings(&self, resource_ids: &[String]) -> Vec<ResourceListing> {
        let mut listings = Vec::with_capacity(resource_ids.len());
        for id in resource_ids {
            listings.push(ResourceListing {
                id: id.clone(),
                operations: self.resources.operations(id).await.unwrap_or_default(),
            });
        }
        listings
    }

    /// 一轮调用（调用方已持有该 actor 的许可）。经由工具递归到子节点，故返回装箱的 future。
    fn run_turn<'a>(&'a self, actor_id: &'a str, prompt: String) -> BoxFuture<'a, AgencyResult<String>> {
        Box::pin(async move {
            let (backend, resource_ids) = {
                let tree = self.tree.read().await;
                let actor = tree.actor(actor_id)?;
                (actor.backend.clone(), actor.resource_ids.clone())
            };
            self.ensure_resources(&resource_ids).await?;
            let client = self.backends.get(&backend)?;

            let mut pending = vec![Message::user(prompt)];
            let mut steps = 0;
            let reply = loop {
                let (mut request, offered) = {
                    let tree = self.tree.read().await;
                    let offered = if steps < self.settings.max_tool_steps {
                        tree.offered_operations(actor_id)?
                    } else {
                        Vec::new()
                    };
                    (tree.actor(actor_id)?.history.clone(), offered)
                };
                request.extend(pending.iter().cloned());
                let listings = if offered.contains(&Operation::CallResource) {
                    self.resource_listings(&resource_ids).await
                } else {
                    Vec::new()
                };
                if let Some(tools_prompt) = render_tools_prompt(&offered, &listings) {
                    request.push(Message::system(tools_prompt));
                }

                let output = client
                    .complete(&request)
                    .await
                    .map_err(AgencyError::Backend)?;
                if offered.is_empty() {
                    break output.trim().to_string();
                }
                match parse_backend_output(&output) {
                    TurnOutput::Reply(text) => break text,
                    TurnOutput::ToolCall(call) => {
                        steps += 1;
                        pending.push(Message::assistant(output.trim()));
                        let observation = match self.dispatch(actor_id, &call, &pending).await {
                            Ok(observation) => observation,
                            Err(e) if e.is_fatal_for_turn() => return Err(e),
                            Err(e) => format!("Error: {e}"),
                        };
                        pending.push(Message::user(observation));
                    }
                }
            };

            pending.push(Message::assistant(reply.clone()));
            self.tree.write().await.append_history(actor_id, pending)?;
            tracing::debug!(agent_id = %actor_id, tool_steps = steps, "turn completed");
            Ok(reply)
        })
    }

    /// 分发一次工具调用，输出审计日志
    async fn dispatch(
        &self,
        actor_id: &str,
        call: &ToolCall,
        pending: &[Message],
    ) -> AgencyResult<String> {
        let started = Instant::now();
        let result = self.dispatch_inner(actor_id, call, pending).await;
        audit(actor_id, &call.tool, &call.args, started, &result);
        result
    }

    async fn dispatch_inner(
        &self,
        actor_id: &str,
        call: &ToolCall,
        pending: &[Message],
    ) -> AgencyResult<String> {
        let op_call = OperationCall::parse(call)?;
        // 能力门在分发时重新求值：不可用却被调用时给出拒绝原因
        self.tree.read().await.check(actor_id, op_call.operation())?;

        match op_call {
            OperationCall::CreateAgent(args) => {
                let spec = NewActor::new(args.name.clone(), args.directive)
                    .with_capabilities(self.settings.child_capabilities.clone());
                let id = self.tree.write().await.create_actor(actor_id, spec)?;
                Ok(format!("Created agent: {} with ID: {}", args.name, id))
            }
            OperationCall::SendMessage(args) => {
                if !self.tree.read().await.actor(actor_id)?.has_child(&args.agent_id) {
                    return Err(AgencyError::PermissionDenied(format!(
                        "agent '{}' is not a child of '{actor_id}'",
                        args.agent_id
                    )));
                }
                let _permit = self.scheduler.acquire(&args.agent_id).await;
                self.run_turn(&args.agent_id, args.message).await
            }
            OperationCall::CallMeeting(args) => {
                let meeting = self
                    .hold_meeting(actor_id, &args.objective, args.max_turns, pending)
                    .await?;
                Ok(meeting.summary())
            }
            OperationCall::InternalMonologue(args) => {
                tracing::debug!(agent_id = %actor_id, thought_len = args.thought.len(), "internal monologue");
                Ok("Internal monologue saved.".to_string())
            }
            OperationCall::CallResource(args) => {
                let attached = self
                    .tree
                    .read()
                    .await
                    .actor(actor_id)?
                    .resource_ids
                    .contains(&args.resource);
                if !attached {
                    return Err(AgencyError::PermissionDenied(format!(
                        "resource '{}' is not attached to '{actor_id}'",
                        args.resource
                    )));
                }
                self.resources
                    .call(&args.resource, &args.operation, args.arguments)
                    .await
            }
        }
    }

    // ---- 快照 ----

    /// 捕获快照；有会议进行中时拒绝
    pub async fn save(&self) -> AgencyResult<AgencySnapshot> {
        // 会议在请求写锁之前已登记，持锁后再看计数
        let tree = self.tree.read().await;
        if self.meetings_in_flight() > 0 {
            return Err(AgencyError::MeetingInProgress(
                "cannot snapshot while a meeting is running".to_string(),
            ));
        }
        Ok(AgencySnapshot::capture(&tree, &self.workspace_id()))
    }

    /// 用快照替换当前树，返回 Corrupt 警告
    pub async fn restore(&self, snapshot: AgencySnapshot) -> AgencyResult<Vec<AgencyError>> {
        let report = snapshot::restore(snapshot);
        for actor in report.tree.actors() {
            if !self.backends.contains(&actor.backend) {
                tracing::warn!(agent_id = %actor.id, backend = %actor.backend, "restored agent uses an unregistered backend");
            }
        }

        let mut tree = self.tree.write().await;
        if self.meetings_in_flight() > 0 {
            return Err(AgencyError::MeetingInProgress(
                "cannot restore while a meeting is running".to_string(),
            ));
        }
        *tree = report.tree;
        *self
            .workspace_id
            .write()
            .unwrap_or_else(|e| e.into_inner()) = report.workspace_id;
        Ok(report.warnings)
    }

    /// 整体关闭：尽力停止全部资源
    pub async fn shutdown(&self) {
        tracing::info!("agency shutting down");
        self.resources.stop_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    use crate::core::{capabilities_of, TreeLimits};
    use crate::llm::{LlmClient, MockLlmClient, ScriptedLlmClient};
    use crate::memory::Role;
    use crate::resources::ResourceProvider;

    fn delegator() -> Capabilities {
        capabilities_of(&[
            Operation::CreateAgent,
            Operation::SendMessage,
            Operation::CallMeeting,
            Operation::InternalMonologue,
        ])
    }

    fn agency_with(backends: BackendRegistry, root_backend: &str) -> Agency {
        let root = NewActor::new("main_agent", "You lead.").with_capabilities(delegator());
        let tree = AgencyTree::new(root, root_backend, TreeLimits::default());
        Agency::new(
            tree,
            backends,
            Arc::new(ResourceSupervisor::new()),
            AgencySettings {
                ready_timeout: Duration::from_millis(200),
                ready_interval: Duration::from_millis(10),
                ..Default::default()
            },
            "workspace_test",
        )
    }

    fn tool(name: &str, args: Value) -> String {
        serde_json::json!({"tool": name, "args": args}).to_string()
    }

    #[tokio::test]
    async fn test_send_message_records_turn() {
        let agency = agency_with(BackendRegistry::new().with("mock", Arc::new(MockLlmClient)), "mock");
        let reply = agency.send_message("0", "hello").await.unwrap();
        assert_eq!(reply, "Echo from Mock: hello");

        let root = agency.actor("0").await.unwrap();
        let roles: Vec<Role> = root.history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_backend_error_leaves_history_untouched() {
        let agency = agency_with(
            BackendRegistry::new().with("down", Arc::new(ScriptedLlmClient::failing("503"))),
            "down",
        );
        let err = agency.send_message("0", "hello").await.unwrap_err();
        assert_eq!(err, AgencyError::Backend("503".to_string()));
        assert_eq!(agency.actor("0").await.unwrap().history.len(), 1);
        assert!(matches!(
            agency.send_message("9", "x").await,
            Err(AgencyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tools_follow_live_tree_state() {
        let script = Arc::new(ScriptedLlmClient::new([
            tool("create_agent", serde_json::json!({"name": "writer", "directive": "You write."})),
            "Done.".to_string(),
        ]));
        let agency = agency_with(BackendRegistry::new().with("s", script.clone()), "s");
        let reply = agency.send_message("0", "build a team").await.unwrap();
        assert_eq!(reply, "Done.");

        let requests = script.requests();
        let tools_of = |request: &Vec<Message>| request.last().unwrap().content.clone();
        // 第一次调用：没有子节点，只暴露 create_agent 与 internal_monologue
        let first = tools_of(&requests[0]);
        assert!(first.contains("\"create_agent\""));
        assert!(!first.contains("\"send_message\""));
        // 第二次调用：已有子节点，send_message / call_meeting 出现
        let second = tools_of(&requests[1]);
        assert!(second.contains("\"send_message\""));
        assert!(second.contains("\"call_meeting\""));
        assert!(requests[1]
            .iter()
            .any(|m| m.content == "Created agent: writer with ID: 1"));

        let child = agency.actor("1").await.unwrap();
        assert_eq!(child.backend, "s");
        assert_eq!(child.parent_id.as_deref(), Some("0"));
        assert!(child.capabilities.is_empty());

        // 工具提示不进入历史
        let root = agency.actor("0").await.unwrap();
        assert!(root.history.iter().all(|m| m.role != Role::System || m.content == "You lead."));
        assert_eq!(root.history.len(), 5);
    }

    #[tokio::test]
    async fn test_unavailable_tool_is_reported_to_backend() {
        let script = Arc::new(ScriptedLlmClient::new([
            tool("send_message", serde_json::json!({"agent_id": "1", "message": "hi"})),
            "Understood.".to_string(),
        ]));
        let agency = agency_with(BackendRegistry::new().with("s", script.clone()), "s");
        let reply = agency.send_message("0", "delegate").await.unwrap();
        assert_eq!(reply, "Understood.");
        let observation = &script.requests()[1];
        assert!(observation
            .iter()
            .any(|m| m.content.starts_with("Error: Permission denied")));
    }

    #[tokio::test]
    async fn test_delegation_reaches_child_history() {
        let root = Arc::new(ScriptedLlmClient::new([
            tool("send_message", serde_json::json!({"agent_id": "1", "message": "summarize"})),
            "All set.".to_string(),
        ]));
        let agency = agency_with(
            BackendRegistry::new()
                .with("root", root.clone())
                .with("mock", Arc::new(MockLlmClient)),
            "root",
        );
        agency
            .create_actor("0", NewActor::new("a", "Help.").with_backend("mock"))
            .await
            .unwrap();
        let reply = agency.send_message("0", "go").await.unwrap();
        assert_eq!(reply, "All set.");
        assert_eq!(root.call_count(), 2);
        assert!(root.requests()[1]
            .iter()
            .any(|m| m.content == "Echo from Mock: summarize"));

        let child = agency.actor("1").await.unwrap();
        let contents: Vec<&str> = child.history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Help.", "summarize", "Echo from Mock: summarize"]);
    }

    #[tokio::test]
    async fn test_tool_step_budget_forces_final_answer() {
        let looping = Arc::new(
            ScriptedLlmClient::new(Vec::<String>::new()).with_fallback(Ok(tool(
                "internal_monologue",
                serde_json::json!({"thought": "hmm"}),
            ))),
        );
        let root = NewActor::new("main_agent", "You think.")
            .with_capabilities(capabilities_of(&[Operation::InternalMonologue]));
        let agency = Agency::new(
            AgencyTree::new(root, "loop", TreeLimits::default()),
            BackendRegistry::new().with("loop", looping.clone()),
            Arc::new(ResourceSupervisor::new()),
            AgencySettings {
                max_tool_steps: 2,
                ..Default::default()
            },
            "w",
        );
        let reply = agency.send_message("0", "think").await.unwrap();
        assert_eq!(looping.call_count(), 3);
        assert!(reply.contains("internal_monologue"));
        let last_request = looping.requests().pop().unwrap();
        assert_eq!(last_request.last().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn test_call_meeting_appends_summary_to_host() {
        let agency = agency_with(BackendRegistry::new().with("mock", Arc::new(MockLlmClient)), "mock");
        assert!(matches!(
            agency.call_meeting("0", "nothing", 2).await,
            Err(AgencyError::NoParticipants(_))
        ));
        assert_eq!(agency.actor("0").await.unwrap().history.len(), 1);

        agency.create_actor("0", NewActor::new("a", "A")).await.unwrap();
        let summary = agency.call_meeting("0", "sync", 1).await.unwrap();
        assert!(summary.starts_with("Meeting complete. Summary:"));
        let root = agency.actor("0").await.unwrap();
        assert_eq!(root.history.last().unwrap().content, summary);
        assert_eq!(agency.meetings_in_flight(), 0);
        assert_eq!(agency.actor_count().await, 2);
    }

    /// 后端：记录同时在途的调用数
    struct SlowClient {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for SlowClient {
        async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("ok".to_string())
        }
    }

    #[tokio::test]
    async fn test_invocations_serialized_per_actor() {
        let slow = Arc::new(SlowClient {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let agency = Arc::new(agency_with(BackendRegistry::new().with("slow", slow.clone()), "slow"));
        agency.create_actor("0", NewActor::new("a", "A")).await.unwrap();

        let same: Vec<_> = (0..3)
            .map(|i| {
                let agency = agency.clone();
                tokio::spawn(async move { agency.send_message("1", &format!("m{i}")).await })
            })
            .collect();
        for handle in same {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(slow.peak.load(Ordering::SeqCst), 1);
        assert_eq!(agency.actor("1").await.unwrap().history.len(), 7);

        slow.peak.store(0, Ordering::SeqCst);
        let (a, b) = tokio::join!(agency.send_message("0", "x"), agency.send_message("1", "y"));
        a.unwrap();
        b.unwrap();
        assert_eq!(slow.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_save_rejected_during_meeting() {
        let agency = agency_with(BackendRegistry::new().with("mock", Arc::new(MockLlmClient)), "mock");
        let _guard = MeetingGuard::enter(&agency.meetings_in_flight);
        assert!(matches!(
            agency.save().await,
            Err(AgencyError::MeetingInProgress(_))
        ));
    }

    /// 第一次调用停在 release 上，之后立即返回
    struct GatedClient {
        calls: AtomicUsize,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl LlmClient for GatedClient {
        async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok("noted".to_string())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_snapshot_rejected_while_meeting_awaits_backend() {
        let gate = Arc::new(GatedClient {
            calls: AtomicUsize::new(0),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let agency = Arc::new(agency_with(
            BackendRegistry::new()
                .with("mock", Arc::new(MockLlmClient))
                .with("gate", gate.clone()),
            "mock",
        ));
        agency
            .create_actor(
                "0",
                NewActor::new("a", "A")
                    .with_backend("gate")
                    .with_capabilities(capabilities_of(&[Operation::InternalMonologue])),
            )
            .await
            .unwrap();
        let before = agency.save().await.unwrap();

        let meeting = {
            let agency = agency.clone();
            tokio::spawn(async move { agency.call_meeting("0", "Plan", 1).await })
        };
        gate.entered.notified().await;

        assert!(agency.actor("1").await.unwrap().capabilities.is_empty());
        assert!(matches!(
            agency.restore(before.clone()).await,
            Err(AgencyError::MeetingInProgress(_))
        ));
        assert!(matches!(
            agency.save().await,
            Err(AgencyError::MeetingInProgress(_))
        ));
        assert!(agency.actor("1").await.unwrap().capabilities.is_empty());

        gate.release.notify_one();
        meeting.await.unwrap().unwrap();

        let child = agency.actor("1").await.unwrap();
        assert_eq!(child.capabilities, capabilities_of(&[Operation::InternalMonologue]));
        let after = agency.save().await.unwrap();
        assert_eq!(after.actors[1].capabilities, before.actors[1].capabilities);
        assert!(agency.restore(before).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_restore_in_place() {
        let agency = agency_with(BackendRegistry::new().with("mock", Arc::new(MockLlmClient)), "mock");
        agency.create_actor("0", NewActor::new("a", "A")).await.unwrap();
        agency.send_message("1", "hi").await.unwrap();
        let snapshot = agency.save().await.unwrap();

        agency.remove_actor("1").await.unwrap();
        assert_eq!(agency.actor_count().await, 1);

        let warnings = agency.restore(snapshot.clone()).await.unwrap();
        assert!(warnings.is_empty());
        assert_eq!(agency.actors().await, snapshot.actors);
        assert_eq!(agency.workspace_id(), "workspace_test");
    }

    /// 资源：探测结果可控
    struct FlakyResource {
        ready: AtomicBool,
    }

    #[async_trait]
    impl ResourceProvider for FlakyResource {
        fn kind(&self) -> &str {
            "flaky"
        }

        async fn serve(&self, shutdown: CancellationToken) -> Result<(), String> {
            shutdown.cancelled().await;
            Ok(())
        }

        async fn probe(&self) -> Result<Vec<String>, String> {
            if self.ready.load(Ordering::SeqCst) {
                Ok(vec!["lookup".to_string()])
            } else {
                Err("warming up".to_string())
            }
        }

        async fn call(&self, _operation: &str, args: Value) -> Result<String, String> {
            Ok(format!("found {}", args["q"]))
        }
    }

    #[tokio::test]
    async fn test_resource_must_be_ready_before_turn() {
        let script = Arc::new(ScriptedLlmClient::new([
            tool(
                "call_resource",
                serde_json::json!({"resource": "db", "operation": "lookup", "arguments": {"q": "x"}}),
            ),
            "Found it.".to_string(),
        ]));
        let agency = agency_with(BackendRegistry::new().with("s", script.clone()), "s");
        let resource = Arc::new(FlakyResource {
            ready: AtomicBool::new(false),
        });
        agency.resources().register("db", resource.clone()).unwrap();
        assert!(matches!(
            agency.attach_resource("0", "nope").await,
            Err(AgencyError::NotFound(_))
        ));
        agency.attach_resource("0", "db").await.unwrap();
        agency.set_capability("0", Operation::CallResource, true).await.unwrap();

        let err = agency.send_message("0", "look up x").await.unwrap_err();
        assert!(matches!(err, AgencyError::ResourceUnavailable(_)));
        assert_eq!(script.call_count(), 0);
        assert_eq!(agency.actor("0").await.unwrap().history.len(), 1);

        resource.ready.store(true, Ordering::SeqCst);
        let reply = agency.send_message("0", "look up x").await.unwrap();
        assert_eq!(reply, "Found it.");
        assert!(script.requests()[0]
            .last()
            .unwrap()
            .content
            .contains("- db: lookup"));
        assert!(script.requests()[1]
            .iter()
            .any(|m| m.content == "found \"x\""));
        agency.shutdown().await;
        assert!(!agency.resources().is_running("db"));
    }
}
