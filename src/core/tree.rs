//! AgencyTree：actor 的唯一拥有者（id → Actor 的 arena）
//!
//! 维护不变量：父子关系无环且成树；depth(root)=0，depth(actor)=depth(parent)+1；
//! |children| ≤ max_breadth；actor 总数 ≤ max_agents。
//! 所有修改先校验再提交，失败时树保持原样。

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::capability::{self, GateContext, Operation};
use crate::core::{Actor, ActorId, AgencyError, AgencyResult, Capabilities, NewActor};
use crate::memory::Message;

/// 树容量上限
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeLimits {
    pub max_depth: usize,
    pub max_breadth: usize,
    pub max_agents: usize,
}

impl Default for TreeLimits {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_breadth: 3,
            max_agents: 10,
        }
    }
}

/// 按数值顺序排列 id（"2" 在 "10" 之前），非数字 id 排在最后
pub(crate) fn id_order(id: &str) -> (u64, String) {
    (id.parse::<u64>().unwrap_or(u64::MAX), id.to_string())
}

/// Actor 树
#[derive(Clone, Debug)]
pub struct AgencyTree {
    root_id: ActorId,
    actors: HashMap<ActorId, Actor>,
    next_id: u64,
    limits: TreeLimits,
}

impl AgencyTree {
    /// 新建只有根节点的树：根 id 为 "0"，计数器从 1 开始
    pub fn new(root: NewActor, backend: impl Into<String>, limits: TreeLimits) -> Self {
        let backend = root.backend.clone().unwrap_or_else(|| backend.into());
        let root_id: ActorId = "0".to_string();
        let mut actors = HashMap::new();
        actors.insert(root_id.clone(), Actor::new(root_id.clone(), root, backend));
        Self {
            root_id,
            actors,
            next_id: 1,
            limits,
        }
    }

    /// 由快照恢复时使用：调用方负责连线已经过校验
    pub(crate) fn from_parts(
        root_id: ActorId,
        actors: HashMap<ActorId, Actor>,
        next_id: u64,
        limits: TreeLimits,
    ) -> Self {
        Self {
            root_id,
            actors,
            next_id,
            limits,
        }
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn limits(&self) -> TreeLimits {
        self.limits
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actors.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Actor> {
        self.actors.get(id)
    }

    pub fn actor(&self, id: &str) -> AgencyResult<&Actor> {
        self.actors
            .get(id)
            .ok_or_else(|| AgencyError::NotFound(format!("agent '{id}'")))
    }

    fn actor_mut(&mut self, id: &str) -> AgencyResult<&mut Actor> {
        self.actors
            .get_mut(id)
            .ok_or_else(|| AgencyError::NotFound(format!("agent '{id}'")))
    }

    /// 全部 actor，按 id 数值顺序
    pub fn actors(&self) -> Vec<&Actor> {
        let mut all: Vec<&Actor> = self.actors.values().collect();
        all.sort_by_key(|a| id_order(&a.id));
        all
    }

    pub fn children(&self, id: &str) -> AgencyResult<Vec<ActorId>> {
        Ok(self.actor(id)?.child_ids.clone())
    }

    /// 沿 parent 回溯计算深度；孤儿节点深度为 0
    pub fn depth(&self, id: &str) -> AgencyResult<usize> {
        let mut depth = 0;
        let mut current = self.actor(id)?;
        while let Some(parent_id) = current.parent_id.as_deref() {
            match self.actors.get(parent_id) {
                Some(parent) => {
                    depth += 1;
                    current = parent;
                }
                None => break,
            }
            if depth > self.actors.len() {
                // 只有损坏的数据才会走到这里；restore 已经断环
                break;
            }
        }
        Ok(depth)
    }

    /// id 是否为 ancestor 的后代（含自身）
    fn is_descendant_or_self(&self, id: &str, ancestor: &str) -> bool {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            current = self.actors.get(cur).and_then(|a| a.parent_id.as_deref());
            steps += 1;
            if steps > self.actors.len() {
                break;
            }
        }
        false
    }

    /// 子树高度（叶子为 0）
    fn subtree_height(&self, id: &str) -> usize {
        let mut seen = HashSet::new();
        self.height_inner(id, &mut seen)
    }

    fn height_inner(&self, id: &str, seen: &mut HashSet<String>) -> usize {
        if !seen.insert(id.to_string()) {
            return 0;
        }
        self.actors
            .get(id)
            .map(|a| {
                a.child_ids
                    .iter()
                    .map(|c| 1 + self.height_inner(c, seen))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// 供能力门使用的实时上下文
    pub fn gate_context(&self, id: &str) -> AgencyResult<GateContext> {
        let actor = self.actor(id)?;
        Ok(GateContext {
            depth: self.depth(id)?,
            child_count: actor.child_ids.len(),
            resource_count: actor.resource_ids.len(),
            total_actors: self.actors.len(),
            max_depth: self.limits.max_depth,
            max_breadth: self.limits.max_breadth,
            max_agents: self.limits.max_agents,
        })
    }

    /// 此刻可以暴露给该 actor 的操作
    pub fn offered_operations(&self, id: &str) -> AgencyResult<Vec<Operation>> {
        let ctx = self.gate_context(id)?;
        Ok(capability::offered(&self.actor(id)?.capabilities, &ctx))
    }

    /// 判定 actor 调用某操作是否被允许，给出拒绝原因
    pub fn check(&self, id: &str, op: Operation) -> AgencyResult<()> {
        let ctx = self.gate_context(id)?;
        capability::check(op, &self.actor(id)?.capabilities, &ctx)
    }

    fn allocate_id(&mut self) -> AgencyResult<ActorId> {
        loop {
            let current = self.next_id;
            self.next_id = current.checked_add(1).ok_or_else(|| {
                AgencyError::CapacityExceeded("actor id space exhausted".to_string())
            })?;
            let id = current.to_string();
            if !self.actors.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    /// 在 parent 下创建 actor：需要 parent 的 create_agent 能力与剩余容量
    pub fn create_actor(&mut self, parent_id: &str, spec: NewActor) -> AgencyResult<ActorId> {
        self.check(parent_id, Operation::CreateAgent)?;

        let parent_backend = self.actor(parent_id)?.backend.clone();
        let backend = spec.backend.clone().unwrap_or(parent_backend);
        let id = self.allocate_id()?;
        let mut actor = Actor::new(id.clone(), spec, backend);
        actor.parent_id = Some(parent_id.to_string());
        self.actors.insert(id.clone(), actor);
        self.actor_mut(parent_id)?.add_child(&id);
        tracing::info!(agent_id = %id, parent_id = %parent_id, "agent created");
        Ok(id)
    }

    /// 删除 actor：子节点变为孤儿（不级联删除），从父节点的子集合中移除
    pub fn remove_actor(&mut self, id: &str) -> AgencyResult<Actor> {
        let actor = self.actor(id)?;
        if id == self.root_id {
            return Err(AgencyError::PermissionDenied(
                "the root agent cannot be removed".to_string(),
            ));
        }
        let parent_id = actor.parent_id.clone();
        let child_ids = actor.child_ids.clone();

        for child_id in &child_ids {
            if let Some(child) = self.actors.get_mut(child_id) {
                child.parent_id = None;
            }
        }
        if let Some(parent) = parent_id.and_then(|p| self.actors.get_mut(&p)) {
            parent.remove_child(id);
        }
        let removed = self
            .actors
            .remove(id)
            .ok_or_else(|| AgencyError::NotFound(format!("agent '{id}'")))?;
        tracing::info!(agent_id = %id, orphaned = child_ids.len(), "agent removed");
        Ok(removed)
    }

    /// 把 actor 挂到新父节点下；拒绝成环与超出容量
    pub fn reparent(&mut self, id: &str, new_parent_id: &str) -> AgencyResult<()> {
        let actor = self.actor(id)?;
        let new_parent = self.actor(new_parent_id)?;
        if id == self.root_id {
            return Err(AgencyError::PermissionDenied(
                "the root agent cannot be reparented".to_string(),
            ));
        }
        if new_parent.has_child(id) {
            return Ok(());
        }
        if self.is_descendant_or_self(new_parent_id, id) {
            return Err(AgencyError::InvalidArgument(format!(
                "moving '{id}' under '{new_parent_id}' would create a cycle"
            )));
        }
        if new_parent.child_ids.len() >= self.limits.max_breadth {
            return Err(AgencyError::CapacityExceeded(format!(
                "max breadth {} reached",
                self.limits.max_breadth
            )));
        }
        let new_depth = self.depth(new_parent_id)? + 1 + self.subtree_height(id);
        if new_depth > self.limits.max_depth {
            return Err(AgencyError::CapacityExceeded(format!(
                "max depth {} reached",
                self.limits.max_depth
            )));
        }

        let old_parent = actor.parent_id.clone();
        if let Some(old) = old_parent.and_then(|p| self.actors.get_mut(&p)) {
            old.remove_child(id);
        }
        self.actor_mut(new_parent_id)?.add_child(id);
        self.actor_mut(id)?.parent_id = Some(new_parent_id.to_string());
        tracing::info!(agent_id = %id, parent_id = %new_parent_id, "agent reparented");
        Ok(())
    }

    pub fn set_capability(&mut self, id: &str, op: Operation, enabled: bool) -> AgencyResult<()> {
        self.actor_mut(id)?
            .capabilities
            .insert(op.as_str().to_string(), enabled);
        Ok(())
    }

    /// 整体替换能力表，返回旧值（会议的重入保护用）
    pub(crate) fn replace_capabilities(
        &mut self,
        id: &str,
        capabilities: Capabilities,
    ) -> AgencyResult<Capabilities> {
        let actor = self.actor_mut(id)?;
        Ok(std::mem::replace(&mut actor.capabilities, capabilities))
    }

    pub fn set_directive(&mut self, id: &str, directive: &str) -> AgencyResult<()> {
        self.actor_mut(id)?.set_directive(directive);
        Ok(())
    }

    /// 挂载资源（幂等）
    pub fn attach_resource(&mut self, id: &str, resource_id: &str) -> AgencyResult<()> {
        let actor = self.actor_mut(id)?;
        if !actor.resource_ids.iter().any(|r| r == resource_id) {
            actor.resource_ids.push(resource_id.to_string());
        }
        Ok(())
    }

    pub fn detach_resource(&mut self, id: &str, resource_id: &str) -> AgencyResult<()> {
        let actor = self.actor_mut(id)?;
        let before = actor.resource_ids.len();
        actor.resource_ids.retain(|r| r != resource_id);
        if actor.resource_ids.len() == before {
            return Err(AgencyError::NotFound(format!(
                "resource '{resource_id}' on agent '{id}'"
            )));
        }
        Ok(())
    }

    /// 向 actor 的历史追加条目
    pub(crate) fn append_history(
        &mut self,
        id: &str,
        entries: impl IntoIterator<Item = Message>,
    ) -> AgencyResult<()> {
        self.actor_mut(id)?.history.extend(entries);
        Ok(())
    }
}
