//! 能力门（CapabilityGate）：纯判定函数
//!
//! 给定 actor 的能力表与树的实时计数，判断某个操作此刻能否暴露给后端 / 被调用。
//! 每次工具调用前重新求值，不缓存：达到深度/宽度/总数上限后 create_agent 自动隐藏，
//! 没有子节点时 send_message / call_meeting 隐藏。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{AgencyError, AgencyResult};

/// 能力表：操作名 → 是否启用（保留未知操作名，快照原样往返）
pub type Capabilities = BTreeMap<String, bool>;

/// 受能力门控制的操作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreateAgent,
    SendMessage,
    CallMeeting,
    InternalMonologue,
    CallResource,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::CreateAgent,
        Operation::SendMessage,
        Operation::CallMeeting,
        Operation::InternalMonologue,
        Operation::CallResource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateAgent => "create_agent",
            Operation::SendMessage => "send_message",
            Operation::CallMeeting => "call_meeting",
            Operation::InternalMonologue => "internal_monologue",
            Operation::CallResource => "call_resource",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = AgencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| AgencyError::NotFound(format!("unknown operation '{s}'")))
    }
}

/// 构造能力表的便捷函数：列出的操作全部启用
pub fn capabilities_of(ops: &[Operation]) -> Capabilities {
    ops.iter().map(|op| (op.as_str().to_string(), true)).collect()
}

/// 判定所需的 actor 与树的实时状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateContext {
    pub depth: usize,
    pub child_count: usize,
    pub resource_count: usize,
    pub total_actors: usize,
    pub max_depth: usize,
    pub max_breadth: usize,
    pub max_agents: usize,
}

fn enabled(caps: &Capabilities, op: Operation) -> bool {
    caps.get(op.as_str()).copied().unwrap_or(false)
}

/// 此刻是否允许该操作（用于决定是否向后端暴露）
pub fn allowed(op: Operation, caps: &Capabilities, ctx: &GateContext) -> bool {
    check(op, caps, ctx).is_ok()
}

/// 与 allowed 相同的判定，但给出拒绝原因（用于「不可用却仍被调用」的情形）
pub fn check(op: Operation, caps: &Capabilities, ctx: &GateContext) -> AgencyResult<()> {
    if !enabled(caps, op) {
        return Err(AgencyError::PermissionDenied(format!(
            "capability '{op}' is not enabled"
        )));
    }
    match op {
        Operation::CreateAgent => check_capacity(ctx),
        Operation::SendMessage => {
            if ctx.child_count == 0 {
                return Err(AgencyError::PermissionDenied(
                    "no child agents to message".to_string(),
                ));
            }
            Ok(())
        }
        Operation::CallMeeting => {
            if ctx.child_count == 0 {
                return Err(AgencyError::NoParticipants(
                    "no child agents to meet".to_string(),
                ));
            }
            Ok(())
        }
        Operation::CallResource => {
            if ctx.resource_count == 0 {
                return Err(AgencyError::PermissionDenied(
                    "no resources attached".to_string(),
                ));
            }
            Ok(())
        }
        Operation::InternalMonologue => Ok(()),
    }
}

/// 仅检查容量（不看能力表）：在 ctx 所指节点下新建子节点是否超出深度、宽度、总数上限
fn check_capacity(ctx: &GateContext) -> AgencyResult<()> {
    if ctx.depth + 1 > ctx.max_depth {
        return Err(AgencyError::CapacityExceeded(format!(
            "max depth {} reached",
            ctx.max_depth
        )));
    }
    if ctx.child_count >= ctx.max_breadth {
        return Err(AgencyError::CapacityExceeded(format!(
            "max breadth {} reached",
            ctx.max_breadth
        )));
    }
    if ctx.total_actors >= ctx.max_agents {
        return Err(AgencyError::CapacityExceeded(format!(
            "max agents {} reached",
            ctx.max_agents
        )));
    }
    Ok(())
}

/// 当前可暴露给后端的操作列表（按固定顺序）
pub fn offered(caps: &Capabilities, ctx: &GateContext) -> Vec<Operation> {
    Operation::ALL
        .into_iter()
        .filter(|op| allowed(*op, caps, ctx))
        .collect()
}
