//! 快照：整棵树的自包含序列化
//!
//! 恢复分两遍：第一遍只建 actor 记录（不连线），第二遍解析 parent/child 引用。
//! 缺失的 id、单边的边、环都不是致命错误：去掉坏边，受影响的 actor 成为孤儿，
//! 以 Corrupt 警告返回给调用方，树总是以「降级但可用」的状态恢复出来。

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::tree::id_order;
use crate::core::{Actor, ActorId, AgencyError, AgencyTree, NewActor, TreeLimits};

/// 快照：有序 actor 列表 + 计数器 + 工作区标识
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgencySnapshot {
    pub workspace_id: String,
    pub root_id: ActorId,
    pub next_id: u64,
    #[serde(default)]
    pub limits: TreeLimits,
    #[serde(default)]
    pub actors: Vec<Actor>,
    #[serde(default = "chrono::Utc::now")]
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

impl AgencySnapshot {
    /// 捕获整棵树（调用方保证没有会议进行中）
    pub fn capture(tree: &AgencyTree, workspace_id: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            root_id: tree.root_id().to_string(),
            next_id: tree.next_id(),
            limits: tree.limits(),
            actors: tree.actors().into_iter().cloned().collect(),
            saved_at: chrono::Utc::now(),
        }
    }
}

/// 恢复结果：可用的树与一路收集的警告
#[derive(Debug)]
pub struct RestoreReport {
    pub tree: AgencyTree,
    pub workspace_id: String,
    pub warnings: Vec<AgencyError>,
}

fn corrupt(warnings: &mut Vec<AgencyError>, message: String) {
    tracing::warn!(warning = %message, "snapshot restore");
    warnings.push(AgencyError::Corrupt(message));
}

/// 从快照重建树
pub fn restore(snapshot: AgencySnapshot) -> RestoreReport {
    let mut warnings = Vec::new();

    // 第一遍：只建记录，连线全部清空，留待第二遍
    let mut actors: HashMap<ActorId, Actor> = HashMap::new();
    let mut claimed_parent: HashMap<ActorId, Option<ActorId>> = HashMap::new();
    let mut claimed_children: HashMap<ActorId, Vec<ActorId>> = HashMap::new();
    let mut order: Vec<ActorId> = Vec::new();
    for mut actor in snapshot.actors {
        if actors.contains_key(&actor.id) {
            corrupt(&mut warnings, format!("duplicate agent id '{}' dropped", actor.id));
            continue;
        }
        claimed_parent.insert(actor.id.clone(), actor.parent_id.take());
        claimed_children.insert(actor.id.clone(), std::mem::take(&mut actor.child_ids));
        order.push(actor.id.clone());
        actors.insert(actor.id.clone(), actor);
    }

    if actors.is_empty() {
        corrupt(&mut warnings, "snapshot has no agents; starting a fresh root".to_string());
        let tree = AgencyTree::new(
            NewActor::new("main_agent", "You are a helpful assistant."),
            "mock",
            snapshot.limits,
        );
        return RestoreReport {
            tree,
            workspace_id: snapshot.workspace_id,
            warnings,
        };
    }

    // 第二遍：父子双方一致的边才保留
    for id in &order {
        for child_id in &claimed_children[id] {
            let agrees = claimed_parent
                .get(child_id)
                .map(|p| p.as_deref() == Some(id.as_str()))
                .unwrap_or(false);
            if !actors.contains_key(child_id) {
                corrupt(
                    &mut warnings,
                    format!("agent '{id}' lists missing child '{child_id}'"),
                );
            } else if !agrees {
                corrupt(
                    &mut warnings,
                    format!("agent '{child_id}' does not name '{id}' as its parent"),
                );
            } else if actors[child_id].parent_id.is_some() {
                corrupt(
                    &mut warnings,
                    format!("agent '{child_id}' listed twice under '{id}'"),
                );
            } else {
                if let Some(child) = actors.get_mut(child_id) {
                    child.parent_id = Some(id.clone());
                }
                if let Some(parent) = actors.get_mut(id) {
                    parent.add_child(child_id);
                }
            }
        }
    }
    for id in &order {
        if let Some(parent_id) = &claimed_parent[id] {
            if actors[id].parent_id.is_some() {
                continue;
            }
            if actors.contains_key(parent_id) {
                corrupt(
                    &mut warnings,
                    format!("agent '{parent_id}' does not list '{id}' as a child; '{id}' orphaned"),
                );
            } else {
                corrupt(
                    &mut warnings,
                    format!("agent '{id}' references missing parent '{parent_id}'; orphaned"),
                );
            }
        }
    }

    break_cycles(&mut actors, &order, &mut warnings);

    let root_id = if actors.contains_key(&snapshot.root_id) {
        snapshot.root_id.clone()
    } else {
        let promoted = order
            .iter()
            .find(|id| actors[*id].parent_id.is_none())
            .or_else(|| order.first())
            .cloned()
            .unwrap_or_default();
        corrupt(
            &mut warnings,
            format!(
                "root '{}' missing; promoting '{promoted}'",
                snapshot.root_id
            ),
        );
        promoted
    };
    if let Some(root) = actors.get_mut(&root_id) {
        if let Some(parent_id) = root.parent_id.take() {
            corrupt(
                &mut warnings,
                format!("root '{root_id}' had parent '{parent_id}'; detached"),
            );
            if let Some(parent) = actors.get_mut(&parent_id) {
                parent.remove_child(&root_id);
            }
        }
    }

    let max_numeric = actors
        .keys()
        .filter_map(|id| id.parse::<u64>().ok())
        .max()
        .map(|n| n.saturating_add(1))
        .unwrap_or(0);
    let next_id = snapshot.next_id.max(max_numeric);

    tracing::info!(
        agents = actors.len(),
        warnings = warnings.len(),
        "snapshot restored"
    );
    RestoreReport {
        tree: AgencyTree::from_parts(root_id, actors, next_id, snapshot.limits),
        workspace_id: snapshot.workspace_id,
        warnings,
    }
}

/// 沿 parent 回溯，发现环就把环上 id 最大的节点变为孤儿
fn break_cycles(
    actors: &mut HashMap<ActorId, Actor>,
    order: &[ActorId],
    warnings: &mut Vec<AgencyError>,
) {
    for start in order {
        let mut path: Vec<ActorId> = Vec::new();
        let mut seen: HashSet<ActorId> = HashSet::new();
        let mut current = Some(start.clone());
        while let Some(id) = current {
            if !seen.insert(id.clone()) {
                let cycle_start = path.iter().position(|p| *p == id).unwrap_or(0);
                let victim = path[cycle_start..]
                    .iter()
                    .max_by_key(|p| id_order(p))
                    .cloned()
                    .unwrap_or(id);
                if let Some(parent_id) = actors.get_mut(&victim).and_then(|a| a.parent_id.take()) {
                    if let Some(parent) = actors.get_mut(&parent_id) {
                        parent.remove_child(&victim);
                    }
                }
                corrupt(warnings, format!("cycle through '{victim}' broken; orphaned"));
                break;
            }
            path.push(id.clone());
            current = actors.get(&id).and_then(|a| a.parent_id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{capabilities_of, Operation};
    use crate::memory::Message;

    fn sample_tree() -> AgencyTree {
        let root = NewActor::new("main_agent", "You lead.").with_capabilities(capabilities_of(&[
            Operation::CreateAgent,
            Operation::SendMessage,
        ]));
        let mut tree = AgencyTree::new(root, "mock", TreeLimits::default());
        let a = tree
            .create_actor(
                "0",
                NewActor::new("a", "A").with_capabilities(capabilities_of(&[Operation::CreateAgent])),
            )
            .unwrap();
        tree.create_actor(&a, NewActor::new("a1", "A1")).unwrap();
        tree.create_actor("0", NewActor::new("b", "B")).unwrap();
        tree.append_history("0", [Message::user("hi"), Message::assistant("hello")])
            .unwrap();
        tree
    }

    fn edges(tree: &AgencyTree) -> Vec<(String, Option<String>, Vec<String>)> {
        tree.actors()
            .into_iter()
            .map(|a| (a.id.clone(), a.parent_id.clone(), a.child_ids.clone()))
            .collect()
    }

    #[test]
    fn test_round_trip_is_identical() {
        let tree = sample_tree();
        let snapshot = AgencySnapshot::capture(&tree, "workspace_1");
        let json = serde_json::to_string(&snapshot).unwrap();
        let report = restore(serde_json::from_str(&json).unwrap());

        assert!(report.warnings.is_empty());
        assert_eq!(report.workspace_id, "workspace_1");
        assert_eq!(report.tree.next_id(), tree.next_id());
        assert_eq!(edges(&report.tree), edges(&tree));
        for (restored, original) in report.tree.actors().into_iter().zip(tree.actors()) {
            assert_eq!(restored, original);
        }
    }

    #[test]
    fn test_missing_child_is_dropped_with_warning() {
        let mut snapshot = AgencySnapshot::capture(&sample_tree(), "w");
        snapshot.actors.retain(|a| a.id != "2");
        let report = restore(snapshot);

        assert_eq!(report.tree.len(), 3);
        assert!(report.tree.actor("1").unwrap().child_ids.is_empty());
        assert!(report
            .warnings
            .iter()
            .all(|w| matches!(w, AgencyError::Corrupt(_))));
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_missing_parent_orphans_actor() {
        let mut snapshot = AgencySnapshot::capture(&sample_tree(), "w");
        snapshot.actors.retain(|a| a.id != "1");
        let report = restore(snapshot);

        let orphan = report.tree.actor("2").unwrap();
        assert!(orphan.parent_id.is_none());
        assert_eq!(report.tree.depth("2").unwrap(), 0);
        assert!(!report.warnings.is_empty());
        assert_eq!(report.tree.actor("0").unwrap().child_ids, vec!["3".to_string()]);
    }

    #[test]
    fn test_one_sided_edge_is_dropped() {
        let mut snapshot = AgencySnapshot::capture(&sample_tree(), "w");
        for actor in snapshot.actors.iter_mut() {
            if actor.id == "3" {
                actor.parent_id = Some("1".to_string());
            }
        }
        let report = restore(snapshot);
        assert!(report.tree.actor("3").unwrap().parent_id.is_none());
        assert!(!report.tree.actor("0").unwrap().has_child("3"));
        assert!(!report.tree.actor("1").unwrap().has_child("3"));
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_cycle_is_broken() {
        let mut snapshot = AgencySnapshot::capture(&sample_tree(), "w");
        for actor in snapshot.actors.iter_mut() {
            match actor.id.as_str() {
                "1" => actor.parent_id = Some("2".to_string()),
                "2" => actor.child_ids = vec!["1".to_string()],
                "0" => actor.child_ids.retain(|c| c != "1"),
                _ => {}
            }
        }
        let report = restore(snapshot);
        assert!(report.tree.depth("1").is_ok());
        assert!(report.tree.depth("2").is_ok());
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn test_missing_root_promotes_first_orphan_and_bumps_counter() {
        let mut snapshot = AgencySnapshot::capture(&sample_tree(), "w");
        snapshot.root_id = "42".to_string();
        snapshot.next_id = 1;
        let report = restore(snapshot);
        assert_eq!(report.tree.root_id(), "0");
        assert_eq!(report.tree.next_id(), 4);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_max_numeric_id_does_not_overflow_counter() {
        let mut snapshot = AgencySnapshot::capture(&sample_tree(), "w");
        let mut stray = snapshot.actors[3].clone();
        stray.id = u64::MAX.to_string();
        stray.parent_id = None;
        snapshot.actors.push(stray);

        let mut report = restore(snapshot);
        assert_eq!(report.tree.next_id(), u64::MAX);
        assert_eq!(report.tree.len(), 5);

        let err = report
            .tree
            .create_actor("0", NewActor::new("c", "C"))
            .unwrap_err();
        assert!(matches!(err, AgencyError::CapacityExceeded(_)));
        assert_eq!(report.tree.len(), 5);
    }

    #[test]
    fn test_empty_snapshot_yields_fresh_root() {
        let snapshot = AgencySnapshot {
            workspace_id: "w".to_string(),
            root_id: "0".to_string(),
            next_id: 0,
            limits: TreeLimits::default(),
            actors: vec![],
            saved_at: chrono::Utc::now(),
        };
        let report = restore(snapshot);
        assert_eq!(report.tree.len(), 1);
        assert_eq!(report.warnings.len(), 1);
    }
}
