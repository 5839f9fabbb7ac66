//! 会议协调：主持人与其子节点之间的轮转发言
//!
//! 状态机 Created → Running → Completed，没有暂停态，只靠轮数预算结束。
//! 主持人由一个不入树的临时代理（HostDelegate）出席；子节点在会议期间能力表清空，结束时原样恢复。
//! 发言结果按入场顺序广播给其他参与者，所有人看到相同的因果历史。
//! 调用方负责事先取得主持人与全部子节点的调用许可。

use std::collections::BTreeSet;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::core::{ActorId, AgencyError, AgencyResult, AgencyTree, Capabilities};
use crate::llm::BackendRegistry;
use crate::memory::Message;

/// 轮数硬上限（与请求的轮数无关）
pub const MAX_MEETING_ROUNDS: usize = 15;

/// 主持人代理表示「已说完，可以散会」的控制标记
pub const READY_TO_END_MEETING: &str = "READY_TO_END_MEETING";
/// 其他参与者表示「已说完」的控制标记
pub const READY_TO_MOVE_ON: &str = "READY_TO_MOVE_ON";

const TURN_PROMPT: &str = "It is your turn to speak. Please respond.";
const MEETING_ENDED: &str = "Meeting has ended. Thank you for your participation.";

const HOST_INSTRUCTIONS: &str = "Meeting Instructions:
- You are the host of this meeting. You will go first. Begin by elaborating on the objective of the meeting.
- Review the discussion so far
- Share your thoughts related to the meeting objective
- Respond to points raised by other participants
- If you have said all you need to contribute and want to end the meeting, include \"READY_TO_END_MEETING\" in your response
";

const MEMBER_INSTRUCTIONS: &str = "Meeting Instructions:
- Review the discussion so far
- Share your thoughts related to the meeting objective
- Respond to points raised by other participants
- If you have said all you need to contribute, include \"READY_TO_MOVE_ON\" in your response
";

/// 回复中是否含有任一控制标记（大小写不敏感的子串匹配）
pub fn signals_ready(text: &str) -> bool {
    let upper = text.to_uppercase();
    upper.contains(READY_TO_END_MEETING) || upper.contains(READY_TO_MOVE_ON)
}

/// 轮数上限：min(每人轮数 × 参与人数, 15)
pub fn max_rounds(requested_max_turns: usize, participants: usize) -> usize {
    requested_max_turns
        .saturating_mul(participants)
        .min(MAX_MEETING_ROUNDS)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Created,
    Running,
    Completed,
}

/// 主持人的临时代理：结构化拷贝，只活在会议里
#[derive(Clone, Debug, PartialEq)]
pub struct HostDelegate {
    /// 合成 id，不会出现在树中
    pub id: String,
    pub host_id: ActorId,
    pub name: String,
    pub directive: String,
    pub backend: String,
    pub history: Vec<Message>,
}

/// 会议参与者
#[derive(Clone, Debug, PartialEq)]
pub enum Participant {
    Delegate(HostDelegate),
    Member { id: ActorId, name: String },
}

impl Participant {
    /// 参与者在会议内的 id（就绪集合的键）
    pub fn id(&self) -> &str {
        match self {
            Participant::Delegate(d) => &d.id,
            Participant::Member { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Participant::Delegate(d) => &d.name,
            Participant::Member { name, .. } => name,
        }
    }

    /// 记录到纪要中的发言者 id：代理以主持人的 id 发言
    pub fn speaker_id(&self) -> &str {
        match self {
            Participant::Delegate(d) => &d.host_id,
            Participant::Member { id, .. } => id,
        }
    }
}

/// 纪要条目
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub speaker_id: String,
    pub speaker_name: String,
    pub text: String,
}

/// 一次会议（不持久化，结束即丢弃）
#[derive(Clone, Debug)]
pub struct Meeting {
    pub id: String,
    pub objective: String,
    pub participants: Vec<Participant>,
    pub transcript: Vec<TranscriptEntry>,
    pub ready: BTreeSet<String>,
    pub rounds: usize,
    pub turns: usize,
    pub status: MeetingStatus,
}

impl Meeting {
    fn new(objective: &str, participants: Vec<Participant>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            objective: objective.to_string(),
            participants,
            transcript: Vec::new(),
            ready: BTreeSet::new(),
            rounds: 0,
            turns: 0,
            status: MeetingStatus::Created,
        }
    }

    pub fn all_ready(&self) -> bool {
        self.ready.len() == self.participants.len()
    }

    fn record(&mut self, idx: usize, text: String) {
        let p = &self.participants[idx];
        self.transcript.push(TranscriptEntry {
            speaker_id: p.speaker_id().to_string(),
            speaker_name: p.name().to_string(),
            text,
        });
    }

    /// 交给主持人的结果：纪要逐条拼接
    pub fn summary(&self) -> String {
        let lines: Vec<String> = self
            .transcript
            .iter()
            .map(|e| format!("[{} ({})]: {}", e.speaker_name, e.speaker_id, e.text))
            .collect();
        format!("Meeting complete. Summary:\n\n{}", lines.join("\n"))
    }
}

/// 会议协调器：借用树与后端注册表，不拥有任何 actor
pub struct MeetingCoordinator<'a> {
    tree: &'a RwLock<AgencyTree>,
    backends: &'a BackendRegistry,
}

impl<'a> MeetingCoordinator<'a> {
    pub fn new(tree: &'a RwLock<AgencyTree>, backends: &'a BackendRegistry) -> Self {
        Self { tree, backends }
    }

    /// 召开会议。`host_context` 是主持人当前轮次中尚未提交的条目（工具调用路径），
    /// 会接在代理的历史拷贝之后。
    pub async fn hold(
        &self,
        host_id: &str,
        objective: &str,
        requested_max_turns: usize,
        host_context: &[Message],
    ) -> AgencyResult<Meeting> {
        let (mut meeting, saved) = self.open(host_id, objective, host_context).await?;
        let budget = max_rounds(requested_max_turns, meeting.participants.len());
        tracing::info!(
            meeting_id = %meeting.id,
            host_id = %host_id,
            participants = meeting.participants.len(),
            max_rounds = budget,
            "meeting started"
        );

        for _ in 0..budget {
            if meeting.all_ready() {
                break;
            }
            meeting.rounds += 1;
            for idx in 0..meeting.participants.len() {
                self.take_turn(&mut meeting, idx).await;
                if meeting.all_ready() {
                    break;
                }
            }
        }

        self.close(&mut meeting, saved).await;
        tracing::info!(
            meeting_id = %meeting.id,
            rounds = meeting.rounds,
            turns = meeting.turns,
            ready = meeting.ready.len(),
            "meeting completed"
        );
        Ok(meeting)
    }

    /// 开会前的准备：校验、构造代理、清空子节点能力、写入开场条目。全部在一次写锁内完成。
    async fn open(
        &self,
        host_id: &str,
        objective: &str,
        host_context: &[Message],
    ) -> AgencyResult<(Meeting, Vec<(ActorId, Capabilities)>)> {
        let mut tree = self.tree.write().await;
        let host = tree.actor(host_id)?;
        if host.child_ids.is_empty() {
            return Err(AgencyError::NoParticipants(format!(
                "agent '{host_id}' has no child agents"
            )));
        }

        let mut delegate_history = host.history.clone();
        delegate_history.extend(host_context.iter().cloned());
        let delegate = HostDelegate {
            id: format!("{host_id}_host"),
            host_id: host_id.to_string(),
            name: format!("{} [Active Host]", host.name),
            directive: host.directive.clone(),
            backend: host.backend.clone(),
            history: delegate_history,
        };

        let mut participants = vec![Participant::Delegate(delegate)];
        for child_id in host.child_ids.clone() {
            let name = tree.actor(&child_id)?.name.clone();
            participants.push(Participant::Member { id: child_id, name });
        }

        let mut saved = Vec::with_capacity(participants.len() - 1);
        for p in &participants {
            if let Participant::Member { id, .. } = p {
                let old = tree.replace_capabilities(id, Capabilities::new())?;
                saved.push((id.clone(), old));
            }
        }

        let mut meeting = Meeting::new(objective, participants);
        let opening = format!("Meeting initialized with objective: {objective}");
        meeting.record(0, opening.clone());
        for p in meeting.participants.iter_mut() {
            match p {
                Participant::Delegate(d) => {
                    d.history.push(Message::user(opening.clone()));
                    d.history.push(Message::user(HOST_INSTRUCTIONS));
                }
                Participant::Member { id, .. } => {
                    tree.append_history(
                        id,
                        [Message::user(opening.clone()), Message::user(MEMBER_INSTRUCTIONS)],
                    )?;
                }
            }
        }
        meeting.status = MeetingStatus::Running;
        Ok((meeting, saved))
    }

    /// 一个发言回合；任何失败都只影响该参与者（记录错误并标记就绪）
    async fn take_turn(&self, meeting: &mut Meeting, idx: usize) {
        meeting.turns += 1;
        let participant_id = meeting.participants[idx].id().to_string();
        tracing::debug!(
            meeting_id = %meeting.id,
            turn = meeting.turns,
            participant = %participant_id,
            "meeting turn"
        );

        match self.speak(&meeting.participants[idx]).await {
            Ok(response) => {
                let response = if response.trim().is_empty() {
                    "No response".to_string()
                } else {
                    response.trim().to_string()
                };
                self.broadcast(meeting, idx, &response).await;
                meeting.record(idx, response.clone());
                if signals_ready(&response) {
                    meeting.ready.insert(participant_id);
                }
            }
            Err(e) => {
                tracing::warn!(
                    meeting_id = %meeting.id,
                    participant = %participant_id,
                    error = %e,
                    "meeting turn failed"
                );
                meeting.record(idx, format!("Error during response: {e}"));
                meeting.ready.insert(participant_id);
            }
        }
    }

    /// 调用参与者的后端；成功时把轮次提示与回复写入该参与者历史
    async fn speak(&self, participant: &Participant) -> AgencyResult<String> {
        let (backend, mut request) = match participant {
            Participant::Delegate(d) => (d.backend.clone(), d.history.clone()),
            Participant::Member { id, .. } => {
                let tree = self.tree.read().await;
                let actor = tree.actor(id)?;
                (actor.backend.clone(), actor.history.clone())
            }
        };
        request.push(Message::user(TURN_PROMPT));
        let client = self.backends.get(&backend)?;
        client.complete(&request).await.map_err(AgencyError::Backend)
    }

    /// 把发言写入发言者自己的历史，并以「From 名称 (id): 内容」广播给其他参与者
    async fn broadcast(&self, meeting: &mut Meeting, idx: usize, response: &str) {
        let speaker = &meeting.participants[idx];
        let relayed = format!(
            "From {} ({}): {}",
            speaker.name(),
            speaker.speaker_id(),
            response
        );
        let mut tree = self.tree.write().await;
        for (i, p) in meeting.participants.iter_mut().enumerate() {
            let entries = if i == idx {
                vec![Message::user(TURN_PROMPT), Message::assistant(response)]
            } else {
                vec![Message::user(relayed.clone())]
            };
            match p {
                Participant::Delegate(d) => d.history.extend(entries),
                Participant::Member { id, .. } => {
                    if tree.append_history(id, entries).is_err() {
                        tracing::warn!(participant = %id, "participant left the tree during meeting");
                    }
                }
            }
        }
    }

    /// 散会：恢复能力表、通知子节点、丢弃代理
    async fn close(&self, meeting: &mut Meeting, saved: Vec<(ActorId, Capabilities)>) {
        let mut tree = self.tree.write().await;
        for (id, capabilities) in saved {
            if tree.replace_capabilities(&id, capabilities).is_ok() {
                let _ = tree.append_history(&id, [Message::user(MEETING_ENDED)]);
            }
        }
        meeting
            .participants
            .retain(|p| !matches!(p, Participant::Delegate(_)));
        meeting.status = MeetingStatus::Completed;
    }
}
