//! 记忆层：actor 对话历史与快照文件持久化

pub mod conversation;
pub mod persistence;

pub use conversation::{last_inbound, Message, Role};
pub use persistence::{SnapshotFormat, SnapshotStore};
