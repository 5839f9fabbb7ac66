//! 核心控制面：错误、能力门、actor 树、调用调度、会议、快照、服务装配与关闭

pub mod actor;
pub mod agency;
pub mod builder;
pub mod capability;
pub mod error;
pub mod meeting;
pub mod scheduler;
pub mod shutdown;
pub mod snapshot;
pub mod tree;

pub use actor::{Actor, ActorId, NewActor};
pub use agency::{Agency, AgencySettings};
pub use builder::{create_agency_builder, AgencyBuilder, BuiltAgency};
pub use capability::{capabilities_of, Capabilities, GateContext, Operation};
pub use error::{AgencyError, AgencyResult};
pub use meeting::{
    Meeting, MeetingCoordinator, MeetingStatus, Participant, TranscriptEntry, MAX_MEETING_ROUNDS,
    READY_TO_END_MEETING, READY_TO_MOVE_ON,
};
pub use scheduler::{ActorScheduler, TurnPermit};
pub use shutdown::{
    run_with_graceful_shutdown, ResourceCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason, SnapshotCleanup,
};
pub use snapshot::{restore, AgencySnapshot, RestoreReport};
pub use tree::{AgencyTree, TreeLimits};
