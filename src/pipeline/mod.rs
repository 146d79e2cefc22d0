//! 回合流水线：流消费、审批队列、阶段编排、linger 触发与回合后处理

pub mod approvals;
pub mod events;
pub mod linger;
pub mod phase;
pub mod post_process;
pub mod reasoning;
pub mod stream;
pub mod turn;

pub use approvals::{ApprovalQueue, Decided, PendingApproval, Resumable};
pub use events::{EventLog, EventLogEntry, SharedEventLog, DEFAULT_EVENT_LOG_CAPACITY};
pub use linger::{AmbientUpdate, LingerConfig, LingerScheduler};
pub use phase::{Phase, PhaseProfile, PhaseSettings, TurnSource};
pub use post_process::TurnPostProcessor;
pub use reasoning::synthesize_summary;
pub use stream::{consume, ConsumedRun, LiveUpdate};
pub use turn::{ActiveTurn, DecideOutcome, ResumeTicket, TurnOutcome, TurnPipeline, TurnState};
