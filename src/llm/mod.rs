//! LLM 层：执行提供方抽象与实现（Responses API / Mock）

pub mod mock;
pub mod responses;
pub mod traits;
pub mod types;

pub use mock::{MockProvider, MockStep};
pub use responses::{ResponsesProvider, DEFAULT_BASE_URL};
pub use traits::{ExecutionProvider, LlmError};
pub use types::{
    truncate_chars, ApprovalDecision, ApprovalItem, Continuation, ContinuationId, PhaseConfig,
    ReasoningEffort, ReasoningSettings, ReasoningSummary, Run, RunItem, RunOutcome, StreamEvent,
    Verbosity,
};
