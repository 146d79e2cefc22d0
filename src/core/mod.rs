//! 核心编排层：错误与恢复、能力熔断、状态投影、组件构建、主控循环

pub mod breaker;
pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use breaker::{CapabilityBreaker, Refusal};
pub use builder::{create_agent_builder, AgentBuilder, AgentComponents};
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{create_agent, Command};
pub use recovery::RecoveryEngine;
pub use state::{AgentPhase, UiState};
