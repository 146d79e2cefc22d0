//! 错误恢复引擎
//!
//! 把 AgentError 映射为 RecoveryAction，TurnPipeline 据此决定重试、报错、保持挂起还是只记日志。

use crate::core::{AgentError, RecoveryAction};

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::CapabilityRefusal(_) => RecoveryAction::RetryWithoutCapability,
            AgentError::Provider(e) => RecoveryAction::ReportToUser(format!("Error: {}", e)),
            AgentError::ApprovalApply(_) | AgentError::UnknownApproval(_) => {
                RecoveryAction::KeepSuspended
            }
            AgentError::PostProcess(_) => RecoveryAction::LogOnly,
            AgentError::TurnActive(source) => {
                RecoveryAction::ReportToUser(format!("Busy: a {} turn is still running", source))
            }
            AgentError::Config(msg) => RecoveryAction::ReportToUser(format!("Error: {}", msg)),
        }
    }
}
