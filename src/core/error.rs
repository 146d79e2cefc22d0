//! 编排层错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：能力拒绝 → 去掉能力重试；提供方错误 → 展示给用户；
//! 审批应用失败 → 保持挂起；后处理失败 → 只记日志。

use thiserror::Error;

use crate::llm::LlmError;
use crate::pipeline::TurnSource;

#[derive(Error, Debug)]
pub enum AgentError {
    /// 提供方拒绝了可选能力（推理摘要需要组织认证）
    #[error("capability refused by provider: {0}")]
    CapabilityRefusal(String),

    #[error(transparent)]
    Provider(#[from] LlmError),

    #[error("failed to apply approval decision: {0}")]
    ApprovalApply(String),

    #[error("unknown approval: {0}")]
    UnknownApproval(String),

    /// 另一来源的回合仍在进行
    #[error("a {0} turn is already active")]
    TurnActive(TurnSource),

    #[error("post-processing failed: {0}")]
    PostProcess(String),

    #[error("config error: {0}")]
    Config(String),
}

/// 恢复引擎根据错误类型给出的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 熔断能力后原地重放当前回合
    RetryWithoutCapability,
    /// 作为可见的助手错误消息结束回合
    ReportToUser(String),
    /// 回合保持挂起，用户可以再次决定
    KeepSuspended,
    /// 仅写日志
    LogOnly,
}
