//! UI 状态投影
//!
//! 界面只持有轻量的 UiState 快照；TurnPipeline 在每次状态转换后重新投影并通过 watch 通道发布。

use serde::Serialize;

use crate::memory::Message;
use crate::pipeline::{EventLogEntry, PendingApproval, TurnSource};

/// 界面看到的「投影」状态
#[derive(Clone, Debug, Serialize)]
pub struct UiState {
    pub phase: AgentPhase,
    pub active_source: Option<TurnSource>,
    /// 可见历史（不含阶段中间消息）
    pub history: Vec<Message>,
    /// Execution 阶段的实时文本
    pub live_text: String,
    pub event_log: Vec<EventLogEntry>,
    pub approvals: Vec<PendingApproval>,
    pub approval_cursor: usize,
    pub capability_enabled: bool,
    pub linger_enabled: bool,
    pub todo_summary: String,
    pub input_locked: bool,
    pub error_message: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            phase: AgentPhase::Idle,
            active_source: None,
            history: Vec::new(),
            live_text: String::new(),
            event_log: Vec::new(),
            approvals: Vec::new(),
            approval_cursor: 0,
            capability_enabled: true,
            linger_enabled: false,
            todo_summary: String::new(),
            input_locked: false,
            error_message: None,
        }
    }
}

/// 回合阶段（UI 投影用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AgentPhase {
    Idle,
    Planning,
    Guidance,
    /// 合成离线推理摘要
    Reasoning,
    Executing,
    AwaitingApproval,
    Error,
}

impl AgentPhase {
    pub fn label(&self) -> &'static str {
        match self {
            AgentPhase::Idle => "idle",
            AgentPhase::Planning => "planning",
            AgentPhase::Guidance => "guidance",
            AgentPhase::Reasoning => "reasoning",
            AgentPhase::Executing => "executing",
            AgentPhase::AwaitingApproval => "awaiting approval",
            AgentPhase::Error => "error",
        }
    }
}
