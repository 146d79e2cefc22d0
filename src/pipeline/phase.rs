//! 阶段与回合来源
//!
//! 每个阶段（Planning / Guidance / Execution）有独立的模型、指令与能力设置，共享同一回合的消息历史。
//! 构造 PhaseConfig 时按熔断器状态决定是否携带 reasoning（推理摘要能力）。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::llm::{PhaseConfig, ReasoningSettings, Verbosity};

/// 回合来源：聊天输入或 linger 自主触发
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnSource {
    Chat,
    Linger,
}

impl TurnSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnSource::Chat => "chat",
            TurnSource::Linger => "linger",
        }
    }
}

impl fmt::Display for TurnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planning,
    Guidance,
    Execution,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Guidance => "guidance",
            Phase::Execution => "execution",
        }
    }

    /// 写入工作历史时的标签
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Planning => "[Planning]",
            Phase::Guidance => "[Guidance]",
            Phase::Execution => "[Execution]",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个阶段的静态设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseProfile {
    pub model: String,
    pub instructions: String,
    pub tools: Vec<String>,
    pub reasoning: Option<ReasoningSettings>,
    pub verbosity: Option<Verbosity>,
}

impl PhaseProfile {
    pub fn new(model: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: instructions.into(),
            tools: Vec::new(),
            reasoning: None,
            verbosity: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: ReasoningSettings) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }
}

/// 三个阶段的设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSettings {
    pub planning: PhaseProfile,
    pub guidance: PhaseProfile,
    pub execution: PhaseProfile,
}

impl PhaseSettings {
    pub fn profile(&self, phase: Phase) -> &PhaseProfile {
        match phase {
            Phase::Planning => &self.planning,
            Phase::Guidance => &self.guidance,
            Phase::Execution => &self.execution,
        }
    }

    /// 构造提交给提供方的配置；能力关闭时整体省略 reasoning，verbosity 不受影响
    pub fn to_config(&self, phase: Phase, capability_enabled: bool) -> PhaseConfig {
        let profile = self.profile(phase);
        PhaseConfig {
            name: phase.as_str().to_string(),
            model: profile.model.clone(),
            instructions: profile.instructions.clone(),
            tools: profile.tools.clone(),
            reasoning: if capability_enabled {
                profile.reasoning
            } else {
                None
            },
            verbosity: profile.verbosity,
        }
    }
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            planning: PhaseProfile::new(
                "gpt-5-mini",
                "Outline a short numbered plan for answering the latest request. Do not answer it yet.",
            ),
            guidance: PhaseProfile::new(
                "gpt-5-mini",
                "Review the plan and list concrete guidance for carrying it out: tools to use, pitfalls, expected output.",
            ),
            execution: PhaseProfile::new(
                "gpt-5",
                "Carry out the plan and answer the user. Use tools when they help.",
            ),
        }
    }
}
