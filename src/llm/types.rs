//! 执行提供方的数据模型：阶段配置、Run 事件流、挂起快照（Continuation）与审批项
//!
//! Run 是一次惰性、有限、不可重启的事件序列，最后一项必为 `RunItem::Finished`。
//! Continuation 只在编排器内部流转，不可克隆、不落盘；被 resume 消费后即失效。

use std::fmt;
use std::pin::Pin;

use futures_util::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::llm::LlmError;

/// 审批项参数摘要的最大字符数
const ARGS_SUMMARY_CHARS: usize = 120;

/// 推理强度（reasoning.effort）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

/// 推理摘要详细程度（reasoning.summary）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningSummary {
    Auto,
    Concise,
    Detailed,
}

/// 输出详细程度（text.verbosity）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Low,
    Medium,
    High,
}

/// 可选能力：结构化推理摘要。熔断后整体省略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ReasoningSummary>,
}

/// 提交给提供方的单阶段配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseConfig {
    /// 阶段名（planning / guidance / execution），也作为 agent 名上报
    pub name: String,
    pub model: String,
    pub instructions: String,
    /// 本阶段可用工具；空表示全部
    pub tools: Vec<String>,
    pub reasoning: Option<ReasoningSettings>,
    pub verbosity: Option<Verbosity>,
}

/// 需要人工审批的工具调用（即 PendingApproval 的 requestItem）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalItem {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

impl ApprovalItem {
    /// 紧凑的参数摘要，供审批面板与事件日志展示
    pub fn args_summary(&self) -> String {
        truncate_chars(&self.arguments.to_string(), ARGS_SUMMARY_CHARS)
    }
}

/// 对单个审批项的决定；always 交由提供方的会话级策略记住
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub call_id: String,
    pub approved: bool,
    pub always: bool,
}

/// Run 过程中的可观测事件
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ReasoningDelta(String),
    ToolCallStarted {
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolCallFinished {
        call_id: String,
        name: String,
        output: String,
    },
    ApprovalRequested {
        call_id: String,
        name: String,
        arguments: String,
    },
    AgentUpdated {
        name: String,
    },
}

/// Run 的终态
#[derive(Debug)]
pub enum RunOutcome {
    Completed(String),
    Suspended {
        continuation: Continuation,
        approvals: Vec<ApprovalItem>,
    },
    Failed(LlmError),
}

/// Run 流中的一项：事件或终态
#[derive(Debug)]
pub enum RunItem {
    Event(StreamEvent),
    Finished(RunOutcome),
}

/// 一次阶段调用的事件流
pub struct Run {
    items: Pin<Box<dyn Stream<Item = RunItem> + Send>>,
}

impl Run {
    pub fn new(items: impl Stream<Item = RunItem> + Send + 'static) -> Self {
        Self {
            items: Box::pin(items),
        }
    }

    pub fn from_items(items: Vec<RunItem>) -> Self {
        Self::new(stream::iter(items))
    }

    /// 立即以失败告终的 Run（如请求未能发出）
    pub fn failed(err: LlmError) -> Self {
        Self::from_items(vec![RunItem::Finished(RunOutcome::Failed(err))])
    }

    pub async fn next_item(&mut self) -> Option<RunItem> {
        self.items.next().await
    }
}

impl fmt::Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Run { .. }")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContinuationId(Uuid);

impl fmt::Display for ContinuationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 挂起的 Run 快照。state 由提供方定义、对编排器不透明；
/// 决定逐项记录在快照上，全部待审批项都有决定后才可 resume
#[derive(Debug)]
pub struct Continuation {
    id: ContinuationId,
    state: Value,
    pending: Vec<ApprovalItem>,
    decisions: Vec<ApprovalDecision>,
}

impl Continuation {
    pub fn new(state: Value, pending: Vec<ApprovalItem>) -> Self {
        Self {
            id: ContinuationId(Uuid::new_v4()),
            state,
            pending,
            decisions: Vec::new(),
        }
    }

    pub fn id(&self) -> ContinuationId {
        self.id
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn pending(&self) -> &[ApprovalItem] {
        &self.pending
    }

    pub fn decisions(&self) -> &[ApprovalDecision] {
        &self.decisions
    }

    /// 记录一条决定；call_id 不属于本快照或已决定时报错，快照保持不变
    pub fn apply(&mut self, decision: ApprovalDecision) -> Result<(), String> {
        if !self.pending.iter().any(|p| p.call_id == decision.call_id) {
            return Err(format!(
                "call {} is not pending on continuation {}",
                decision.call_id, self.id
            ));
        }
        if self.decisions.iter().any(|d| d.call_id == decision.call_id) {
            return Err(format!("call {} already decided", decision.call_id));
        }
        self.decisions.push(decision);
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.pending
            .iter()
            .all(|p| self.decisions.iter().any(|d| d.call_id == p.call_id))
    }

    pub fn into_parts(self) -> (Value, Vec<ApprovalItem>, Vec<ApprovalDecision>) {
        (self.state, self.pending, self.decisions)
    }
}

/// 按字符截断（避免切断 UTF-8），超长时追加省略号
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max).collect();
    format!("{}…", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: &str) -> ApprovalItem {
        ApprovalItem {
            call_id: id.to_string(),
            tool_name: "shell".to_string(),
            arguments: json!({"command": "ls"}),
        }
    }

    fn decision(id: &str) -> ApprovalDecision {
        ApprovalDecision {
            call_id: id.to_string(),
            approved: true,
            always: false,
        }
    }

    #[test]
    fn test_continuation_resolves_after_all_decisions() {
        let mut c = Continuation::new(json!({}), vec![item("a"), item("b")]);
        assert!(!c.is_resolved());
        c.apply(decision("a")).unwrap();
        assert!(!c.is_resolved());
        c.apply(decision("b")).unwrap();
        assert!(c.is_resolved());
    }

    #[test]
    fn test_continuation_rejects_unknown_and_duplicate() {
        let mut c = Continuation::new(json!({}), vec![item("a")]);
        assert!(c.apply(decision("zzz")).is_err());
        c.apply(decision("a")).unwrap();
        assert!(c.apply(decision("a")).is_err());
        assert_eq!(c.decisions().len(), 1);
    }

    #[test]
    fn test_truncate_chars_utf8() {
        assert_eq!(truncate_chars("你好世界", 2), "你好…");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[tokio::test]
    async fn test_failed_run_yields_single_terminal() {
        let mut run = Run::failed(LlmError::Http("boom".into()));
        assert!(matches!(
            run.next_item().await,
            Some(RunItem::Finished(RunOutcome::Failed(_)))
        ));
        assert!(run.next_item().await.is_none());
    }
}
