//! Mock 执行提供方（用于测试与无 API Key 时的本地运行）
//!
//! 按脚本依次产出 Run：回复、失败或请求审批（挂起）。脚本耗尽后回显最后一条 User 消息。
//! 记录每次提交的 PhaseConfig / 历史与每次 resume 的决定，便于断言。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{
    ApprovalDecision, ApprovalItem, Continuation, ExecutionProvider, LlmError, PhaseConfig, Run,
    RunItem, RunOutcome, StreamEvent,
};
use crate::memory::{Message, Role};

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum MockStep {
    /// 逐词流出文本并完成
    Reply(String),
    /// 以提供方错误告终
    Fail(String),
    /// 请求审批并挂起：(工具名, 参数)
    RequestApproval(Vec<(String, Value)>),
}

#[derive(Debug, Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<MockStep>>,
    submitted: Mutex<Vec<PhaseConfig>>,
    histories: Mutex<Vec<Vec<Message>>>,
    resumed: Mutex<Vec<Vec<ApprovalDecision>>>,
    next_call: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(steps: impl IntoIterator<Item = MockStep>) -> Self {
        let provider = Self::new();
        provider.push_steps(steps);
        provider
    }

    pub fn push_steps(&self, steps: impl IntoIterator<Item = MockStep>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(steps);
    }

    /// 所有 submit_run 收到的阶段配置（按调用顺序）
    pub fn submitted(&self) -> Vec<PhaseConfig> {
        self.submitted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn resumed(&self) -> Vec<Vec<ApprovalDecision>> {
        self.resumed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn next_step(&self) -> Option<MockStep> {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    fn play(&self, agent: &str, step: MockStep) -> Run {
        let mut items = vec![RunItem::Event(StreamEvent::AgentUpdated {
            name: agent.to_string(),
        })];
        match step {
            MockStep::Reply(text) => {
                for (i, word) in text.split(' ').enumerate() {
                    let delta = if i == 0 {
                        word.to_string()
                    } else {
                        format!(" {}", word)
                    };
                    items.push(RunItem::Event(StreamEvent::TextDelta(delta)));
                }
                items.push(RunItem::Finished(RunOutcome::Completed(text)));
            }
            MockStep::Fail(msg) => {
                items.push(RunItem::Finished(RunOutcome::Failed(LlmError::Provider(msg))));
            }
            MockStep::RequestApproval(calls) => {
                let approvals: Vec<ApprovalItem> = calls
                    .into_iter()
                    .map(|(tool_name, arguments)| ApprovalItem {
                        call_id: format!("call_{}", self.next_call.fetch_add(1, Ordering::Relaxed)),
                        tool_name,
                        arguments,
                    })
                    .collect();
                for a in &approvals {
                    items.push(RunItem::Event(StreamEvent::ApprovalRequested {
                        call_id: a.call_id.clone(),
                        name: a.tool_name.clone(),
                        arguments: a.arguments.to_string(),
                    }));
                }
                let continuation =
                    Continuation::new(json!({ "agent": agent }), approvals.clone());
                items.push(RunItem::Finished(RunOutcome::Suspended {
                    continuation,
                    approvals,
                }));
            }
        }
        Run::from_items(items)
    }
}

fn echo(history: &[Message]) -> String {
    let last_user = history
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)");
    format!("Echo from Mock: {}", last_user)
}

#[async_trait]
impl ExecutionProvider for MockProvider {
    async fn submit_run(&self, config: &PhaseConfig, history: &[Message]) -> Run {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(config.clone());
        self.histories
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(history.to_vec());
        let step = self
            .next_step()
            .unwrap_or_else(|| MockStep::Reply(echo(history)));
        self.play(&config.name, step)
    }

    async fn resume_run(&self, continuation: Continuation) -> Run {
        let agent = continuation
            .state()
            .get("agent")
            .and_then(|v| v.as_str())
            .unwrap_or("mock")
            .to_string();
        let (_, _, decisions) = continuation.into_parts();
        let approved = decisions.iter().filter(|d| d.approved).count();
        self.resumed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(decisions);
        let step = self.next_step().unwrap_or_else(|| {
            MockStep::Reply(format!("Resumed with {} approved call(s)", approved))
        });
        self.play(&agent, step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PhaseConfig {
        PhaseConfig {
            name: "execution".into(),
            model: "mock".into(),
            instructions: String::new(),
            tools: vec![],
            reasoning: None,
            verbosity: None,
        }
    }

    async fn drain(mut run: Run) -> (Vec<StreamEvent>, Option<RunOutcome>) {
        let mut events = Vec::new();
        while let Some(item) = run.next_item().await {
            match item {
                RunItem::Event(e) => events.push(e),
                RunItem::Finished(o) => return (events, Some(o)),
            }
        }
        (events, None)
    }

    #[tokio::test]
    async fn test_echo_when_script_empty() {
        let mock = MockProvider::new();
        let run = mock.submit_run(&config(), &[Message::user("hi")]).await;
        let (_, outcome) = drain(run).await;
        match outcome {
            Some(RunOutcome::Completed(text)) => assert_eq!(text, "Echo from Mock: hi"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(mock.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_approval_step_suspends() {
        let mock = MockProvider::with_script([MockStep::RequestApproval(vec![(
            "shell".into(),
            json!({"command": "ls"}),
        )])]);
        let run = mock.submit_run(&config(), &[]).await;
        let (events, outcome) = drain(run).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::ApprovalRequested { name, .. } if name == "shell")));
        match outcome {
            Some(RunOutcome::Suspended { approvals, continuation }) => {
                assert_eq!(approvals.len(), 1);
                assert_eq!(continuation.pending().len(), 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
