//! 流消费者：把一次 Run 的事件流排空为累计文本 + 事件日志
//!
//! 文本增量追加到缓冲区，若提供了回调则实时发布（仅 Execution 阶段使用）；
//! 其它事件投影为紧凑的一行日志，带回合来源标签写入 EventLog。
//! 这里不抛错：提供方错误只以 Run 的 Failed 终态出现。

use crate::llm::{truncate_chars, LlmError, Run, RunItem, RunOutcome, StreamEvent};
use crate::pipeline::{SharedEventLog, TurnSource};

/// 日志行中参数 / 输出预览的最大字符数
const PREVIEW_CHARS: usize = 80;

/// 实时文本回调
pub type LiveUpdate<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[derive(Debug)]
pub struct ConsumedRun {
    /// 累计的文本增量
    pub text: String,
    pub outcome: RunOutcome,
}

fn preview(s: &str) -> String {
    truncate_chars(&s.replace(['\n', '\r'], " "), PREVIEW_CHARS)
}

/// 事件 -> 日志行；文本增量不记日志
fn project(event: &StreamEvent) -> Option<String> {
    match event {
        StreamEvent::TextDelta(_) | StreamEvent::ReasoningDelta(_) => None,
        StreamEvent::ToolCallStarted {
            name, arguments, ..
        } => Some(format!("→ {}({})", name, preview(arguments))),
        StreamEvent::ToolCallFinished { name, output, .. } => {
            Some(format!("← {}: {}", name, preview(output)))
        }
        StreamEvent::ApprovalRequested {
            name, arguments, ..
        } => Some(format!("? approval needed: {}({})", name, preview(arguments))),
        StreamEvent::AgentUpdated { name } => Some(format!("» {}", name)),
    }
}

pub async fn consume(
    mut run: Run,
    source: TurnSource,
    log: &SharedEventLog,
    on_update: Option<LiveUpdate<'_>>,
) -> ConsumedRun {
    let mut text = String::new();
    let mut reasoning = String::new();
    while let Some(item) = run.next_item().await {
        match item {
            RunItem::Event(StreamEvent::TextDelta(delta)) => {
                text.push_str(&delta);
                if let Some(cb) = on_update {
                    cb(&text);
                }
            }
            RunItem::Event(StreamEvent::ReasoningDelta(delta)) => reasoning.push_str(&delta),
            RunItem::Event(event) => {
                if let Some(line) = project(&event) {
                    log.push(source, line);
                }
            }
            RunItem::Finished(outcome) => {
                if !reasoning.is_empty() {
                    log.push(source, format!("reasoning: {}", preview(&reasoning)));
                }
                let outcome = match outcome {
                    RunOutcome::Completed(final_text) if final_text.is_empty() => {
                        RunOutcome::Completed(text.clone())
                    }
                    other => other,
                };
                return ConsumedRun { text, outcome };
            }
        }
    }
    ConsumedRun {
        text,
        outcome: RunOutcome::Failed(LlmError::StreamParse(
            "run ended without a terminal outcome".to_string(),
        )),
    }
}
