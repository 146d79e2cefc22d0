//! 审批队列
//!
//! Run 挂起时，每个待审批的工具调用包装为一条 PendingApproval，追加到全局有序列表（跨来源 FIFO）。
//! 光标在每次变更后钳制到 `[0, len-1]`；决定逐条应用到对应的 Continuation，
//! 某个 Continuation 的最后一条审批被移除后才交还给编排器恢复。
//!
//! 队列本身不加锁，由持有者（TurnPipeline）在同一把锁内完成插入、移除与光标钳制。

use std::collections::HashMap;

use serde::Serialize;

use crate::core::AgentError;
use crate::llm::{ApprovalDecision, ApprovalItem, Continuation, ContinuationId};
use crate::pipeline::TurnSource;

/// 队列中的一条待审批项
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingApproval {
    pub id: u64,
    pub tool_name: String,
    pub args_summary: String,
    pub source: TurnSource,
    #[serde(skip)]
    pub continuation_id: ContinuationId,
    #[serde(skip)]
    pub item: ApprovalItem,
}

/// 挂起中的 Continuation 与编排器附带的回合状态
#[derive(Debug)]
struct Suspension<T> {
    source: TurnSource,
    continuation: Continuation,
    payload: T,
}

/// 所有审批都已决定、可以恢复的挂起
#[derive(Debug)]
pub struct Resumable<T> {
    pub source: TurnSource,
    pub continuation: Continuation,
    pub payload: T,
}

/// decide 的结果
#[derive(Debug)]
pub enum Decided<T> {
    /// 同一 Continuation 仍有待审批项
    Waiting {
        continuation_id: ContinuationId,
        remaining: usize,
    },
    Resume(Resumable<T>),
}

#[derive(Debug)]
pub struct ApprovalQueue<T> {
    entries: Vec<PendingApproval>,
    suspended: HashMap<ContinuationId, Suspension<T>>,
    cursor: usize,
    next_id: u64,
}

impl<T> Default for ApprovalQueue<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            suspended: HashMap::new(),
            cursor: 0,
            next_id: 1,
        }
    }
}

impl<T> ApprovalQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队一次挂起。items 为空时没有可等待的决定，原样交还以便立即恢复
    pub fn enqueue(
        &mut self,
        source: TurnSource,
        continuation: Continuation,
        items: Vec<ApprovalItem>,
        payload: T,
    ) -> Option<Resumable<T>> {
        if items.is_empty() {
            return Some(Resumable {
                source,
                continuation,
                payload,
            });
        }
        let was_empty = self.entries.is_empty();
        let continuation_id = continuation.id();
        for item in items {
            let id = self.next_id;
            self.next_id += 1;
            self.entries.push(PendingApproval {
                id,
                tool_name: item.tool_name.clone(),
                args_summary: item.args_summary(),
                source,
                continuation_id,
                item,
            });
        }
        self.suspended.insert(
            continuation_id,
            Suspension {
                source,
                continuation,
                payload,
            },
        );
        if was_empty {
            self.cursor = 0;
        }
        self.clamp();
        None
    }

    /// 移动光标，返回钳制后的位置
    pub fn select(&mut self, index: usize) -> usize {
        self.cursor = index;
        self.clamp();
        self.cursor
    }

    /// 光标上移 / 下移一格
    pub fn move_cursor(&mut self, delta: isize) -> usize {
        let target = if delta.is_negative() {
            self.cursor.saturating_sub(delta.unsigned_abs())
        } else {
            self.cursor.saturating_add(delta as usize)
        };
        self.select(target)
    }

    /// 对第 index 条做决定
    pub fn decide(
        &mut self,
        index: usize,
        approve: bool,
        always: bool,
    ) -> Result<Decided<T>, AgentError> {
        if index >= self.entries.len() {
            return Err(AgentError::UnknownApproval(format!(
                "no pending approval at index {}",
                index
            )));
        }
        self.decide_at(index, approve, always)
    }

    /// 按审批 id 做决定；已移除的 id 报 UnknownApproval，不影响任何挂起
    pub fn decide_by_id(
        &mut self,
        id: u64,
        approve: bool,
        always: bool,
    ) -> Result<Decided<T>, AgentError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| AgentError::UnknownApproval(format!("approval {} not pending", id)))?;
        self.decide_at(index, approve, always)
    }

    fn decide_at(
        &mut self,
        index: usize,
        approve: bool,
        always: bool,
    ) -> Result<Decided<T>, AgentError> {
        let entry = &self.entries[index];
        let continuation_id = entry.continuation_id;
        let suspension = self.suspended.get_mut(&continuation_id).ok_or_else(|| {
            AgentError::UnknownApproval(format!(
                "continuation {} is no longer suspended",
                continuation_id
            ))
        })?;
        suspension
            .continuation
            .apply(ApprovalDecision {
                call_id: entry.item.call_id.clone(),
                approved: approve,
                always,
            })
            .map_err(AgentError::ApprovalApply)?;

        self.entries.remove(index);
        self.clamp();

        let remaining = self
            .entries
            .iter()
            .filter(|e| e.continuation_id == continuation_id)
            .count();
        if remaining > 0 {
            return Ok(Decided::Waiting {
                continuation_id,
                remaining,
            });
        }
        match self.suspended.remove(&continuation_id) {
            Some(s) => Ok(Decided::Resume(Resumable {
                source: s.source,
                continuation: s.continuation,
                payload: s.payload,
            })),
            None => Err(AgentError::UnknownApproval(format!(
                "continuation {} vanished",
                continuation_id
            ))),
        }
    }

    fn clamp(&mut self) {
        if self.entries.is_empty() {
            self.cursor = 0;
        } else if self.cursor >= self.entries.len() {
            self.cursor = self.entries.len() - 1;
        }
    }

    pub fn entries(&self) -> &[PendingApproval] {
        &self.entries
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 丢弃全部挂起（/clear）；返回被丢弃的 Continuation 数
    pub fn clear(&mut self) -> usize {
        let dropped = self.suspended.len();
        self.entries.clear();
        self.suspended.clear();
        self.cursor = 0;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(call: &str, tool: &str) -> ApprovalItem {
        ApprovalItem {
            call_id: call.to_string(),
            tool_name: tool.to_string(),
            arguments: json!({"path": "a.txt"}),
        }
    }

    fn suspend(q: &mut ApprovalQueue<&'static str>, source: TurnSource, calls: &[&str], tag: &'static str) {
        let items: Vec<ApprovalItem> = calls.iter().map(|c| item(c, "write")).collect();
        let cont = Continuation::new(json!({}), items.clone());
        assert!(q.enqueue(source, cont, items, tag).is_none());
    }

    #[test]
    fn test_fifo_across_sources() {
        let mut q = ApprovalQueue::new();
        suspend(&mut q, TurnSource::Chat, &["c1"], "chat");
        suspend(&mut q, TurnSource::Linger, &["l1"], "linger");
        let sources: Vec<TurnSource> = q.entries().iter().map(|e| e.source).collect();
        assert_eq!(sources, vec![TurnSource::Chat, TurnSource::Linger]);
        assert_eq!(q.cursor(), 0);
    }

    #[test]
    fn test_resume_only_after_last_decision() {
        let mut q = ApprovalQueue::new();
        suspend(&mut q, TurnSource::Chat, &["c1", "c2"], "turn");
        match q.decide(0, true, false).unwrap() {
            Decided::Waiting { remaining, .. } => assert_eq!(remaining, 1),
            other => panic!("expected Waiting, got {:?}", other),
        }
        match q.decide(0, false, false).unwrap() {
            Decided::Resume(r) => {
                assert_eq!(r.payload, "turn");
                assert!(r.continuation.is_resolved());
                assert_eq!(r.continuation.decisions().len(), 2);
            }
            other => panic!("expected Resume, got {:?}", other),
        }
        assert!(q.is_empty());
        // 恢复后不再持有该 Continuation
        assert_eq!(q.clear(), 0);
    }

    #[test]
    fn test_cursor_clamped_after_removal() {
        let mut q = ApprovalQueue::new();
        suspend(&mut q, TurnSource::Chat, &["c1"], "a");
        suspend(&mut q, TurnSource::Chat, &["c2"], "b");
        assert_eq!(q.select(9), 1);
        q.decide(1, true, false).unwrap();
        assert_eq!(q.cursor(), 0);
        q.decide(0, true, false).unwrap();
        assert_eq!(q.cursor(), 0);
        assert_eq!(q.move_cursor(-1), 0);
    }

    #[test]
    fn test_decide_twice_is_unknown() {
        let mut q = ApprovalQueue::new();
        suspend(&mut q, TurnSource::Chat, &["c1", "c2"], "a");
        let id = q.entries()[0].id;
        q.decide_by_id(id, true, false).unwrap();
        let err = q.decide_by_id(id, true, false).unwrap_err();
        assert!(matches!(err, AgentError::UnknownApproval(_)));
        assert_eq!(q.len(), 1);
        assert!(q.decide(5, true, false).is_err());
    }

    #[test]
    fn test_empty_items_returned_for_immediate_resume() {
        let mut q: ApprovalQueue<u8> = ApprovalQueue::new();
        let cont = Continuation::new(json!({}), vec![]);
        let back = q.enqueue(TurnSource::Linger, cont, vec![], 7);
        assert_eq!(back.map(|r| r.payload), Some(7));
        assert!(q.is_empty());
    }
}
