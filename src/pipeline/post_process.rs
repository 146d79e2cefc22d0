//! 回合后处理
//!
//! 每个回合结束（完成、挂起或失败）后无条件执行一次：自动完成前置依赖已满足的待办，
//! 刷新缓存的待办摘要，并记录结果事件（stream_complete / stream_error / todos_autoresolve_error）。
//! 这里的任何失败（包括 panic）都只记日志，不会把成功的回合变成失败。

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::pipeline::{SharedEventLog, TurnOutcome, TurnSource};
use crate::todos::TaskBoard;

pub struct TurnPostProcessor {
    tasks: Arc<dyn TaskBoard>,
    recovery: RecoveryEngine,
    summary: Mutex<String>,
}

impl TurnPostProcessor {
    pub fn new(tasks: Arc<dyn TaskBoard>) -> Self {
        let summary = tasks.summary();
        Self {
            tasks,
            recovery: RecoveryEngine::new(),
            summary: Mutex::new(summary),
        }
    }

    /// 最近一次刷新的待办摘要
    pub fn todo_summary(&self) -> String {
        self.summary.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn run(&self, source: TurnSource, outcome: &TurnOutcome, log: &SharedEventLog) {
        let reconciled = AssertUnwindSafe(self.reconcile(source, log))
            .catch_unwind()
            .await;
        if reconciled.is_err() {
            self.report(
                source,
                log,
                AgentError::PostProcess("task reconciliation panicked".to_string()),
            );
        }

        match outcome {
            TurnOutcome::Completed { .. } => {
                tracing::info!(source = %source, outcome = "completed", "stream_complete");
                log.push(source, "stream_complete");
            }
            TurnOutcome::Suspended { pending } => {
                tracing::info!(source = %source, outcome = "suspended", pending, "stream_complete");
                log.push(source, format!("stream_complete (suspended, {} pending)", pending));
            }
            TurnOutcome::Failed { error } => {
                tracing::warn!(source = %source, error = %error, "stream_error");
                log.push(source, format!("stream_error: {}", error));
            }
        }
    }

    async fn reconcile(&self, source: TurnSource, log: &SharedEventLog) {
        match self.tasks.auto_resolve_outstanding().await {
            Ok(resolved) if !resolved.is_empty() => {
                tracing::info!(source = %source, resolved = ?resolved, "todos auto-resolved");
                log.push(source, format!("todos auto-resolved: {}", resolved.join(", ")));
            }
            Ok(_) => {}
            Err(e) => self.report(source, log, AgentError::PostProcess(e)),
        }
        let summary = self.tasks.summary();
        *self.summary.lock().unwrap_or_else(|e| e.into_inner()) = summary;
    }

    fn report(&self, source: TurnSource, log: &SharedEventLog, err: AgentError) {
        if self.recovery.handle(&err) == RecoveryAction::LogOnly {
            tracing::warn!(source = %source, error = %err, "todos_autoresolve_error");
            log.push(source, format!("todos_autoresolve_error: {}", err));
        }
    }
}
