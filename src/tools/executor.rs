//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时；每次调用输出一行结构化审计日志（JSON）。
//! 失败与超时都折叠为给模型看的输出文本，不中断 Run。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::llm::truncate_chars;
use crate::tools::{ToolDefinition, ToolRegistry};

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 一次工具调用的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub ok: bool,
    pub output: String,
}

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        self.registry.definitions(names)
    }

    /// 执行指定工具并写审计日志
    pub async fn execute(&self, tool_name: &str, args: Value) -> ToolOutcome {
        let start = Instant::now();
        let args_preview = truncate_chars(&args.to_string(), ARGS_PREVIEW_CHARS);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (outcome, out) = match result {
            Ok(Ok(content)) => ("ok", ToolOutcome { ok: true, output: content }),
            Ok(Err(e)) => (
                "error",
                ToolOutcome {
                    ok: false,
                    output: format!("Error: {}", e),
                },
            ),
            Err(_) => (
                "timeout",
                ToolOutcome {
                    ok: false,
                    output: format!("Error: tool {} timed out", tool_name),
                },
            ),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": out.ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");
        out
    }
}
