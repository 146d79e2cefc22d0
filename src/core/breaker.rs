//! 能力熔断器
//!
//! 推理摘要能力在进程内只有一次、不可逆的 enabled → disabled 转换：
//! 首次在阶段错误或终态文本中识别到「组织未认证」拒绝时跳闸，之后所有阶段配置都省略该能力。

use std::sync::atomic::{AtomicBool, Ordering};

use crate::llm::LlmError;

/// 跳闸后一次性追加到可见历史的提示
pub const CAPABILITY_NOTICE: &str = "Note: reasoning summaries are unavailable for this organization (verification required). Continuing without them.";

/// 降级路径中追加到工作历史的说明
pub const DEGRADED_NOTICE: &str =
    "Planning and guidance are unavailable in this session; answer the request directly.";

/// 识别到拒绝时的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// 本次调用刚刚让熔断器跳闸
    Fresh,
    /// 熔断器此前已跳闸
    Repeat,
}

#[derive(Debug)]
pub struct CapabilityBreaker {
    enabled: AtomicBool,
}

impl CapabilityBreaker {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// 拒绝签名：需要认证 + 推理摘要
    pub fn is_refusal(text: &str) -> bool {
        let lower = text.to_lowercase();
        lower.contains("must be verified") && lower.contains("reasoning summar")
    }

    pub fn guard_error(&self, err: &LlmError) -> Option<Refusal> {
        self.guard_text(&err.to_string())
    }

    pub fn guard_text(&self, text: &str) -> Option<Refusal> {
        if !Self::is_refusal(text) {
            return None;
        }
        Some(self.trip())
    }

    fn trip(&self) -> Refusal {
        match self
            .enabled
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                tracing::warn!("reasoning summary capability disabled for this process");
                Refusal::Fresh
            }
            Err(_) => Refusal::Repeat,
        }
    }
}

impl Default for CapabilityBreaker {
    fn default() -> Self {
        Self::new()
    }
}
