//! 执行提供方抽象
//!
//! 所有后端（Responses API / Mock）实现 ExecutionProvider：submit_run 为某阶段发起一次 Run，
//! resume_run 消费挂起快照继续执行。请求失败不以 Err 返回，而是作为 Run 的 Failed 终态。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::{Continuation, PhaseConfig, Run};
use crate::memory::Message;

/// 提供方 / 传输层错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(String),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream parse error: {0}")]
    StreamParse(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    /// 提供方在流中报告的错误（response.failed / error 事件）
    #[error("{0}")]
    Provider(String),

    #[error("provider config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}

/// 执行提供方
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// 以给定阶段配置与消息历史发起一次 Run
    async fn submit_run(&self, config: &PhaseConfig, history: &[Message]) -> Run;

    /// 恢复挂起的 Run；决定已通过 `Continuation::apply` 记录在快照上
    async fn resume_run(&self, continuation: Continuation) -> Run;
}
