//! OpenAI 兼容 Responses API 执行提供方
//!
//! 通过 reqwest 以 SSE 流式调用 `/responses`，文本增量实时转为 StreamEvent。
//! 模型请求的工具在本地执行：需要审批（且没有会话级 always 决定）的调用会让 Run 以 Suspended 告终，
//! Continuation 中保存请求模板、previous_response_id 与已产生的工具输出；resume_run 按决定执行或拒绝后继续。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::llm::{
    ApprovalDecision, ApprovalItem, Continuation, ExecutionProvider, LlmError, PhaseConfig,
    ReasoningSettings, Run, RunItem, RunOutcome, StreamEvent, Verbosity,
};
use crate::memory::Message;
use crate::tools::{ApprovalPolicy, PolicyVerdict, ToolExecutor};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// 工具输出写回模型前的最大字符数
const MAX_TOOL_OUTPUT_CHARS: usize = 16_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TextOptions {
    verbosity: Verbosity,
}

/// `/responses` 请求体；也是挂起快照中保存的请求模板
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResponsesRequest {
    model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    instructions: String,
    input: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<TextOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<String>,
    stream: bool,
}

/// 挂起时写入 Continuation 的提供方状态
#[derive(Debug, Serialize, Deserialize)]
struct SuspendedState {
    agent: String,
    request: ResponsesRequest,
    /// 本轮中无需审批、已执行的工具输出
    outputs: Vec<Value>,
    rounds: usize,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum SseEvent {
    #[serde(rename = "response.created")]
    Created { response: ResponseRef },
    #[serde(rename = "response.output_text.delta")]
    TextDelta { delta: String },
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningDelta { delta: String },
    #[serde(rename = "response.output_item.done")]
    ItemDone { item: OutputItem },
    #[serde(rename = "response.completed")]
    Completed { response: ResponseRef },
    #[serde(rename = "response.failed")]
    Failed { response: FailedResponse },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<ErrorBody>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponseRef {
    id: String,
    #[serde(default)]
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct FailedResponse {
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum OutputItem {
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug)]
struct FunctionCall {
    call_id: String,
    name: String,
    arguments: String,
}

/// 单轮请求的结果
#[derive(Debug, Default)]
struct Round {
    response_id: Option<String>,
    text: String,
    calls: Vec<FunctionCall>,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    tools: Arc<ToolExecutor>,
    policy: Arc<ApprovalPolicy>,
    max_tool_rounds: usize,
}

/// Responses API 提供方；Clone 共享同一个 HTTP 客户端与审批策略
#[derive(Clone)]
pub struct ResponsesProvider {
    inner: Arc<Inner>,
}

impl ResponsesProvider {
    pub fn new(
        base_url: Option<&str>,
        api_key: &str,
        tools: Arc<ToolExecutor>,
        policy: Arc<ApprovalPolicy>,
        max_tool_rounds: usize,
        request_timeout_secs: u64,
    ) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::Config("empty API key".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs.max(1)))
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url
                    .unwrap_or(DEFAULT_BASE_URL)
                    .trim_end_matches('/')
                    .to_string(),
                api_key: api_key.to_string(),
                tools,
                policy,
                max_tool_rounds: max_tool_rounds.max(1),
            }),
        })
    }

    fn build_request(&self, config: &PhaseConfig, history: &[Message]) -> ResponsesRequest {
        let tools = self
            .inner
            .tools
            .definitions(&config.tools)
            .into_iter()
            .map(|d| {
                json!({
                    "type": "function",
                    "name": d.name,
                    "description": d.description,
                    "parameters": d.parameters,
                    "strict": false,
                })
            })
            .collect();
        ResponsesRequest {
            model: config.model.clone(),
            instructions: config.instructions.clone(),
            input: history
                .iter()
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
                .collect(),
            tools,
            reasoning: config.reasoning,
            text: config.verbosity.map(|verbosity| TextOptions { verbosity }),
            previous_response_id: None,
            stream: true,
        }
    }
}

/// 把 mpsc 接收端包装成 Run
fn run_from_channel(rx: mpsc::UnboundedReceiver<RunItem>) -> Run {
    Run::new(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

fn function_output(call_id: &str, output: &str) -> Value {
    json!({
        "type": "function_call_output",
        "call_id": call_id,
        "output": crate::llm::truncate_chars(output, MAX_TOOL_OUTPUT_CHARS),
    })
}

fn parse_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

impl Inner {
    async fn stream_round(
        &self,
        req: &ResponsesRequest,
        tx: &mpsc::UnboundedSender<RunItem>,
    ) -> Result<Round, LlmError> {
        let response = self
            .http
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut round = Round::default();
        let mut sse = Box::pin(decode_sse(response.bytes_stream()));
        while let Some(data) = sse.next().await {
            let data = data?;
            if data.trim() == "[DONE]" {
                break;
            }
            let event: SseEvent = serde_json::from_str(&data).map_err(|e| {
                LlmError::StreamParse(format!("responses event json error={e} data={data}"))
            })?;
            match event {
                SseEvent::Created { response } => round.response_id = Some(response.id),
                SseEvent::TextDelta { delta } => {
                    round.text.push_str(&delta);
                    let _ = tx.send(RunItem::Event(StreamEvent::TextDelta(delta)));
                }
                SseEvent::ReasoningDelta { delta } => {
                    let _ = tx.send(RunItem::Event(StreamEvent::ReasoningDelta(delta)));
                }
                SseEvent::ItemDone {
                    item:
                        OutputItem::FunctionCall {
                            call_id,
                            name,
                            arguments,
                        },
                } => round.calls.push(FunctionCall {
                    call_id,
                    name,
                    arguments,
                }),
                SseEvent::ItemDone { .. } => {}
                SseEvent::Completed { response } => {
                    if let Some(usage) = &response.usage {
                        tracing::info!(
                            input_tokens = usage.input_tokens,
                            output_tokens = usage.output_tokens,
                            "responses round completed"
                        );
                    }
                    round.response_id = Some(response.id);
                    break;
                }
                SseEvent::Failed { response } => {
                    let message = response
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "response failed".to_string());
                    return Err(LlmError::Provider(message));
                }
                SseEvent::Error { message, error } => {
                    let message = message
                        .or(error.map(|e| e.message))
                        .unwrap_or_else(|| "unknown stream error".to_string());
                    return Err(LlmError::Provider(message));
                }
                SseEvent::Other => {}
            }
        }
        Ok(round)
    }

    async fn run_tool(
        &self,
        call_id: &str,
        name: &str,
        arguments: &str,
        tx: &mpsc::UnboundedSender<RunItem>,
    ) -> Value {
        let _ = tx.send(RunItem::Event(StreamEvent::ToolCallStarted {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }));
        let outcome = self.tools.execute(name, parse_arguments(arguments)).await;
        let _ = tx.send(RunItem::Event(StreamEvent::ToolCallFinished {
            call_id: call_id.to_string(),
            name: name.to_string(),
            output: outcome.output.clone(),
        }));
        function_output(call_id, &outcome.output)
    }

    fn rejected(
        &self,
        call_id: &str,
        name: &str,
        reason: &str,
        tx: &mpsc::UnboundedSender<RunItem>,
    ) -> Value {
        let _ = tx.send(RunItem::Event(StreamEvent::ToolCallFinished {
            call_id: call_id.to_string(),
            name: name.to_string(),
            output: reason.to_string(),
        }));
        function_output(call_id, reason)
    }

    /// 多轮驱动：直到模型不再请求工具、需要审批或出错
    async fn drive(
        &self,
        agent: String,
        mut req: ResponsesRequest,
        mut rounds: usize,
        tx: mpsc::UnboundedSender<RunItem>,
    ) {
        let _ = tx.send(RunItem::Event(StreamEvent::AgentUpdated {
            name: agent.clone(),
        }));
        loop {
            rounds += 1;
            if rounds > self.max_tool_rounds {
                let _ = tx.send(RunItem::Finished(RunOutcome::Failed(LlmError::Provider(
                    format!("tool round limit ({}) reached", self.max_tool_rounds),
                ))));
                return;
            }

            let round = match self.stream_round(&req, &tx).await {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.send(RunItem::Finished(RunOutcome::Failed(e)));
                    return;
                }
            };
            if round.calls.is_empty() {
                let _ = tx.send(RunItem::Finished(RunOutcome::Completed(round.text)));
                return;
            }
            let Some(response_id) = round.response_id else {
                let _ = tx.send(RunItem::Finished(RunOutcome::Failed(
                    LlmError::ResponseFormat("function calls without response id".to_string()),
                )));
                return;
            };

            let mut outputs = Vec::new();
            let mut pending = Vec::new();
            for call in round.calls {
                match self.policy.verdict(&call.name) {
                    PolicyVerdict::Allow => {
                        outputs.push(
                            self.run_tool(&call.call_id, &call.name, &call.arguments, &tx)
                                .await,
                        );
                    }
                    PolicyVerdict::Deny => {
                        outputs.push(self.rejected(
                            &call.call_id,
                            &call.name,
                            "Tool call rejected by user policy",
                            &tx,
                        ));
                    }
                    PolicyVerdict::Ask => {
                        let _ = tx.send(RunItem::Event(StreamEvent::ApprovalRequested {
                            call_id: call.call_id.clone(),
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        }));
                        pending.push(ApprovalItem {
                            call_id: call.call_id,
                            tool_name: call.name,
                            arguments: parse_arguments(&call.arguments),
                        });
                    }
                }
            }

            req.previous_response_id = Some(response_id);
            req.input = Vec::new();

            if !pending.is_empty() {
                let state = SuspendedState {
                    agent: agent.clone(),
                    request: req,
                    outputs,
                    rounds,
                };
                let outcome = match serde_json::to_value(&state) {
                    Ok(state) => RunOutcome::Suspended {
                        continuation: Continuation::new(state, pending.clone()),
                        approvals: pending,
                    },
                    Err(e) => RunOutcome::Failed(e.into()),
                };
                let _ = tx.send(RunItem::Finished(outcome));
                return;
            }
            req.input = outputs;
        }
    }

    /// 按决定执行或拒绝挂起的调用，然后继续驱动
    async fn resume(
        &self,
        state: SuspendedState,
        pending: Vec<ApprovalItem>,
        decisions: Vec<ApprovalDecision>,
        tx: mpsc::UnboundedSender<RunItem>,
    ) {
        let SuspendedState {
            agent,
            mut request,
            mut outputs,
            rounds,
        } = state;
        for item in pending {
            let decision = decisions.iter().find(|d| d.call_id == item.call_id);
            let approved = decision.map(|d| d.approved).unwrap_or(false);
            if let Some(d) = decision.filter(|d| d.always) {
                self.policy.remember(&item.tool_name, d.approved);
            }
            let output = if approved {
                self.run_tool(
                    &item.call_id,
                    &item.tool_name,
                    &item.arguments.to_string(),
                    &tx,
                )
                .await
            } else {
                self.rejected(&item.call_id, &item.tool_name, "Tool call rejected by user", &tx)
            };
            outputs.push(output);
        }
        request.input = outputs;
        self.drive(agent, request, rounds, tx).await;
    }
}

#[async_trait]
impl ExecutionProvider for ResponsesProvider {
    async fn submit_run(&self, config: &PhaseConfig, history: &[Message]) -> Run {
        let req = self.build_request(config, history);
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = self.inner.clone();
        let agent = config.name.clone();
        tokio::spawn(async move { inner.drive(agent, req, 0, tx).await });
        run_from_channel(rx)
    }

    async fn resume_run(&self, continuation: Continuation) -> Run {
        let (state, pending, decisions) = continuation.into_parts();
        let state: SuspendedState = match serde_json::from_value(state) {
            Ok(s) => s,
            Err(e) => {
                return Run::failed(LlmError::ResponseFormat(format!(
                    "continuation state is not a responses snapshot: {e}"
                )))
            }
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.resume(state, pending, decisions, tx).await });
        run_from_channel(rx)
    }
}

/// 在字节缓冲中查找事件分隔（空行）
fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// 解析 SSE：按空行切分事件，拼接 data: 行
///
/// 缓冲原始字节，只解码完整事件，分块边界落在多字节字符中间时不会损坏文本。
/// `\r` 不会出现在 UTF-8 多字节序列内，入缓冲时直接丢弃。
fn decode_sse<S>(bytes_stream: S) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    futures_util::stream::unfold(
        (bytes_stream, BytesMut::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                if let Some(idx) = find_event_end(&buffer) {
                    let raw = buffer.split_to(idx + 2);
                    let raw = match std::str::from_utf8(&raw) {
                        Ok(raw) => raw,
                        Err(e) => {
                            let err = LlmError::StreamParse(format!("invalid utf-8 in event: {e}"));
                            return Some((Err(err), (stream, buffer)));
                        }
                    };
                    let data: Vec<&str> = raw
                        .lines()
                        .filter_map(|l| l.strip_prefix("data:"))
                        .map(|l| l.trim_start())
                        .collect();
                    if data.is_empty() {
                        continue;
                    }
                    let data = data.join("\n");
                    return Some((Ok(data), (stream, buffer)));
                }
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
                    }
                    Some(Err(e)) => return Some((Err(LlmError::from(e)), (stream, buffer))),
                    None => return None,
                }
            }
        },
    )
}
