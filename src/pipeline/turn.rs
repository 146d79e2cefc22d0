//! 分阶段回合编排器
//!
//! 一个回合依次运行 Planning → Guidance →（可选）离线推理摘要 → Execution，最后统一进入后处理。
//! 任一模型调用都可能因工具审批而挂起：回合状态连同 Continuation 放入审批队列，活动槽位释放；
//! 最后一条审批被决定后由 [`TurnPipeline::decide`] 交回 [`ResumeTicket`]，调用方再 [`TurnPipeline::resume`]。
//!
//! 活动槽位保证同一时刻最多只有一个未挂起的回合（跨来源）。共享状态的锁从不跨 await 持有。

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::core::breaker::{CAPABILITY_NOTICE, DEGRADED_NOTICE};
use crate::core::{
    AgentError, AgentPhase, CapabilityBreaker, RecoveryAction, RecoveryEngine, Refusal, UiState,
};
use crate::llm::{Continuation, ExecutionProvider, LlmError, RunOutcome};
use crate::memory::{ConversationMemory, LongTermRecall, MemoryCollaborator, Message, NoopLongTerm, Role};
use crate::pipeline::{
    consume, synthesize_summary, ApprovalQueue, Decided, LingerConfig, PendingApproval, Phase,
    PhaseSettings, SharedEventLog, TurnPostProcessor, TurnSource, DEFAULT_EVENT_LOG_CAPACITY,
};
use crate::todos::{TaskBoard, TodoList};

/// UiState 中保留的事件日志条数
const UI_EVENT_TAIL: usize = 50;

/// 回合的终态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { reply: String },
    Suspended { pending: usize },
    Failed { error: String },
}

/// 占用活动槽位的回合；drop 时释放
#[derive(Debug)]
pub struct ActiveTurn {
    source: TurnSource,
    directive: Option<Message>,
    slot: Arc<Mutex<Option<TurnSource>>>,
}

impl ActiveTurn {
    pub fn source(&self) -> TurnSource {
        self.source
    }
}

impl Drop for ActiveTurn {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if *slot == Some(self.source) {
            *slot = None;
        }
    }
}

/// 挂起期间随 Continuation 一起保存的回合状态
#[derive(Debug)]
pub struct TurnState {
    source: TurnSource,
    /// 工作历史：可见历史 + 指令 + 阶段中间消息
    working: Vec<Message>,
    stage: Phase,
    planning: String,
    guidance: String,
    capability_at_start: bool,
    polyfilled: bool,
    retried: bool,
}

/// 全部审批已决定、已占用活动槽位的恢复凭据
#[derive(Debug)]
pub struct ResumeTicket {
    turn: ActiveTurn,
    continuation: Continuation,
    state: TurnState,
}

impl ResumeTicket {
    pub fn source(&self) -> TurnSource {
        self.turn.source
    }
}

/// decide 的结果
#[derive(Debug)]
pub enum DecideOutcome {
    Waiting { remaining: usize },
    Resume(ResumeTicket),
}

/// 审批的定位方式
#[derive(Debug, Clone, Copy)]
enum Target {
    Index(usize),
    Id(u64),
}

impl Target {
    fn locate(self, queue: &ApprovalQueue<TurnState>) -> Option<usize> {
        match self {
            Target::Index(i) => (i < queue.len()).then_some(i),
            Target::Id(id) => queue.entries().iter().position(|e| e.id == id),
        }
    }

    fn unknown(self) -> AgentError {
        match self {
            Target::Index(i) => AgentError::UnknownApproval(format!("no pending approval at index {}", i)),
            Target::Id(id) => AgentError::UnknownApproval(format!("approval {} not pending", id)),
        }
    }
}

struct Shared {
    history: ConversationMemory,
    live_text: String,
    queue: ApprovalQueue<TurnState>,
    phase: AgentPhase,
    error_message: Option<String>,
}

pub struct TurnPipeline {
    provider: Arc<dyn ExecutionProvider>,
    phases: PhaseSettings,
    breaker: Arc<CapabilityBreaker>,
    memory: Arc<dyn MemoryCollaborator>,
    post: TurnPostProcessor,
    recovery: RecoveryEngine,
    log: SharedEventLog,
    user_id: String,
    linger: Option<watch::Receiver<LingerConfig>>,
    shared: Mutex<Shared>,
    slot: Arc<Mutex<Option<TurnSource>>>,
    ui_tx: watch::Sender<UiState>,
}

impl TurnPipeline {
    pub fn new(provider: Arc<dyn ExecutionProvider>, phases: PhaseSettings) -> Self {
        let (ui_tx, _) = watch::channel(UiState::default());
        Self {
            provider,
            phases,
            breaker: Arc::new(CapabilityBreaker::new()),
            memory: Arc::new(LongTermRecall::new(Arc::new(NoopLongTerm))),
            post: TurnPostProcessor::new(Arc::new(TodoList::new())),
            recovery: RecoveryEngine::new(),
            log: SharedEventLog::new(DEFAULT_EVENT_LOG_CAPACITY),
            user_id: "local".to_string(),
            linger: None,
            shared: Mutex::new(Shared {
                history: ConversationMemory::new(),
                live_text: String::new(),
                queue: ApprovalQueue::new(),
                phase: AgentPhase::Idle,
                error_message: None,
            }),
            slot: Arc::new(Mutex::new(None)),
            ui_tx,
        }
    }

    pub fn with_breaker(mut self, breaker: Arc<CapabilityBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryCollaborator>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<dyn TaskBoard>) -> Self {
        self.post = TurnPostProcessor::new(tasks);
        self
    }

    pub fn with_event_log(mut self, log: SharedEventLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_linger(mut self, linger: watch::Receiver<LingerConfig>) -> Self {
        self.linger = Some(linger);
        self
    }

    /// 订阅 UiState 快照
    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.ui_tx.subscribe()
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active(&self) -> Option<TurnSource> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_busy(&self) -> bool {
        self.active().is_some()
    }

    pub fn capability_enabled(&self) -> bool {
        self.breaker.is_enabled()
    }

    pub fn history(&self) -> Vec<Message> {
        self.shared().history.messages().to_vec()
    }

    pub fn pending_approvals(&self) -> Vec<PendingApproval> {
        self.shared().queue.entries().to_vec()
    }

    pub fn approval_cursor(&self) -> usize {
        self.shared().queue.cursor()
    }

    pub fn event_log(&self) -> &SharedEventLog {
        &self.log
    }

    pub fn todo_summary(&self) -> String {
        self.post.todo_summary()
    }

    /// 当前状态的投影
    pub fn snapshot(&self) -> UiState {
        let shared = self.shared();
        let active_source = self.active();
        let phase = if shared.phase == AgentPhase::Idle && !shared.queue.is_empty() {
            AgentPhase::AwaitingApproval
        } else {
            shared.phase
        };
        UiState {
            phase,
            active_source,
            history: shared.history.messages().to_vec(),
            live_text: shared.live_text.clone(),
            event_log: self.log.tail(UI_EVENT_TAIL),
            approvals: shared.queue.entries().to_vec(),
            approval_cursor: shared.queue.cursor(),
            capability_enabled: self.breaker.is_enabled(),
            linger_enabled: self
                .linger
                .as_ref()
                .map(|rx| rx.borrow().enabled)
                .unwrap_or(false),
            todo_summary: self.post.todo_summary(),
            input_locked: active_source.is_some(),
            error_message: shared.error_message.clone(),
        }
    }

    /// 把不进入回合的错误（如忙碌时提交）展示在状态栏
    pub fn report(&self, err: &AgentError) {
        let text = match self.recovery.handle(err) {
            RecoveryAction::ReportToUser(text) => text,
            _ => err.to_string(),
        };
        tracing::warn!(error = %err, "command rejected");
        self.shared().error_message = Some(text);
        self.publish();
    }

    /// 重新投影并发布；没有订阅者时也更新当前值
    pub fn publish(&self) {
        self.ui_tx.send_replace(self.snapshot());
    }

    fn begin(&self, source: TurnSource, directive: Option<Message>) -> Result<ActiveTurn, AgentError> {
        {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(active) = *slot {
                return Err(AgentError::TurnActive(active));
            }
            *slot = Some(source);
        }
        Ok(ActiveTurn {
            source,
            directive,
            slot: self.slot.clone(),
        })
    }

    /// 开始一个聊天回合：占用槽位后把用户消息追加到可见历史
    pub fn submit_chat(&self, text: &str) -> Result<ActiveTurn, AgentError> {
        let turn = self.begin(TurnSource::Chat, None)?;
        {
            let mut shared = self.shared();
            shared.history.push(Message::user(text));
            shared.error_message = None;
        }
        self.publish();
        Ok(turn)
    }

    /// 开始一个 linger 回合；指令只进入工作历史
    pub fn begin_linger(&self, directive: Message) -> Result<ActiveTurn, AgentError> {
        let turn = self.begin(TurnSource::Linger, Some(directive))?;
        self.shared().error_message = None;
        self.publish();
        Ok(turn)
    }

    pub async fn run_turn(&self, mut turn: ActiveTurn) -> TurnOutcome {
        let mut working = self.history();
        if let Some(directive) = turn.directive.take() {
            working.push(directive);
        }
        let state = TurnState {
            source: turn.source,
            working,
            stage: Phase::Planning,
            planning: String::new(),
            guidance: String::new(),
            capability_at_start: self.breaker.is_enabled(),
            polyfilled: false,
            retried: false,
        };
        tracing::info!(source = %turn.source, "turn started");
        self.drive(turn, state, None).await
    }

    pub async fn resume(&self, ticket: ResumeTicket) -> TurnOutcome {
        let ResumeTicket {
            turn,
            continuation,
            state,
        } = ticket;
        tracing::info!(source = %turn.source, continuation = %continuation.id(), "turn resumed");
        self.drive(turn, state, Some(continuation)).await
    }

    pub fn select(&self, index: usize) -> usize {
        let cursor = self.shared().queue.select(index);
        self.publish();
        cursor
    }

    pub fn move_selection(&self, delta: isize) -> usize {
        let cursor = self.shared().queue.move_cursor(delta);
        self.publish();
        cursor
    }

    /// 对光标处（或指定下标）的审批做决定
    pub fn decide(&self, index: usize, approve: bool, always: bool) -> Result<DecideOutcome, AgentError> {
        self.decide_target(Target::Index(index), approve, always)
    }

    /// 按审批 id 做决定；重复决定同一 id 报 UnknownApproval，不恢复也不挂起任何回合
    pub fn decide_id(&self, id: u64, approve: bool, always: bool) -> Result<DecideOutcome, AgentError> {
        self.decide_target(Target::Id(id), approve, always)
    }

    fn decide_target(&self, target: Target, approve: bool, always: bool) -> Result<DecideOutcome, AgentError> {
        let (source, result) = {
            let mut shared = self.shared();
            let source = target.locate(&shared.queue).map(|i| shared.queue.entries()[i].source);
            (source, self.decide_locked(&mut shared, target, approve, always))
        };
        if let Err(e) = &result {
            if self.recovery.handle(e) == RecoveryAction::KeepSuspended {
                tracing::warn!(error = %e, "approval decision not applied");
            }
            // 未知下标 / id 时没有可归属的来源
            self.log
                .push(source.unwrap_or(TurnSource::Chat), format!("approval error: {}", e));
        }
        self.publish();
        result
    }

    fn decide_locked(
        &self,
        shared: &mut Shared,
        target: Target,
        approve: bool,
        always: bool,
    ) -> Result<DecideOutcome, AgentError> {
        let index = target.locate(&shared.queue).ok_or_else(|| target.unknown())?;
        let entry = &shared.queue.entries()[index];
        let (source, continuation_id, tool) = (entry.source, entry.continuation_id, entry.tool_name.clone());

        // 这条决定会让 Continuation 恢复时，持有槽位锁直到认领完成
        let last_for_continuation = shared
            .queue
            .entries()
            .iter()
            .filter(|e| e.continuation_id == continuation_id)
            .count()
            == 1;
        let mut slot = if last_for_continuation {
            let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(active) = *slot {
                return Err(AgentError::TurnActive(active));
            }
            Some(slot)
        } else {
            None
        };

        let decided = match target {
            Target::Index(i) => shared.queue.decide(i, approve, always)?,
            Target::Id(id) => shared.queue.decide_by_id(id, approve, always)?,
        };
        let verdict = match (approve, always) {
            (true, false) => "approved",
            (true, true) => "always approved",
            (false, false) => "rejected",
            (false, true) => "always rejected",
        };
        self.log.push(source, format!("{} {}", verdict, tool));

        match decided {
            Decided::Waiting { remaining, .. } => Ok(DecideOutcome::Waiting { remaining }),
            Decided::Resume(r) => {
                let mut slot = match slot.take() {
                    Some(slot) => slot,
                    None => self.slot.lock().unwrap_or_else(|e| e.into_inner()),
                };
                *slot = Some(r.source);
                drop(slot);
                Ok(DecideOutcome::Resume(ResumeTicket {
                    turn: ActiveTurn {
                        source: r.source,
                        directive: None,
                        slot: self.slot.clone(),
                    },
                    continuation: r.continuation,
                    state: r.payload,
                }))
            }
        }
    }

    /// 丢弃可见历史与全部挂起；有回合进行中时拒绝
    pub fn clear(&self) -> Result<usize, AgentError> {
        if let Some(active) = self.active() {
            return Err(AgentError::TurnActive(active));
        }
        let dropped = {
            let mut shared = self.shared();
            shared.history.clear();
            shared.live_text.clear();
            shared.error_message = None;
            shared.phase = AgentPhase::Idle;
            shared.queue.clear()
        };
        self.publish();
        Ok(dropped)
    }

    fn set_phase(&self, phase: AgentPhase) {
        self.shared().phase = phase;
        self.publish();
    }

    fn set_live_text(&self, text: &str) {
        {
            let mut shared = self.shared();
            shared.live_text.clear();
            shared.live_text.push_str(text);
        }
        self.publish();
    }

    fn notify_visible(&self, source: TurnSource, notice: &str) {
        self.shared().history.push(Message::system(notice));
        self.log.push(source, notice.to_string());
    }

    /// 当有相关长期记忆时，前置为一条 system 上下文消息（不写入历史）
    async fn with_recall(&self, working: &[Message]) -> Vec<Message> {
        match self.memory.recall(working).await {
            Ok(ctx) if !ctx.trim().is_empty() => {
                let mut history = Vec::with_capacity(working.len() + 1);
                history.push(Message::system(format!("Relevant memory:\n{}", ctx.trim())));
                history.extend_from_slice(working);
                history
            }
            Ok(_) => working.to_vec(),
            Err(e) => {
                tracing::warn!(error = %e, "memory recall failed");
                working.to_vec()
            }
        }
    }

    fn polyfill(&self, state: &mut TurnState) {
        if state.polyfilled {
            return;
        }
        state.polyfilled = true;
        self.set_phase(AgentPhase::Reasoning);
        if let Some(summary) = synthesize_summary(&state.planning, &state.guidance) {
            state.working.push(Message::assistant(summary));
            self.log
                .push(state.source, "reasoning summary synthesized offline");
        }
    }

    /// 处理能力拒绝；返回 false 表示本回合已重试过，应按普通错误结束
    fn on_refusal(&self, refusal: Refusal, state: &mut TurnState, raw: &str) -> bool {
        let action = self
            .recovery
            .handle(&AgentError::CapabilityRefusal(raw.to_string()));
        if refusal == Refusal::Fresh {
            self.notify_visible(state.source, CAPABILITY_NOTICE);
        }
        if state.retried || action != RecoveryAction::RetryWithoutCapability {
            return false;
        }
        state.retried = true;
        tracing::info!(source = %state.source, phase = %state.stage, "retrying turn without reasoning summaries");
        if state.planning.is_empty() && state.guidance.is_empty() {
            state.stage = Phase::Planning;
        } else {
            self.polyfill(state);
            state.stage = Phase::Execution;
        }
        true
    }

    async fn drive(
        &self,
        turn: ActiveTurn,
        mut state: TurnState,
        mut resume: Option<Continuation>,
    ) -> TurnOutcome {
        loop {
            if state.stage == Phase::Planning && resume.is_none() && !self.breaker.is_enabled() {
                if !state.working.iter().any(|m| m.content == DEGRADED_NOTICE) {
                    state.working.push(Message::system(DEGRADED_NOTICE));
                }
                state.stage = Phase::Execution;
            }
            let phase = state.stage;
            self.set_phase(match phase {
                Phase::Planning => AgentPhase::Planning,
                Phase::Guidance => AgentPhase::Guidance,
                Phase::Execution => AgentPhase::Executing,
            });

            let run = match resume.take() {
                Some(continuation) => self.provider.resume_run(continuation).await,
                None => {
                    let history = self.with_recall(&state.working).await;
                    let config = self.phases.to_config(phase, self.breaker.is_enabled());
                    tracing::debug!(source = %state.source, phase = %phase, model = %config.model, "submitting run");
                    self.provider.submit_run(&config, &history).await
                }
            };

            let consumed = if phase == Phase::Execution {
                let live = |text: &str| self.set_live_text(text);
                consume(run, state.source, &self.log, Some(&live)).await
            } else {
                consume(run, state.source, &self.log, None).await
            };

            match consumed.outcome {
                RunOutcome::Completed(text) => {
                    if let Some(refusal) = self.breaker.guard_text(&text) {
                        if self.on_refusal(refusal, &mut state, &text) {
                            continue;
                        }
                        return self.fail(turn, LlmError::Provider(text)).await;
                    }
                    match phase {
                        Phase::Planning => {
                            state
                                .working
                                .push(Message::assistant(format!("{}\n{}", phase.label(), text)));
                            state.planning = text;
                            state.stage = Phase::Guidance;
                        }
                        Phase::Guidance => {
                            state
                                .working
                                .push(Message::assistant(format!("{}\n{}", phase.label(), text)));
                            state.guidance = text;
                            if state.capability_at_start && !self.breaker.is_enabled() {
                                self.polyfill(&mut state);
                            }
                            state.stage = Phase::Execution;
                        }
                        Phase::Execution => return self.complete(turn, state, text).await,
                    }
                }
                RunOutcome::Suspended {
                    continuation,
                    approvals,
                } => {
                    let source = state.source;
                    let pending = approvals.len();
                    let ready = {
                        let mut shared = self.shared();
                        shared.phase = AgentPhase::Idle;
                        shared.live_text.clear();
                        shared.queue.enqueue(source, continuation, approvals, state)
                    };
                    if let Some(r) = ready {
                        state = r.payload;
                        resume = Some(r.continuation);
                        continue;
                    }
                    tracing::info!(source = %source, phase = %phase, pending, "turn suspended for approval");
                    let outcome = TurnOutcome::Suspended { pending };
                    self.finish(turn, &outcome).await;
                    return outcome;
                }
                RunOutcome::Failed(err) => {
                    if let Some(refusal) = self.breaker.guard_error(&err) {
                        if self.on_refusal(refusal, &mut state, &err.to_string()) {
                            continue;
                        }
                    }
                    return self.fail(turn, err).await;
                }
            }
        }
    }

    async fn complete(&self, turn: ActiveTurn, state: TurnState, reply: String) -> TurnOutcome {
        let reply_msg = Message::assistant(reply.clone());
        let mut exchange: Vec<Message> = state
            .working
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .cloned()
            .into_iter()
            .collect();
        exchange.push(reply_msg.clone());
        {
            let mut shared = self.shared();
            shared.history.push(reply_msg);
            shared.live_text.clear();
            shared.phase = AgentPhase::Idle;
        }

        let memory = self.memory.clone();
        let user_id = self.user_id.clone();
        tokio::spawn(async move {
            if let Err(e) = memory.memorize(&exchange, &user_id).await {
                tracing::warn!(error = %e, "memorize failed");
            }
        });

        let outcome = TurnOutcome::Completed { reply };
        self.finish(turn, &outcome).await;
        outcome
    }

    async fn fail(&self, turn: ActiveTurn, err: LlmError) -> TurnOutcome {
        let err = AgentError::from(err);
        let text = match self.recovery.handle(&err) {
            RecoveryAction::ReportToUser(text) => text,
            _ => format!("Error: {}", err),
        };
        tracing::warn!(source = %turn.source, error = %err, "turn failed");
        {
            let mut shared = self.shared();
            shared.history.push(Message::assistant(text.clone()));
            shared.live_text.clear();
            shared.phase = AgentPhase::Error;
            shared.error_message = Some(text.clone());
        }
        let outcome = TurnOutcome::Failed { error: text };
        self.finish(turn, &outcome).await;
        outcome
    }

    /// 后处理完成后才释放活动槽位
    async fn finish(&self, turn: ActiveTurn, outcome: &TurnOutcome) {
        self.post.run(turn.source, outcome, &self.log).await;
        drop(turn);
        self.publish();
    }
}
