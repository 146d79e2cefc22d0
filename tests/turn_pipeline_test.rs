//! 回合流水线集成测试：用 MockProvider 驱动完整回合

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use murmur::core::breaker::{CAPABILITY_NOTICE, DEGRADED_NOTICE};
    use murmur::core::{AgentError, CapabilityBreaker};
    use murmur::llm::{
        ApprovalItem, Continuation, ExecutionProvider, MockProvider, MockStep, PhaseConfig,
        ReasoningEffort, ReasoningSettings, ReasoningSummary, Run, RunItem, RunOutcome,
    };
    use murmur::memory::{Message, Role};
    use murmur::pipeline::{
        AmbientUpdate, DecideOutcome, LingerConfig, LingerScheduler, PhaseProfile, PhaseSettings,
        TurnOutcome, TurnPipeline, TurnSource,
    };
    use murmur::todos::TaskBoard;
    use serde_json::json;
    use tokio::sync::watch;
    use tokio::time::Instant;

    const REFUSAL: &str =
        "Your organization must be verified to generate reasoning summaries. Please verify.";

    /// 统计后处理调用次数的任务清单
    #[derive(Default)]
    struct CountingBoard {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskBoard for CountingBoard {
        async fn auto_resolve_outstanding(&self) -> Result<Vec<String>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn summary(&self) -> String {
            String::new()
        }
    }

    fn reasoning_settings() -> PhaseSettings {
        let reasoning = ReasoningSettings {
            effort: Some(ReasoningEffort::Low),
            summary: Some(ReasoningSummary::Auto),
        };
        PhaseSettings {
            planning: PhaseProfile::new("plan-model", "plan").with_reasoning(reasoning.clone()),
            guidance: PhaseProfile::new("guide-model", "guide").with_reasoning(reasoning.clone()),
            execution: PhaseProfile::new("exec-model", "execute").with_reasoning(reasoning),
        }
    }

    struct Harness {
        provider: Arc<MockProvider>,
        board: Arc<CountingBoard>,
        pipeline: Arc<TurnPipeline>,
        linger_tx: watch::Sender<LingerConfig>,
    }

    fn harness(steps: Vec<MockStep>) -> Harness {
        let provider = Arc::new(MockProvider::with_script(steps));
        let board = Arc::new(CountingBoard::default());
        let (linger_tx, linger_rx) = watch::channel(LingerConfig {
            enabled: true,
            behavior: "Offer help when useful.".into(),
            min_interval: Duration::from_secs(20),
        });
        let pipeline = TurnPipeline::new(provider.clone(), reasoning_settings())
            .with_breaker(Arc::new(CapabilityBreaker::new()))
            .with_tasks(board.clone())
            .with_linger(linger_rx);
        Harness {
            provider,
            board,
            pipeline: Arc::new(pipeline),
            linger_tx,
        }
    }

    fn reply(text: &str) -> MockStep {
        MockStep::Reply(text.to_string())
    }

    fn shell_call() -> MockStep {
        MockStep::RequestApproval(vec![("shell".into(), json!({"command": "ls"}))])
    }

    fn assistant_count(pipeline: &TurnPipeline) -> usize {
        pipeline
            .history()
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count()
    }

    async fn suspend_list_files(h: &Harness) {
        let turn = h.pipeline.submit_chat("list my files").unwrap();
        let outcome = h.pipeline.run_turn(turn).await;
        assert_eq!(outcome, TurnOutcome::Suspended { pending: 1 });
    }

    #[tokio::test]
    async fn test_scenario_execution_tool_suspends_turn() {
        let h = harness(vec![reply("1. list"), reply("use ls"), shell_call()]);
        suspend_list_files(&h).await;

        let pending = h.pipeline.pending_approvals();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source, TurnSource::Chat);
        assert_eq!(pending[0].tool_name, "shell");
        assert!(!h.pipeline.is_busy());
        assert_eq!(assistant_count(&h.pipeline), 0);

        let names: Vec<String> = h.provider.submitted().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["planning", "guidance", "execution"]);
    }

    #[tokio::test]
    async fn test_scenario_approve_resumes_and_completes() {
        let h = harness(vec![reply("1. list"), reply("use ls"), shell_call(), reply("a.txt b.txt")]);
        suspend_list_files(&h).await;
        let post_runs = h.board.calls.load(Ordering::SeqCst);

        let ticket = match h.pipeline.decide(0, true, false).unwrap() {
            DecideOutcome::Resume(ticket) => ticket,
            other => panic!("expected resume, got {:?}", other),
        };
        assert!(h.pipeline.is_busy());
        let outcome = h.pipeline.resume(ticket).await;
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                reply: "a.txt b.txt".into()
            }
        );

        let history = h.pipeline.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "a.txt b.txt");
        assert_eq!(h.board.calls.load(Ordering::SeqCst), post_runs + 1);
        assert!(h.pipeline.pending_approvals().is_empty());
        assert!(!h.pipeline.is_busy());

        let resumed = h.provider.resumed();
        assert_eq!(resumed.len(), 1);
        assert!(resumed[0][0].approved && !resumed[0][0].always);
    }

    #[tokio::test]
    async fn test_scenario_refusal_trips_breaker_and_retries_degraded() {
        let h = harness(vec![MockStep::Fail(REFUSAL.into()), reply("done")]);
        let turn = h.pipeline.submit_chat("hello").unwrap();
        let outcome = h.pipeline.run_turn(turn).await;
        assert_eq!(outcome, TurnOutcome::Completed { reply: "done".into() });
        assert!(!h.pipeline.capability_enabled());

        let submitted = h.provider.submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].name, "planning");
        assert!(submitted[0].reasoning.is_some());
        assert_eq!(submitted[1].name, "execution");
        assert!(submitted[1].reasoning.is_none());

        let history = h.pipeline.history();
        let notices = history
            .iter()
            .filter(|m| m.content == CAPABILITY_NOTICE)
            .count();
        assert_eq!(notices, 1);
        assert!(history.iter().all(|m| !m.content.contains("must be verified")));
        assert_eq!(history.last().unwrap().content, "done");
    }

    #[tokio::test]
    async fn test_scenario_linger_min_interval() {
        let (_tx, rx) = watch::channel(LingerConfig {
            enabled: true,
            behavior: "Help.".into(),
            min_interval: Duration::from_secs(20),
        });
        let mut scheduler = LingerScheduler::new(rx);
        let update = AmbientUpdate {
            summary: "standup".into(),
            utterance: "we should ship it".into(),
        };
        let t0 = Instant::now();
        assert!(scheduler.evaluate(&update, false, t0).is_some());
        assert!(scheduler.evaluate(&update, false, t0 + Duration::from_secs(5)).is_none());
        assert!(scheduler.evaluate(&update, false, t0 + Duration::from_secs(25)).is_some());
    }

    #[tokio::test]
    async fn test_one_assistant_message_per_completed_turn() {
        let h = harness(vec![reply("plan"), reply("guide"), reply("answer")]);
        let turn = h.pipeline.submit_chat("question").unwrap();
        h.pipeline.run_turn(turn).await;

        let history = h.pipeline.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "answer");

        // Planning / Guidance 输出只进入后续阶段的工作历史
        let exec_history = h.provider.histories().pop().unwrap();
        assert!(exec_history.iter().any(|m| m.content.starts_with("[Planning]")));
        assert!(exec_history.iter().any(|m| m.content.starts_with("[Guidance]")));
    }

    #[tokio::test]
    async fn test_cursor_bounds_and_resume_after_last_decision() {
        let h = harness(vec![
            reply("plan"),
            reply("guide"),
            MockStep::RequestApproval(vec![
                ("shell".into(), json!({"command": "ls"})),
                ("write".into(), json!({"path": "a.txt"})),
            ]),
            reply("ok"),
        ]);
        let turn = h.pipeline.submit_chat("do both").unwrap();
        assert_eq!(
            h.pipeline.run_turn(turn).await,
            TurnOutcome::Suspended { pending: 2 }
        );

        assert_eq!(h.pipeline.move_selection(10), 1);
        assert_eq!(h.pipeline.move_selection(-10), 0);
        assert_eq!(h.pipeline.select(7), 1);

        match h.pipeline.decide(1, false, false).unwrap() {
            DecideOutcome::Waiting { remaining } => assert_eq!(remaining, 1),
            other => panic!("expected waiting, got {:?}", other),
        }
        assert_eq!(h.pipeline.approval_cursor(), 0);
        assert!(!h.pipeline.is_busy());

        let ticket = match h.pipeline.decide(0, true, false).unwrap() {
            DecideOutcome::Resume(ticket) => ticket,
            other => panic!("expected resume, got {:?}", other),
        };
        h.pipeline.resume(ticket).await;
        let resumed = h.provider.resumed();
        assert_eq!(resumed[0].len(), 2);
        assert_eq!(resumed[0].iter().filter(|d| d.approved).count(), 1);
    }

    #[tokio::test]
    async fn test_deciding_same_id_twice_is_noop() {
        let h = harness(vec![reply("plan"), reply("guide"), shell_call(), reply("ok")]);
        suspend_list_files(&h).await;
        let id = h.pipeline.pending_approvals()[0].id;

        let ticket = match h.pipeline.decide_id(id, true, false).unwrap() {
            DecideOutcome::Resume(ticket) => ticket,
            other => panic!("expected resume, got {:?}", other),
        };
        let again = h.pipeline.decide_id(id, true, false);
        assert!(matches!(again, Err(AgentError::UnknownApproval(_))));
        assert!(h.pipeline.pending_approvals().is_empty());

        h.pipeline.resume(ticket).await;
        assert!(matches!(
            h.pipeline.decide_id(id, false, false),
            Err(AgentError::UnknownApproval(_))
        ));
        assert_eq!(h.provider.resumed().len(), 1);
        assert!(!h.pipeline.is_busy());
    }

    #[tokio::test]
    async fn test_resume_refused_while_other_turn_active() {
        let h = harness(vec![reply("plan"), reply("guide"), shell_call()]);
        suspend_list_files(&h).await;

        let other = h.pipeline.submit_chat("another").unwrap();
        assert!(matches!(
            h.pipeline.decide(0, true, false),
            Err(AgentError::TurnActive(TurnSource::Chat))
        ));
        assert_eq!(h.pipeline.pending_approvals().len(), 1);
        drop(other);
        assert!(matches!(
            h.pipeline.decide(0, true, false),
            Ok(DecideOutcome::Resume(_))
        ));
    }

    #[tokio::test]
    async fn test_breaker_never_reenables() {
        let h = harness(vec![MockStep::Fail(REFUSAL.into()), reply("first")]);
        let turn = h.pipeline.submit_chat("one").unwrap();
        h.pipeline.run_turn(turn).await;
        assert!(!h.pipeline.capability_enabled());

        h.provider.push_steps(vec![MockStep::Fail("network down".into())]);
        let turn = h.pipeline.submit_chat("two").unwrap();
        assert!(matches!(
            h.pipeline.run_turn(turn).await,
            TurnOutcome::Failed { .. }
        ));

        let turn = h.pipeline.submit_chat("three").unwrap();
        h.pipeline.run_turn(turn).await;

        assert!(!h.pipeline.capability_enabled());
        let submitted = h.provider.submitted();
        assert!(submitted[1..].iter().all(|c| c.reasoning.is_none()));
        assert!(submitted[1..].iter().all(|c| c.name == "execution"));
        let notices = h
            .pipeline
            .history()
            .iter()
            .filter(|m| m.content == CAPABILITY_NOTICE)
            .count();
        assert_eq!(notices, 1);
    }

    #[tokio::test]
    async fn test_refusal_after_guidance_polyfills_summary() {
        let h = harness(vec![
            reply("1. read the file\n2. summarize it"),
            reply("- use cat"),
            MockStep::Fail(REFUSAL.into()),
            reply("summary done"),
        ]);
        let turn = h.pipeline.submit_chat("summarize notes").unwrap();
        let outcome = h.pipeline.run_turn(turn).await;
        assert_eq!(outcome, TurnOutcome::Completed { reply: "summary done".into() });

        let submitted = h.provider.submitted();
        let names: Vec<&str> = submitted.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["planning", "guidance", "execution", "execution"]);
        assert!(submitted[3].reasoning.is_none());
        let last = h.provider.histories().pop().unwrap();
        assert!(last
            .iter()
            .any(|m| m.content.starts_with("[Reasoning summary]")));
    }

    #[tokio::test]
    async fn test_linger_dropped_while_chat_active() {
        let h = harness(vec![reply("plan"), reply("guide"), reply("chat answer")]);
        let mut scheduler = LingerScheduler::new(h.linger_tx.subscribe());
        let update = AmbientUpdate {
            summary: "meeting".into(),
            utterance: "what was the deadline?".into(),
        };

        let turn = h.pipeline.submit_chat("hi").unwrap();
        let now = Instant::now();
        assert!(scheduler.evaluate(&update, h.pipeline.is_busy(), now).is_none());
        assert!(matches!(
            h.pipeline.begin_linger(Message::user("tick")),
            Err(AgentError::TurnActive(TurnSource::Chat))
        ));
        h.pipeline.run_turn(turn).await;
        assert_eq!(h.board.calls.load(Ordering::SeqCst), 1);

        let directive = scheduler
            .evaluate(&update, h.pipeline.is_busy(), now + Duration::from_secs(1))
            .expect("tick accepted after chat turn");
        let turn = h.pipeline.begin_linger(directive).unwrap();
        assert_eq!(turn.source(), TurnSource::Linger);
        h.pipeline.run_turn(turn).await;

        // 指令不进入可见历史
        let history = h.pipeline.history();
        assert!(history.iter().all(|m| !m.content.contains("Latest utterance")));
        assert_eq!(assistant_count(&h.pipeline), 2);
    }

    #[tokio::test]
    async fn test_stream_error_is_visible_and_post_processed() {
        let h = harness(vec![MockStep::Fail("upstream exploded".into())]);
        let turn = h.pipeline.submit_chat("hi").unwrap();
        let outcome = h.pipeline.run_turn(turn).await;
        assert!(matches!(outcome, TurnOutcome::Failed { ref error } if error.contains("upstream exploded")));
        assert!(h.pipeline.capability_enabled());
        let history = h.pipeline.history();
        assert_eq!(history.last().unwrap().role, Role::Assistant);
        assert!(history.last().unwrap().content.starts_with("Error:"));
        assert_eq!(h.board.calls.load(Ordering::SeqCst), 1);
        let log = h.pipeline.event_log().tail(10);
        assert!(log.iter().any(|e| e.text.starts_with("stream_error")));
    }

    #[tokio::test]
    async fn test_clear_refused_while_busy_then_drops_suspensions() {
        let h = harness(vec![reply("plan"), reply("guide"), shell_call()]);
        suspend_list_files(&h).await;

        let busy = h.pipeline.submit_chat("x").unwrap();
        assert!(matches!(h.pipeline.clear(), Err(AgentError::TurnActive(_))));
        drop(busy);

        assert_eq!(h.pipeline.clear().unwrap(), 1);
        assert!(h.pipeline.history().is_empty());
        assert!(h.pipeline.pending_approvals().is_empty());
    }

    /// Execution 阶段挂起，但 Continuation 并不认识队列里的调用，决定无法应用
    #[derive(Default)]
    struct MismatchedProvider {
        resumes: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionProvider for MismatchedProvider {
        async fn submit_run(&self, config: &PhaseConfig, _history: &[Message]) -> Run {
            if config.name != "execution" {
                return Run::from_items(vec![RunItem::Finished(RunOutcome::Completed(
                    format!("{} ok", config.name),
                ))]);
            }
            let approvals = vec![ApprovalItem {
                call_id: "call_unknown".into(),
                tool_name: "shell".into(),
                arguments: json!({"command": "ls"}),
            }];
            Run::from_items(vec![RunItem::Finished(RunOutcome::Suspended {
                continuation: Continuation::new(json!({}), Vec::new()),
                approvals,
            })])
        }

        async fn resume_run(&self, _continuation: Continuation) -> Run {
            self.resumes.fetch_add(1, Ordering::SeqCst);
            Run::from_items(vec![RunItem::Finished(RunOutcome::Completed("resumed".into()))])
        }
    }

    #[tokio::test]
    async fn test_apply_error_keeps_turn_suspended_for_retry() {
        let provider = Arc::new(MismatchedProvider::default());
        let pipeline = TurnPipeline::new(provider.clone(), reasoning_settings());
        let turn = pipeline.submit_chat("list my files").unwrap();
        assert_eq!(pipeline.run_turn(turn).await, TurnOutcome::Suspended { pending: 1 });

        for _ in 0..2 {
            assert!(matches!(
                pipeline.decide(0, true, false),
                Err(AgentError::ApprovalApply(_))
            ));
            assert_eq!(pipeline.pending_approvals().len(), 1);
            assert!(!pipeline.is_busy());
        }
        assert_eq!(provider.resumes.load(Ordering::SeqCst), 0);
        let log = pipeline.event_log().tail(20);
        assert!(log
            .iter()
            .any(|e| e.source == TurnSource::Chat && e.text.starts_with("approval error")));
        assert!(pipeline.history().iter().all(|m| m.role != Role::Assistant));
    }

    async fn approve_and_resume(h: &Harness) -> TurnOutcome {
        match h.pipeline.decide(0, true, false).unwrap() {
            DecideOutcome::Resume(ticket) => h.pipeline.resume(ticket).await,
            other => panic!("expected resume, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_suspend_during_planning_resumes_into_guidance() {
        let h = harness(vec![
            shell_call(),
            reply("plan after ls"),
            reply("guide"),
            reply("answer"),
        ]);
        suspend_list_files(&h).await;
        assert_eq!(h.provider.submitted().len(), 1);

        let outcome = approve_and_resume(&h).await;
        assert_eq!(outcome, TurnOutcome::Completed { reply: "answer".into() });

        let names: Vec<String> = h.provider.submitted().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["planning", "guidance", "execution"]);
        assert_eq!(h.provider.resumed().len(), 1);
        let exec_history = h.provider.histories().pop().unwrap();
        assert!(exec_history
            .iter()
            .any(|m| m.content == "[Planning]\nplan after ls"));
        assert_eq!(assistant_count(&h.pipeline), 1);
    }

    #[tokio::test]
    async fn test_suspend_during_guidance_resumes_into_execution() {
        let h = harness(vec![
            reply("plan"),
            shell_call(),
            reply("guide after ls"),
            reply("answer"),
        ]);
        suspend_list_files(&h).await;

        let outcome = approve_and_resume(&h).await;
        assert_eq!(outcome, TurnOutcome::Completed { reply: "answer".into() });

        let names: Vec<String> = h.provider.submitted().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["planning", "guidance", "execution"]);
        let exec_history = h.provider.histories().pop().unwrap();
        assert!(exec_history
            .iter()
            .any(|m| m.content == "[Guidance]\nguide after ls"));
    }

    #[tokio::test]
    async fn test_chat_and_linger_suspensions_queue_in_order() {
        let h = harness(vec![
            reply("plan"),
            reply("guide"),
            shell_call(),
            reply("plan"),
            reply("guide"),
            MockStep::RequestApproval(vec![("write".into(), json!({"path": "notes.md"}))]),
            reply("linger done"),
            reply("chat done"),
        ]);
        suspend_list_files(&h).await;
        let turn = h.pipeline.begin_linger(Message::user("offer a summary")).unwrap();
        assert_eq!(h.pipeline.run_turn(turn).await, TurnOutcome::Suspended { pending: 1 });

        let pending = h.pipeline.pending_approvals();
        let order: Vec<(TurnSource, &str)> = pending
            .iter()
            .map(|p| (p.source, p.tool_name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![(TurnSource::Chat, "shell"), (TurnSource::Linger, "write")]
        );

        // 先决定后入队的 linger 审批：只恢复 linger 回合
        let ticket = match h.pipeline.decide(1, true, false).unwrap() {
            DecideOutcome::Resume(ticket) => ticket,
            other => panic!("expected resume, got {:?}", other),
        };
        assert_eq!(ticket.source(), TurnSource::Linger);
        assert_eq!(
            h.pipeline.resume(ticket).await,
            TurnOutcome::Completed { reply: "linger done".into() }
        );
        let pending = h.pipeline.pending_approvals();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source, TurnSource::Chat);

        let ticket = match h.pipeline.decide(0, true, false).unwrap() {
            DecideOutcome::Resume(ticket) => ticket,
            other => panic!("expected resume, got {:?}", other),
        };
        assert_eq!(ticket.source(), TurnSource::Chat);
        assert_eq!(
            h.pipeline.resume(ticket).await,
            TurnOutcome::Completed { reply: "chat done".into() }
        );
        assert!(h.pipeline.pending_approvals().is_empty());
    }

    #[tokio::test]
    async fn test_approval_error_logged_under_entry_source() {
        let h = harness(vec![
            reply("plan"),
            reply("guide"),
            MockStep::RequestApproval(vec![("write".into(), json!({"path": "notes.md"}))]),
        ]);
        let turn = h.pipeline.begin_linger(Message::user("offer a summary")).unwrap();
        assert_eq!(h.pipeline.run_turn(turn).await, TurnOutcome::Suspended { pending: 1 });

        let chat = h.pipeline.submit_chat("hello").unwrap();
        assert!(matches!(
            h.pipeline.decide(0, true, false),
            Err(AgentError::TurnActive(TurnSource::Chat))
        ));
        drop(chat);

        let errors: Vec<TurnSource> = h
            .pipeline
            .event_log()
            .tail(20)
            .into_iter()
            .filter(|e| e.text.starts_with("approval error"))
            .map(|e| e.source)
            .collect();
        assert_eq!(errors, vec![TurnSource::Linger]);

        // 未知下标没有可归属的条目，记在 chat 下
        assert!(h.pipeline.decide(5, true, false).is_err());
        let last = h.pipeline.event_log().tail(1).pop().unwrap();
        assert_eq!(last.source, TurnSource::Chat);
    }

    #[tokio::test]
    async fn test_refusal_on_degraded_path_adds_single_notice() {
        let breaker = Arc::new(CapabilityBreaker::new());
        assert!(breaker.guard_text(REFUSAL).is_some());
        let provider = Arc::new(MockProvider::with_script(vec![
            MockStep::Fail(REFUSAL.into()),
            reply("ok"),
        ]));
        let pipeline = TurnPipeline::new(provider.clone(), reasoning_settings()).with_breaker(breaker);

        let turn = pipeline.submit_chat("hello").unwrap();
        assert_eq!(pipeline.run_turn(turn).await, TurnOutcome::Completed { reply: "ok".into() });

        let histories = provider.histories();
        assert_eq!(histories.len(), 2);
        for history in &histories {
            let notices = history.iter().filter(|m| m.content == DEGRADED_NOTICE).count();
            assert_eq!(notices, 1);
        }
        assert!(provider.submitted().iter().all(|c| c.name == "execution"));
    }
}
