//! Agent 编排器：主控循环
//!
//! 负责：加载配置、构建流水线，建立 cmd / state 两个通道，并在后台任务中消费用户命令与环境更新。
//! 回合在独立任务中运行，主循环只负责分派，因此审批决定、光标移动在回合进行中也能即时响应。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ambient::TranscriptWatcher;
use crate::core::builder::create_agent_builder;
use crate::core::UiState;
use crate::pipeline::{
    ActiveTurn, AmbientUpdate, DecideOutcome, LingerConfig, LingerScheduler, TurnPipeline,
};

/// 从 UI 发往编排器的用户命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 提交用户输入，开始一个聊天回合
    Submit(String),
    /// 把审批光标移到指定位置
    SelectApproval(usize),
    /// 审批光标上下移动
    MoveSelection(isize),
    /// 对光标处的审批做决定
    Decide { approve: bool, always: bool },
    /// 注入一条环境上下文（转写行或 /ambient）
    Ambient(AmbientUpdate),
    /// 开关 linger
    SetLinger(bool),
    /// 清空对话与挂起的审批
    Clear,
    /// 退出应用
    Quit,
}

fn spawn_turn(pipeline: &Arc<TurnPipeline>, turn: ActiveTurn) {
    let pipeline = pipeline.clone();
    tokio::spawn(async move {
        pipeline.run_turn(turn).await;
    });
}

/// 处理一条命令；返回 false 表示退出
fn dispatch(
    pipeline: &Arc<TurnPipeline>,
    scheduler: &mut LingerScheduler,
    linger_tx: &watch::Sender<LingerConfig>,
    cmd: Command,
) -> bool {
    match cmd {
        Command::Submit(input) => {
            let input = input.trim();
            if input.is_empty() {
                return true;
            }
            match pipeline.submit_chat(input) {
                Ok(turn) => spawn_turn(pipeline, turn),
                Err(e) => pipeline.report(&e),
            }
        }
        Command::SelectApproval(index) => {
            pipeline.select(index);
        }
        Command::MoveSelection(delta) => {
            pipeline.move_selection(delta);
        }
        Command::Decide { approve, always } => {
            let index = pipeline.approval_cursor();
            match pipeline.decide(index, approve, always) {
                Ok(DecideOutcome::Resume(ticket)) => {
                    let pipeline = pipeline.clone();
                    tokio::spawn(async move {
                        pipeline.resume(ticket).await;
                    });
                }
                Ok(DecideOutcome::Waiting { remaining }) => {
                    tracing::debug!(remaining, "continuation still waiting for decisions");
                }
                Err(e) => pipeline.report(&e),
            }
        }
        Command::Ambient(update) => {
            if let Some(directive) = scheduler.evaluate(&update, pipeline.is_busy(), Instant::now()) {
                match pipeline.begin_linger(directive) {
                    Ok(turn) => spawn_turn(pipeline, turn),
                    Err(e) => tracing::debug!(error = %e, "linger tick dropped"),
                }
            }
        }
        Command::SetLinger(enabled) => {
            linger_tx.send_modify(|c| c.enabled = enabled);
            tracing::info!(enabled, "linger toggled");
            pipeline.publish();
        }
        Command::Clear => match pipeline.clear() {
            Ok(dropped) if dropped > 0 => {
                tracing::info!(dropped, "cleared conversation and suspended turns")
            }
            Ok(_) => {}
            Err(e) => pipeline.report(&e),
        },
        Command::Quit => return false,
    }
    true
}

/// 创建 Agent 运行时：返回命令发送端与状态接收端；后台任务消费命令并驱动回合
pub async fn create_agent(
    config_path: Option<PathBuf>,
) -> anyhow::Result<(mpsc::UnboundedSender<Command>, watch::Receiver<UiState>)> {
    let builder = create_agent_builder(config_path);
    let cfg = builder.config().clone();
    let components = builder.build_components();
    let pipeline = components.pipeline;
    let linger_tx = components.linger_tx;

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (ambient_tx, mut ambient_rx) = mpsc::unbounded_channel::<AmbientUpdate>();
    let state_rx = pipeline.subscribe();
    pipeline.publish();

    let cancel = CancellationToken::new();
    if let Some(path) = cfg.linger.transcript_path.clone() {
        let watcher = TranscriptWatcher::new(
            path,
            std::time::Duration::from_millis(cfg.linger.poll_interval_ms),
            cfg.linger.summary_window,
        );
        tokio::spawn(watcher.run(cancel.clone(), ambient_tx));
    } else {
        drop(ambient_tx);
    }

    let mut scheduler = LingerScheduler::new(linger_tx.subscribe());

    tokio::spawn(async move {
        let mut ambient_open = true;
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !dispatch(&pipeline, &mut scheduler, &linger_tx, cmd) {
                        break;
                    }
                }
                update = ambient_rx.recv(), if ambient_open => {
                    match update {
                        Some(update) => {
                            dispatch(&pipeline, &mut scheduler, &linger_tx, Command::Ambient(update));
                        }
                        None => ambient_open = false,
                    }
                }
            }
        }
        cancel.cancel();
        tracing::info!("orchestrator loop exited");
    });

    Ok((cmd_tx, state_rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockProvider, MockStep};
    use crate::pipeline::PhaseSettings;
    use std::time::Duration;

    fn setup(steps: Vec<MockStep>) -> (Arc<TurnPipeline>, LingerScheduler, watch::Sender<LingerConfig>) {
        let (linger_tx, linger_rx) = watch::channel(LingerConfig {
            enabled: true,
            behavior: "Help.".into(),
            min_interval: Duration::from_secs(20),
        });
        let pipeline = Arc::new(
            TurnPipeline::new(Arc::new(MockProvider::with_script(steps)), PhaseSettings::default())
                .with_linger(linger_rx),
        );
        let scheduler = LingerScheduler::new(linger_tx.subscribe());
        (pipeline, scheduler, linger_tx)
    }

    #[tokio::test]
    async fn test_busy_submit_is_reported_not_queued() {
        let (pipeline, mut scheduler, linger_tx) = setup(vec![]);
        let turn = pipeline.submit_chat("first").unwrap();
        assert!(dispatch(&pipeline, &mut scheduler, &linger_tx, Command::Submit("second".into())));
        assert_eq!(pipeline.history().len(), 1);
        assert!(pipeline.snapshot().error_message.unwrap().contains("chat"));
        drop(turn);
    }

    #[tokio::test]
    async fn test_set_linger_and_quit() {
        let (pipeline, mut scheduler, linger_tx) = setup(vec![]);
        assert!(dispatch(&pipeline, &mut scheduler, &linger_tx, Command::SetLinger(false)));
        assert!(!pipeline.snapshot().linger_enabled);
        let update = AmbientUpdate {
            summary: String::new(),
            utterance: "hello".into(),
        };
        dispatch(&pipeline, &mut scheduler, &linger_tx, Command::Ambient(update));
        assert!(!pipeline.is_busy());
        assert!(!dispatch(&pipeline, &mut scheduler, &linger_tx, Command::Quit));
    }
}
