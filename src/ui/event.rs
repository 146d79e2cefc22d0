//! 事件处理
//!
//! 轮询 crossterm 键盘事件：审批快捷键（Ctrl+Y/N/A/R）、Ctrl+L 清空直接转为 Command 发给编排器；
//! Ctrl+Q / Ctrl+C 退出；其余按键交给 run_app 拼输入缓冲。

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc;

use crate::core::Command;

/// 应用事件：已转发的 Command、退出请求或原始 KeyEvent
#[derive(Debug, Clone)]
pub enum AppEvent {
    Command(Command),
    Quit,
    Key(KeyEvent),
}

/// 快捷键映射；不是快捷键时返回 None
pub fn shortcut(key: &KeyEvent) -> Option<AppEvent> {
    if !key.modifiers.contains(KeyModifiers::CONTROL) {
        return None;
    }
    let cmd = match key.code {
        KeyCode::Char('y') => Command::Decide {
            approve: true,
            always: false,
        },
        KeyCode::Char('n') => Command::Decide {
            approve: false,
            always: false,
        },
        KeyCode::Char('a') => Command::Decide {
            approve: true,
            always: true,
        },
        KeyCode::Char('r') => Command::Decide {
            approve: false,
            always: true,
        },
        KeyCode::Char('l') => Command::Clear,
        KeyCode::Char('q') | KeyCode::Char('c') => return Some(AppEvent::Quit),
        _ => return None,
    };
    Some(AppEvent::Command(cmd))
}

/// 事件处理器：持有 cmd_tx，poll 时读键盘并返回 AppEvent
pub struct EventHandler {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl EventHandler {
    pub fn new(cmd_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { cmd_tx }
    }

    pub fn poll(&self) -> anyhow::Result<Option<AppEvent>> {
        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(Some(self.handle_key(key)));
                }
            }
        }
        Ok(None)
    }

    fn handle_key(&self, key: KeyEvent) -> AppEvent {
        match shortcut(&key) {
            Some(AppEvent::Command(cmd)) => {
                self.send(cmd.clone());
                AppEvent::Command(cmd)
            }
            Some(other) => other,
            None => AppEvent::Key(key),
        }
    }

    pub fn send(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::warn!("orchestrator closed, command dropped");
        }
    }
}
