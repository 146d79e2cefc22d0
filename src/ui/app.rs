//! TUI 应用主循环
//!
//! 进入全屏/原始模式，轮询 state_rx 与键盘事件，将用户输入、斜杠命令与快捷键转为 Command 发送给编排器，
//! 每帧用 draw 渲染 UiState 与输入缓冲。

use std::io::{self, Stdout};

use crossterm::event::KeyCode;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::{mpsc, watch};

use crate::core::{Command, UiState};
use crate::pipeline::AmbientUpdate;
use crate::ui::event::{AppEvent, EventHandler};
use crate::ui::render::draw;

/// 输入行解析结果
#[derive(Debug, PartialEq)]
pub enum InputAction {
    Send(Command),
    Quit,
    /// 无法识别的斜杠命令
    Unknown(String),
    Ignore,
}

/// 解析一行输入：斜杠命令或普通聊天文本
pub fn parse_input(line: &str) -> InputAction {
    let line = line.trim();
    if line.is_empty() {
        return InputAction::Ignore;
    }
    if !line.starts_with('/') {
        return InputAction::Send(Command::Submit(line.to_string()));
    }
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };
    match (cmd.to_lowercase().as_str(), rest) {
        ("/quit" | "/exit", _) => InputAction::Quit,
        ("/clear", _) => InputAction::Send(Command::Clear),
        ("/linger", "on") => InputAction::Send(Command::SetLinger(true)),
        ("/linger", "off") => InputAction::Send(Command::SetLinger(false)),
        ("/ambient", text) if !text.is_empty() => InputAction::Send(Command::Ambient(AmbientUpdate {
            summary: text.to_string(),
            utterance: text.to_string(),
        })),
        _ => InputAction::Unknown(line.to_string()),
    }
}

/// 运行 TUI：启用原始模式与全屏，循环 poll 事件 + 渲染，退出时恢复终端并通知编排器
pub async fn run_app(
    state_rx: watch::Receiver<UiState>,
    cmd_tx: mpsc::UnboundedSender<Command>,
) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let event_handler = EventHandler::new(cmd_tx);
    let mut input_buffer = String::new();
    let mut notice: Option<String> = None;
    let mut conversation_scroll = usize::MAX;
    let mut last_history_len = 0usize;

    loop {
        let state = state_rx.borrow().clone();

        if state.history.len() != last_history_len || state.input_locked {
            last_history_len = state.history.len();
            conversation_scroll = usize::MAX;
        }

        match event_handler.poll() {
            Ok(Some(AppEvent::Quit)) => break,
            Ok(Some(AppEvent::Command(_))) => notice = None,
            Ok(Some(AppEvent::Key(key))) => match key.code {
                KeyCode::Enter => {
                    let line = std::mem::take(&mut input_buffer);
                    notice = None;
                    match parse_input(&line) {
                        InputAction::Quit => break,
                        InputAction::Send(Command::Submit(_)) if state.input_locked => {
                            input_buffer = line;
                            notice = Some("a turn is still running".to_string());
                        }
                        InputAction::Send(cmd) => event_handler.send(cmd),
                        InputAction::Unknown(cmd) => {
                            notice = Some(format!("unknown command: {}", cmd));
                        }
                        InputAction::Ignore => {}
                    }
                }
                KeyCode::Backspace => {
                    input_buffer.pop();
                }
                KeyCode::Char(c) => input_buffer.push(c),
                KeyCode::Up if !state.approvals.is_empty() => {
                    event_handler.send(Command::MoveSelection(-1));
                }
                KeyCode::Down if !state.approvals.is_empty() => {
                    event_handler.send(Command::MoveSelection(1));
                }
                KeyCode::Up | KeyCode::PageUp => {
                    let step = if key.code == KeyCode::Up { 1 } else { 10 };
                    conversation_scroll = conversation_scroll.saturating_sub(step);
                }
                KeyCode::Down | KeyCode::PageDown => {
                    let step = if key.code == KeyCode::Down { 1 } else { 10 };
                    conversation_scroll = conversation_scroll.saturating_add(step);
                }
                KeyCode::End => conversation_scroll = usize::MAX,
                _ => {}
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "terminal event poll failed"),
        }

        let mut scroll_info = (0usize, 0usize);
        terminal.draw(|f| {
            draw(
                f,
                &state,
                &input_buffer,
                notice.as_deref(),
                conversation_scroll,
                &mut scroll_info,
            );
        })?;
        let (total_lines, viewport_height) = scroll_info;
        conversation_scroll = conversation_scroll.min(total_lines.saturating_sub(viewport_height));

        tokio::task::yield_now().await;
    }

    event_handler.send(Command::Quit);
    restore_terminal(&mut terminal)?;
    Ok(())
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> anyhow::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
