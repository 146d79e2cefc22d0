//! 界面渲染
//!
//! 布局自上而下：对话区（可见历史 + Execution 实时文本）、审批面板（有挂起时出现）、事件日志、输入框。
//! 标题栏显示阶段、来源、能力开关与 linger 状态，输入框底部显示快捷键提示或错误。

use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
    Frame,
};

use crate::core::UiState;
use crate::memory::Role;

/// 单条消息在 UI 中显示的最大字符数
const MAX_DISPLAY_CHARS: usize = 600;
/// 事件日志面板高度（含边框）
const EVENT_PANEL_HEIGHT: u16 = 7;
/// 审批面板最多显示的条数
const MAX_APPROVAL_ROWS: usize = 5;

fn truncate_for_display(content: &str) -> String {
    let count = content.chars().count();
    if count <= MAX_DISPLAY_CHARS {
        return content.to_string();
    }
    let head: String = content.chars().take(MAX_DISPLAY_CHARS).collect();
    format!("{}\n... [已省略，共 {} 字]", head, count)
}

/// 将内容按宽度换行，按字符数切分，避免在 UTF-8 中间截断
fn wrap_text(s: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![s.to_string()];
    }
    let mut lines = Vec::new();
    for para in s.split('\n') {
        let mut line = String::new();
        for ch in para.chars() {
            if line.chars().count() >= width {
                lines.push(std::mem::take(&mut line));
            }
            line.push(ch);
        }
        lines.push(line);
    }
    lines
}

fn message_lines(state: &UiState, width: usize) -> Vec<Line<'static>> {
    let mut lines: Vec<Line> = Vec::new();
    let mut push_block = |prefix: &'static str, color: Color, content: &str| {
        if !lines.is_empty() {
            lines.push(Line::from(""));
        }
        for (i, line) in wrap_text(&truncate_for_display(content), width).into_iter().enumerate() {
            let pref = if i == 0 { prefix } else { "    " };
            lines.push(Line::from(vec![
                Span::styled(pref, Style::default().fg(color).add_modifier(Modifier::BOLD)),
                Span::raw(line),
            ]));
        }
    };
    for m in &state.history {
        let (prefix, color) = match m.role {
            Role::User => ("You ", Color::Cyan),
            Role::Assistant => ("AI  ", Color::Green),
            Role::System => ("Sys ", Color::Gray),
        };
        push_block(prefix, color, &m.content);
    }
    if !state.live_text.is_empty() {
        push_block("... ", Color::Yellow, &state.live_text);
    }
    lines
}

fn title(state: &UiState) -> String {
    let source = state
        .active_source
        .map(|s| format!(" ({})", s))
        .unwrap_or_default();
    let capability = if state.capability_enabled {
        "summaries on"
    } else {
        "summaries off"
    };
    let linger = if state.linger_enabled { "linger on" } else { "linger off" };
    format!(
        " murmur │ {}{} │ {} │ {} ",
        state.phase.label(),
        source,
        capability,
        linger
    )
}

/// 绘制一帧；将 (总行数, 可视高度) 写入 out 供外部 clamp 滚动
pub fn draw(
    f: &mut Frame,
    state: &UiState,
    input_buffer: &str,
    notice: Option<&str>,
    conversation_scroll: usize,
    out: &mut (usize, usize),
) {
    let approval_rows = state.approvals.len().min(MAX_APPROVAL_ROWS);
    let approval_height = if approval_rows == 0 { 0 } else { approval_rows as u16 + 2 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(5),
            Constraint::Length(approval_height),
            Constraint::Length(EVENT_PANEL_HEIGHT),
            Constraint::Length(3),
        ])
        .split(f.area());

    // 对话区
    let conv_area = chunks[0];
    let content_width = conv_area.width.saturating_sub(3) as usize;
    let block = Block::default()
        .title(title(state))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));
    let text_lines = message_lines(state, content_width.max(20));
    let content_height = conv_area.height.saturating_sub(2) as usize;
    let total_lines = text_lines.len();
    let scroll_offset = conversation_scroll.min(total_lines.saturating_sub(content_height));

    let paragraph = Paragraph::new(Text::from(text_lines))
        .block(block)
        .scroll((scroll_offset as u16, 0));
    f.render_widget(paragraph, conv_area);

    if total_lines > content_height {
        let mut scrollbar_state = ScrollbarState::new(total_lines)
            .position(scroll_offset)
            .viewport_content_length(content_height);
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .thumb_symbol("█")
            .track_symbol(Some("░"));
        f.render_stateful_widget(scrollbar, conv_area, &mut scrollbar_state);
    }

    // 审批面板：光标所在行高亮，窗口跟随光标
    if approval_rows > 0 {
        let start = state
            .approval_cursor
            .saturating_sub(MAX_APPROVAL_ROWS - 1)
            .min(state.approvals.len().saturating_sub(MAX_APPROVAL_ROWS));
        let rows: Vec<Line> = state
            .approvals
            .iter()
            .enumerate()
            .skip(start)
            .take(MAX_APPROVAL_ROWS)
            .map(|(i, a)| {
                let selected = i == state.approval_cursor;
                let marker = if selected { "> " } else { "  " };
                let style = if selected {
                    Style::default().fg(Color::Black).bg(Color::Magenta)
                } else {
                    Style::default()
                };
                Line::from(Span::styled(
                    format!("{}[{}] {}({})", marker, a.source, a.tool_name, a.args_summary),
                    style,
                ))
            })
            .collect();
        let approvals = Paragraph::new(rows).block(
            Block::default()
                .title(format!(" Approvals ({}) ", state.approvals.len()))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Magenta)),
        );
        f.render_widget(approvals, chunks[1]);
    }

    // 事件日志：只显示能放下的最后几行
    let visible = EVENT_PANEL_HEIGHT.saturating_sub(2) as usize;
    let skip = state.event_log.len().saturating_sub(visible);
    let events: Vec<Line> = state
        .event_log
        .iter()
        .skip(skip)
        .map(|e| Line::from(Span::styled(e.render(), Style::default().fg(Color::DarkGray))))
        .collect();
    let mut events_title = " Events ".to_string();
    if !state.todo_summary.is_empty() {
        events_title = format!(" Events │ {} ", state.todo_summary);
    }
    f.render_widget(
        Paragraph::new(events)
            .wrap(Wrap { trim: true })
            .block(Block::default().title(events_title).borders(Borders::ALL)),
        chunks[2],
    );

    // 输入框
    let (input_title, border_color) = if let Some(err) = &state.error_message {
        (format!(" {} ", err.chars().take(60).collect::<String>()), Color::Red)
    } else if let Some(n) = notice {
        (format!(" {} ", n), Color::Red)
    } else if state.input_locked {
        (" Working… ".to_string(), Color::DarkGray)
    } else {
        (" Input ".to_string(), Color::Blue)
    };
    let hint = if state.approvals.is_empty() {
        " Enter send │ /linger on|off │ /ambient │ /clear │ Ctrl+Q quit "
    } else {
        " ↑↓ select │ Ctrl+Y approve │ Ctrl+N reject │ Ctrl+A always │ Ctrl+R never "
    };
    let input_block = Block::default()
        .title(input_title)
        .title_bottom(Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));
    f.render_widget(Paragraph::new(input_buffer).block(input_block), chunks[3]);

    out.0 = total_lines;
    out.1 = content_height;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AgentPhase;
    use crate::memory::Message;
    use ratatui::{backend::TestBackend, Terminal};

    #[test]
    fn test_wrap_text_utf8() {
        let lines = wrap_text("你好世界ab\nx", 3);
        assert_eq!(lines, vec!["你好世", "界ab", "x"]);
    }

    #[test]
    fn test_draw_shows_live_text_and_title() {
        let mut state = UiState::default();
        state.phase = AgentPhase::Executing;
        state.history.push(Message::user("hi"));
        state.live_text = "partial".into();
        assert!(title(&state).contains("executing"));
        let lines = message_lines(&state, 40);
        assert!(lines.iter().any(|l| l.to_string().contains("partial")));

        let mut terminal = Terminal::new(TestBackend::new(80, 30)).unwrap();
        let mut out = (0, 0);
        terminal
            .draw(|f| draw(f, &state, "", None, usize::MAX, &mut out))
            .unwrap();
        assert!(out.0 >= 3);
    }
}
