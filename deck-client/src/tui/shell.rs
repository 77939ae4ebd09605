use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};
use termion::{async_stdin, event::Key, input::TermRead};

use crate::{
    config::Config,
    feeds::terminal::TerminalSession,
    store::{ConnectionStatus, LineKind, StateStore},
    tui::{LogTail, ansi_color, draw_log_line, next_revision, open_screen},
    util::websocket::WsConnector,
    view::{StyledLine, ViewOptions, project},
};

const HELP: &str = "Enter send · ↑/↓ history · ^C interrupt · ^L clear · ^R reconnect · Esc quit";

pub async fn run_shell(config: &Config) -> Result<()> {
    let store = StateStore::new();
    let mut term = TerminalSession::open(config, Arc::new(WsConnector), store.clone())?;

    let result = ui_loop(&mut term, &store).await.map_err(|e| anyhow!("{:?}", e));

    term.close();
    result
}

async fn ui_loop(
    term: &mut TerminalSession,
    store: &StateStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut terminal = open_screen()?;
    let mut keys = async_stdin().keys();
    let mut revisions = store.subscribe();
    let mut input = String::new();
    let options = ViewOptions::default();
    let mut logs = LogTail::subscribe(1);

    loop {
        while let Some(Ok(key)) = keys.next() {
            match key {
                Key::Esc | Key::Ctrl('d') => return Ok(()),
                Key::Char('\n') => {
                    term.submit(&input);
                    input.clear();
                }
                Key::Char(c) => input.push(c),
                Key::Backspace => {
                    input.pop();
                }
                Key::Up => {
                    if let Some(line) = term.history_up() {
                        input = line;
                    }
                }
                Key::Down => input = term.history_down(),
                Key::Ctrl('c') => term.interrupt(),
                Key::Ctrl('l') => term.clear(),
                Key::Ctrl('r') => term.reopen(),
                _ => {}
            }
        }

        next_revision(&mut revisions, Duration::from_millis(30)).await;
        logs.drain();

        let view = project(&store.snapshot(), &options);
        let status = term.status();
        let prompt = term.prompt().to_string();

        terminal.draw(|f| draw(f, &view.transcript, status, &prompt, &input, &logs))?;
    }
}

fn to_line(line: &StyledLine) -> Line<'static> {
    match line.kind {
        LineKind::Echo => Line::styled(text_of(line), Style::default().fg(Color::Green)),
        LineKind::Error => Line::styled(text_of(line), Style::default().fg(Color::Red)),
        LineKind::Status => Line::styled(text_of(line), Style::default().fg(Color::DarkGray)),
        LineKind::Output => Line::from(
            line.spans
                .iter()
                .map(|s| match s.color {
                    Some(c) => Span::styled(s.text.clone(), Style::default().fg(ansi_color(c))),
                    None => Span::raw(s.text.clone()),
                })
                .collect::<Vec<_>>(),
        ),
    }
}

fn text_of(line: &StyledLine) -> String {
    line.spans.iter().map(|s| s.text.as_str()).collect()
}

fn draw(
    f: &mut Frame,
    transcript: &[StyledLine],
    status: ConnectionStatus,
    prompt: &str,
    input: &str,
    logs: &LogTail,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(f.area());
    draw_log_line(f, logs, chunks[2]);

    // Remote output may span several lines per fragment.
    let lines: Vec<Line> = transcript
        .iter()
        .flat_map(|l| {
            let line = to_line(l);
            split_newlines(line)
        })
        .collect();

    let height = chunks[0].height.saturating_sub(2) as usize;
    let skip = lines.len().saturating_sub(height);
    let title = match status {
        ConnectionStatus::Open => "Terminal".to_string(),
        other => format!("Terminal ({other:?})"),
    };

    f.render_widget(
        Paragraph::new(lines.into_iter().skip(skip).collect::<Vec<_>>())
            .block(Block::default().title(title).borders(Borders::ALL)),
        chunks[0],
    );

    f.render_widget(
        Paragraph::new(format!("{prompt} {input}"))
            .block(Block::default().title(HELP).borders(Borders::ALL)),
        chunks[1],
    );
}

fn split_newlines(line: Line<'static>) -> Vec<Line<'static>> {
    let style = line.style;
    let mut out = vec![Line::default().style(style)];
    for span in line.spans {
        let mut parts = span.content.split('\n');
        if let Some(first) = parts.next() {
            push_span(&mut out, first, span.style);
        }
        for part in parts {
            out.push(Line::default().style(style));
            push_span(&mut out, part, span.style);
        }
    }
    out
}

fn push_span(out: &mut [Line<'static>], text: &str, style: Style) {
    let text = text.trim_end_matches('\r');
    if text.is_empty() {
        return;
    }
    if let Some(last) = out.last_mut() {
        last.spans.push(Span::styled(text.to_string(), style));
    }
}
