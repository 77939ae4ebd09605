//! Full-screen views. Each one owns the terminal while it runs and redraws
//! from store snapshots.

pub mod dashboard;
pub mod shell;
pub mod stats;

use std::{
    collections::VecDeque,
    io::{self, Stdout},
    time::Duration,
};

use ratatui::{
    Frame, Terminal,
    backend::TermionBackend,
    layout::Rect,
    style::{Color, Style},
    text::Line,
    widgets::Paragraph,
};
use termion::{
    raw::{IntoRawMode, RawTerminal},
    screen::{AlternateScreen, IntoAlternateScreen},
};
use tokio::sync::{broadcast, watch};

use crate::{
    util::logging::{get_log_rx, timestamp_hms},
    view::{Level, style::AnsiColor},
};

pub type Screen = Terminal<TermionBackend<AlternateScreen<RawTerminal<Stdout>>>>;

pub fn open_screen() -> io::Result<Screen> {
    let raw = io::stdout().into_raw_mode()?;
    let screen = raw.into_alternate_screen()?;
    Terminal::new(TermionBackend::new(screen))
}

/// Waits up to `wait` for the store to move on. Returns whether it did.
pub async fn next_revision(rx: &mut watch::Receiver<u64>, wait: Duration) -> bool {
    matches!(tokio::time::timeout(wait, rx.changed()).await, Ok(Ok(())))
}

pub fn level_color(level: Level) -> Color {
    match level {
        Level::Normal => Color::Green,
        Level::Warning => Color::Yellow,
        Level::Danger => Color::Red,
    }
}

pub fn ansi_color(color: AnsiColor) -> Color {
    match color {
        AnsiColor::Red => Color::Red,
        AnsiColor::Green => Color::Green,
        AnsiColor::Yellow => Color::Yellow,
        AnsiColor::Blue => Color::Blue,
        AnsiColor::Magenta => Color::Magenta,
        AnsiColor::Cyan => Color::Cyan,
    }
}

/// Most recent log lines, read from the channel the logger writes to while
/// a full-screen view owns the terminal.
pub struct LogTail {
    rx: Option<broadcast::Receiver<String>>,
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogTail {
    pub fn subscribe(capacity: usize) -> Self {
        Self::from_receiver(get_log_rx(), capacity)
    }

    fn from_receiver(rx: Option<broadcast::Receiver<String>>, capacity: usize) -> Self {
        Self {
            rx,
            lines: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Moves everything logged since the last call into the tail.
    pub fn drain(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return;
        };
        loop {
            match rx.try_recv() {
                Ok(line) => {
                    if self.lines.len() == self.capacity {
                        self.lines.pop_front();
                    }
                    self.lines.push_back(format!("{} {}", timestamp_hms(), line));
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    if self.lines.len() == self.capacity {
                        self.lines.pop_front();
                    }
                    self.lines
                        .push_back(format!("{} ({n} log lines skipped)", timestamp_hms()));
                }
                Err(_) => return,
            }
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }
}

pub fn log_color(line: &str) -> Color {
    if line.contains("ERROR") {
        Color::Red
    } else if line.contains("WARN") {
        Color::Yellow
    } else {
        Color::DarkGray
    }
}

/// One-row footer with the latest log line.
pub fn draw_log_line(f: &mut Frame, tail: &LogTail, area: Rect) {
    let line = tail.last().unwrap_or_default();
    f.render_widget(
        Paragraph::new(Line::styled(line.to_string(), Style::default().fg(log_color(line)))),
        area,
    );
}
