use std::io::{self, Write};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::{Duration, interval},
};

use crate::tracker::{Outcome, Severity};

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

const SUCCESS_COLOR: &str = "\x1b[32m";
const WARNING_COLOR: &str = "\x1b[33m";
const ERROR_COLOR: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn symbol(severity: Severity) -> &'static str {
    match severity {
        Severity::Success => "✓",
        Severity::Warning => "⚠",
        Severity::Error => "✗",
    }
}

fn color(severity: Severity) -> &'static str {
    match severity {
        Severity::Success => SUCCESS_COLOR,
        Severity::Warning => WARNING_COLOR,
        Severity::Error => ERROR_COLOR,
    }
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    LoadingStart,
    Line(String),
    Done { severity: Severity, text: String },
}

impl UiEvent {
    /// Final event for a tracked action, e.g. `launch jellyfin succeeded`.
    pub fn outcome(label: &str, outcome: &Outcome) -> Self {
        UiEvent::Done {
            severity: outcome.severity(),
            text: format!("{label} {outcome}"),
        }
    }

    /// Convert to a plain log line if it makes sense to forward
    pub fn as_line(&self) -> Option<String> {
        match self {
            UiEvent::Line(line) => Some(line.clone()),
            UiEvent::Done { severity, text } => Some(format!("{} {text}", symbol(*severity))),
            UiEvent::LoadingStart => None,
        }
    }
}

pub async fn run_renderer(mut rx: broadcast::Receiver<UiEvent>) {
    let mut loading = false;
    let mut current = String::new();
    let mut frame = 0usize;

    let mut tick = interval(Duration::from_millis(80));

    loop {
        tokio::select! {
            ev = rx.recv() => {
                let ev = match ev {
                    Ok(ev) => ev,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                match ev {
                    UiEvent::LoadingStart => {
                        loading = true;
                        current.clear();
                        frame = 0;
                    }

                    UiEvent::Line(line) => {
                        if loading {
                            current = line;
                        } else {
                            println!("{line}");
                        }
                    }

                    UiEvent::Done { severity, text } => {
                        if loading {
                            print!("\r\x1b[2K");
                            loading = false;
                            current.clear();
                        }
                        println!("{}{} {text}{RESET}", color(severity), symbol(severity));
                    }
                }

                let _ = io::stdout().flush();
            }

            _ = tick.tick(), if loading => {
                let s = SPINNER[frame % SPINNER.len()];
                frame += 1;

                print!("\r\x1b[2K{s} {current}");
                let _ = io::stdout().flush();
            }
        }
    }
}
