use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::{
    config::Config,
    session::{ChannelPolicy, Connector, SessionHandle, SessionHandler, StreamSession},
    store::{ConnectionStatus, LineKind, StateStore, TranscriptLine},
};

pub const TERMINAL_PATH: &str = "/ws/terminal";

/// Control byte the remote shell treats as an interrupt.
pub const INTERRUPT: &str = "\x03";

/// Appends remote fragments and lifecycle notices to the transcript.
pub struct TerminalHandler;

impl SessionHandler for TerminalHandler {
    fn on_open(&self, store: &StateStore) {
        store.append_transcript(TranscriptLine::new(LineKind::Status, "connected"));
    }

    fn on_message(&self, store: &StateStore, text: &str) {
        store.append_transcript(TranscriptLine::new(LineKind::Output, text));
    }

    fn on_error(&self, store: &StateStore, message: &str) {
        store.append_transcript(TranscriptLine::new(
            LineKind::Error,
            format!("connection error: {message}"),
        ));
    }

    fn on_close(&self, store: &StateStore) {
        store.append_transcript(TranscriptLine::new(LineKind::Status, "disconnected"));
    }
}

/// Previously submitted non-empty lines plus a recall cursor in `[0, len]`.
#[derive(Debug, Default, Clone)]
pub struct History {
    entries: Vec<String>,
    cursor: usize,
}

impl History {
    pub fn push(&mut self, line: &str) {
        if !line.trim().is_empty() {
            self.entries.push(line.to_string());
        }
        self.cursor = self.entries.len();
    }

    /// Older entry, or `None` when already at the oldest one.
    pub fn up(&mut self) -> Option<&str> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).map(String::as_str)
    }

    /// Newer entry; moving past the newest yields an empty input.
    pub fn down(&mut self) -> &str {
        if self.cursor + 1 < self.entries.len() {
            self.cursor += 1;
            &self.entries[self.cursor]
        } else {
            self.cursor = self.entries.len();
            ""
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

/// Interactive shell over the terminal channel.
pub struct TerminalSession {
    url: String,
    prompt: String,
    connector: Arc<dyn Connector>,
    store: StateStore,
    history: History,
    session: SessionHandle,
}

impl TerminalSession {
    pub fn open(config: &Config, connector: Arc<dyn Connector>, store: StateStore) -> Result<Self> {
        let url = config.get_ws_url(TERMINAL_PATH)?;
        let session = Self::connect(&url, &connector, &store);
        Ok(Self {
            url,
            prompt: "$".to_string(),
            connector,
            store,
            history: History::default(),
            session,
        })
    }

    fn connect(url: &str, connector: &Arc<dyn Connector>, store: &StateStore) -> SessionHandle {
        StreamSession::open(
            url,
            ChannelPolicy::terminal(),
            connector.clone(),
            Arc::new(TerminalHandler),
            store.clone(),
        )
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session.status()
    }

    /// Echoes `line` locally, records it and sends it without waiting for a
    /// reply. Not connected: only an error line is added.
    pub fn submit(&mut self, line: &str) {
        if self.session.status() != ConnectionStatus::Open {
            self.local_error("not connected to terminal");
            return;
        }

        self.store.append_transcript(TranscriptLine::new(
            LineKind::Echo,
            format!("{} {}", self.prompt, line),
        ));
        self.history.push(line);

        if let Err(e) = self.session.send(line) {
            self.local_error(&e.to_string());
        }
    }

    pub fn interrupt(&mut self) {
        if self.session.status() == ConnectionStatus::Open {
            let _ = self.session.send(INTERRUPT);
        }
    }

    pub fn clear(&mut self) {
        self.store.clear_transcript();
    }

    /// User-initiated reconnect: drops the old connection and its transcript.
    pub fn reopen(&mut self) {
        debug!("Reopening terminal session");
        self.session.close();
        self.store.clear_transcript();
        self.session = Self::connect(&self.url, &self.connector, &self.store);
    }

    pub fn close(&self) {
        self.session.close();
    }

    pub fn history_up(&mut self) -> Option<String> {
        self.history.up().map(str::to_string)
    }

    pub fn history_down(&mut self) -> String {
        self.history.down().to_string()
    }

    fn local_error(&self, message: &str) {
        self.store
            .append_transcript(TranscriptLine::new(LineKind::Error, message));
    }
}
