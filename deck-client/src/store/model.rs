use std::time::Duration;

use chrono::{DateTime, Utc};
use deck_shared::job::JobStatus;

/// The two persistent stream channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Telemetry,
    Terminal,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Telemetry => "telemetry",
            Channel::Terminal => "terminal",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Launch,
    Stop,
    JobExecute,
}

/// Actions of the same class write the same store slot, so only one of them
/// may be live per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    Process,
    Job,
}

impl ActionKind {
    pub fn class(&self) -> ActionClass {
        match self {
            ActionKind::Launch | ActionKind::Stop => ActionClass::Process,
            ActionKind::JobExecute => ActionClass::Job,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Launch => "launch",
            ActionKind::Stop => "stop",
            ActionKind::JobExecute => "job",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub target_id: String,
    pub class: ActionClass,
}

impl PendingKey {
    pub fn new(target_id: impl Into<String>, class: ActionClass) -> Self {
        Self {
            target_id: target_id.into(),
            class,
        }
    }
}

/// Ephemeral record of an in-flight tracked action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub target_id: String,
    pub kind: ActionKind,
    pub started_at: DateTime<Utc>,
    pub attempts_used: u32,
    pub attempt_budget: u32,
    pub poll_interval: Duration,
    /// Distinguishes successive trackers for the same key.
    pub instance: u64,
}

impl PendingAction {
    pub fn key(&self) -> PendingKey {
        PendingKey::new(self.target_id.clone(), self.kind.class())
    }
}

/// Latest observed status of a submitted job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub job_id: Option<String>,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Raw fragment received from the remote shell.
    Output,
    /// Local echo of a submitted line.
    Echo,
    /// Connection lifecycle notice.
    Status,
    /// Local error, never sent by the remote side.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub kind: LineKind,
    pub text: String,
}

impl TranscriptLine {
    pub fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}
