//! Pure projection of a store snapshot into what the front-ends draw.

pub mod format;
pub mod style;

use deck_shared::{
    metrics::SystemStats,
    service::{PingResult, ReachabilityStatus, Service},
};

use crate::store::{
    ActionClass, ActionKind, Channel, ConnectionStatus, LineKind, StoreSnapshot, TranscriptLine,
};
use format::{format_bytes, format_speed, round_percent};
use style::{StyledSpan, parse_ansi};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewOptions {
    /// Host used for service links.
    pub server_ip: String,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            server_ip: "localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Normal,
    Warning,
    Danger,
}

impl Level {
    pub fn for_temperature(celsius: f64) -> Self {
        if celsius >= 80.0 {
            Level::Danger
        } else if celsius >= 60.0 {
            Level::Warning
        } else {
            Level::Normal
        }
    }

    pub fn for_disk(percent: f64) -> Self {
        if percent >= 90.0 {
            Level::Danger
        } else if percent >= 75.0 {
            Level::Warning
        } else {
            Level::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachabilityBadge {
    pub status: ReachabilityStatus,
    pub symbol: &'static str,
    pub latency: Option<String>,
}

impl ReachabilityBadge {
    fn from_ping(ping: Option<&PingResult>) -> Self {
        let Some(ping) = ping else {
            return Self::unknown();
        };
        let symbol = match ping.status {
            ReachabilityStatus::Ok => "✓",
            ReachabilityStatus::Slow => "⚠",
            ReachabilityStatus::Error => "✗",
            ReachabilityStatus::Unknown => return Self::unknown(),
        };
        Self {
            status: ping.status,
            symbol,
            latency: ping.latency_ms().map(|ms| format!("{ms}ms")),
        }
    }

    fn unknown() -> Self {
        Self {
            status: ReachabilityStatus::Unknown,
            symbol: "?",
            latency: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionButton {
    /// What pressing the button does.
    pub kind: ActionKind,
    pub label: &'static str,
    pub enabled: bool,
    /// Attempts used out of the budget while an action is pending.
    pub progress: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCard {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub link: Option<String>,
    pub link_text: String,
    pub reachability: Option<ReachabilityBadge>,
    pub autostart: bool,
    pub running: bool,
    pub pid: Option<u32>,
    pub action: Option<ActionButton>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionIndicator {
    pub channel: Channel,
    pub status: ConnectionStatus,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitting,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobView {
    pub target_id: String,
    pub state: JobState,
    pub progress: u8,
    pub message: Option<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Temperature {
    pub celsius: i64,
    pub level: Level,
}

impl Temperature {
    fn from_reading(reading: Option<f64>) -> Option<Self> {
        reading.filter(|t| *t > 0.0).map(|t| Self {
            celsius: t.round() as i64,
            level: Level::for_temperature(t),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuPanel {
    pub name: String,
    pub usage: u8,
    pub memory: String,
    pub temperature: Option<Temperature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskBar {
    pub mount_point: String,
    pub usage: String,
    pub percent: u8,
    pub level: Level,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryPanel {
    pub cpu_usage: u8,
    pub cpu_model: String,
    pub cpu_cores: String,
    pub cpu_temperature: Option<Temperature>,
    pub memory_usage: u8,
    pub memory: String,
    pub memory_available: String,
    /// `None` renders as `N/A`.
    pub gpu: Option<GpuPanel>,
    pub upload: String,
    pub download: String,
    pub total_sent: String,
    pub total_received: String,
    pub disks: Vec<DiskBar>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledLine {
    pub kind: LineKind,
    pub spans: Vec<StyledSpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub revision: u64,
    pub cards: Vec<ServiceCard>,
    pub connections: Vec<ConnectionIndicator>,
    pub jobs: Vec<JobView>,
    pub telemetry: Option<TelemetryPanel>,
    pub transcript: Vec<StyledLine>,
}

pub fn project(snapshot: &StoreSnapshot, options: &ViewOptions) -> DashboardView {
    DashboardView {
        revision: snapshot.revision,
        cards: snapshot
            .services
            .iter()
            .map(|s| service_card(snapshot, s, options))
            .collect(),
        connections: [Channel::Telemetry, Channel::Terminal]
            .into_iter()
            .map(|channel| connection_indicator(channel, snapshot.connection(channel)))
            .collect(),
        jobs: jobs(snapshot),
        telemetry: snapshot.telemetry.as_ref().map(telemetry_panel),
        transcript: snapshot.transcript.iter().map(styled_line).collect(),
    }
}

fn service_card(snapshot: &StoreSnapshot, service: &Service, options: &ViewOptions) -> ServiceCard {
    let link = service
        .endpoint_port()
        .map(|port| format!("http://{}:{}", options.server_ip, port));
    let link_text = link.clone().unwrap_or_else(|| "local app".to_string());

    let reachability = service
        .has_link()
        .then(|| ReachabilityBadge::from_ping(snapshot.reachability.get(&service.id)));

    let process = snapshot.processes.get(&service.id).copied().unwrap_or_default();

    ServiceCard {
        id: service.id.clone(),
        name: service.name.clone(),
        description: service.description.clone(),
        icon: if service.icon.is_empty() {
            "🌐".to_string()
        } else {
            service.icon.clone()
        },
        link: link.filter(|_| service.has_link()),
        link_text,
        reachability,
        autostart: service.auto_start,
        running: process.running,
        pid: process.pid(),
        action: action_button(snapshot, service, process.running),
    }
}

fn action_button(snapshot: &StoreSnapshot, service: &Service, running: bool) -> Option<ActionButton> {
    if !service.is_launchable() {
        return None;
    }
    if let Some(pending) = snapshot.pending_for(&service.id, ActionClass::Process) {
        let label = match pending.kind {
            ActionKind::Stop => "Stopping…",
            _ => "Launching…",
        };
        return Some(ActionButton {
            kind: pending.kind,
            label,
            enabled: false,
            progress: Some((pending.attempts_used, pending.attempt_budget)),
        });
    }
    let (kind, label) = if running {
        (ActionKind::Stop, "Stop")
    } else {
        (ActionKind::Launch, "Launch")
    };
    Some(ActionButton {
        kind,
        label,
        enabled: true,
        progress: None,
    })
}

fn connection_indicator(channel: Channel, status: ConnectionStatus) -> ConnectionIndicator {
    let label = match status {
        ConnectionStatus::Idle => "idle",
        ConnectionStatus::Connecting => "connecting…",
        ConnectionStatus::Open => "connected",
        ConnectionStatus::Closed => "disconnected",
        ConnectionStatus::Error => "connection error",
    };
    ConnectionIndicator {
        channel,
        status,
        label,
    }
}

fn jobs(snapshot: &StoreSnapshot) -> Vec<JobView> {
    let mut targets: Vec<&String> = snapshot.jobs.keys().collect();
    for key in snapshot.pending.keys() {
        if key.class == ActionClass::Job && !snapshot.jobs.contains_key(&key.target_id) {
            targets.push(&key.target_id);
        }
    }
    targets.sort();
    targets.dedup();

    targets
        .into_iter()
        .map(|target| {
            let pending = snapshot.pending_for(target, ActionClass::Job).is_some();
            match snapshot.jobs.get(target) {
                Some(job) => {
                    let status = &job.status;
                    let state = if status.failed {
                        JobState::Failed
                    } else if status.completed {
                        JobState::Completed
                    } else {
                        JobState::Running
                    };
                    JobView {
                        target_id: target.clone(),
                        state,
                        progress: if state == JobState::Completed {
                            100
                        } else {
                            status.progress()
                        },
                        message: status.error.clone().or_else(|| status.message.clone()),
                        outputs: status.outputs.iter().map(|o| o.url.clone()).collect(),
                    }
                }
                None => JobView {
                    target_id: target.clone(),
                    state: if pending {
                        JobState::Submitting
                    } else {
                        JobState::Running
                    },
                    progress: 0,
                    message: None,
                    outputs: Vec::new(),
                },
            }
        })
        .collect()
}

fn telemetry_panel(stats: &SystemStats) -> TelemetryPanel {
    let gpu = stats.gpu.available.then(|| GpuPanel {
        name: stats.gpu.name.clone().unwrap_or_else(|| "-".to_string()),
        usage: round_percent(stats.gpu.usage.unwrap_or_default()),
        memory: format!(
            "{} / {} MB",
            stats.gpu.memory_used.unwrap_or_default(),
            stats.gpu.memory_total.unwrap_or_default()
        ),
        temperature: Temperature::from_reading(stats.gpu.temperature),
    });

    TelemetryPanel {
        cpu_usage: round_percent(stats.cpu.usage),
        cpu_model: if stats.cpu.model_name.is_empty() {
            "-".to_string()
        } else {
            stats.cpu.model_name.clone()
        },
        cpu_cores: format!("{} cores", stats.cpu.cores),
        cpu_temperature: Temperature::from_reading(stats.cpu.temperature),
        memory_usage: round_percent(stats.memory.used_percent),
        memory: format!(
            "{} / {}",
            format_bytes(stats.memory.used),
            format_bytes(stats.memory.total)
        ),
        memory_available: format!("available: {}", format_bytes(stats.memory.available)),
        gpu,
        upload: format_speed(stats.network.speed_sent),
        download: format_speed(stats.network.speed_recv),
        total_sent: format_bytes(stats.network.bytes_sent),
        total_received: format_bytes(stats.network.bytes_recv),
        disks: stats
            .disks
            .iter()
            .map(|d| DiskBar {
                mount_point: d.mount_point.clone(),
                usage: format!("{} / {}", format_bytes(d.used), format_bytes(d.total)),
                percent: round_percent(d.used_percent),
                level: Level::for_disk(d.used_percent),
            })
            .collect(),
    }
}

fn styled_line(line: &TranscriptLine) -> StyledLine {
    let spans = match line.kind {
        LineKind::Output => parse_ansi(&line.text),
        _ => vec![StyledSpan {
            text: line.text.clone(),
            color: None,
        }],
    };
    StyledLine {
        kind: line.kind,
        spans,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JobProgress, PendingAction, PendingKey, StateStore};
    use crate::view::style::AnsiColor;
    use chrono::Utc;
    use deck_shared::{
        job::{JobOutput, JobStatus},
        metrics::{CpuStats, DiskStats, GpuStats, MemoryStats, NetworkStats},
        service::ProcessStatus,
    };
    use std::time::Duration;

    fn service(id: &str, port: u16, launch: &str) -> Service {
        Service {
            id: id.to_string(),
            name: id.to_uppercase(),
            port,
            enabled: true,
            launch_command: launch.to_string(),
            ..Default::default()
        }
    }

    fn pending(id: &str, kind: ActionKind, used: u32) -> PendingAction {
        PendingAction {
            target_id: id.to_string(),
            kind,
            started_at: Utc::now(),
            attempts_used: used,
            attempt_budget: 180,
            poll_interval: Duration::from_secs(1),
            instance: 1,
        }
    }

    fn options() -> ViewOptions {
        ViewOptions {
            server_ip: "192.168.1.10".to_string(),
        }
    }

    #[test]
    fn test_service_cards() {
        let store = StateStore::new();
        let mut disabled = service("off", 9000, "");
        disabled.enabled = false;
        let mut autostart = service("media", 8096, "jellyfin");
        autostart.auto_start = true;
        store.replace_services(vec![autostart, service("tool", 0, "/opt/tool"), disabled]);
        store.apply_reachability(vec![PingResult {
            id: "media".to_string(),
            status: ReachabilityStatus::Slow,
            latency: 420,
            message: None,
        }]);
        store.record_process_status("media", ProcessStatus::running(31));

        let view = project(&store.snapshot(), &options());
        let [media, tool, off] = &view.cards[..] else {
            panic!("expected three cards");
        };

        assert_eq!(media.link.as_deref(), Some("http://192.168.1.10:8096"));
        let badge = media.reachability.as_ref().unwrap();
        assert_eq!(badge.symbol, "⚠");
        assert_eq!(badge.latency.as_deref(), Some("420ms"));
        assert!(media.autostart);
        assert_eq!(media.pid, Some(31));
        let button = media.action.as_ref().unwrap();
        assert_eq!((button.label, button.enabled), ("Stop", true));

        assert_eq!(tool.link, None);
        assert_eq!(tool.link_text, "local app");
        assert_eq!(tool.reachability, None);
        assert_eq!(tool.action.as_ref().unwrap().label, "Launch");

        assert_eq!(off.link, None);
        assert_eq!(off.link_text, "http://192.168.1.10:9000");
        assert_eq!(off.action, None);
    }

    #[test]
    fn test_unknown_reachability() {
        let store = StateStore::new();
        store.replace_services(vec![service("web", 80, "")]);

        let view = project(&store.snapshot(), &options());
        let badge = view.cards[0].reachability.as_ref().unwrap();
        assert_eq!(badge.symbol, "?");
        assert_eq!(badge.latency, None);
    }

    #[test]
    fn test_pending_button() {
        let store = StateStore::new();
        store.replace_services(vec![service("media", 8096, "jellyfin")]);
        store.insert_pending(pending("media", ActionKind::Stop, 7));

        let view = project(&store.snapshot(), &options());
        let button = view.cards[0].action.as_ref().unwrap();
        assert_eq!(button.label, "Stopping…");
        assert!(!button.enabled);
        assert_eq!(button.progress, Some((7, 180)));

        store.remove_pending(&PendingKey::new("media", ActionClass::Process), 1);
        let view = project(&store.snapshot(), &options());
        assert_eq!(view.cards[0].action.as_ref().unwrap().label, "Launch");
    }

    #[test]
    fn test_connection_indicators() {
        let store = StateStore::new();
        store.set_connection(Channel::Telemetry, ConnectionStatus::Open);
        store.set_connection(Channel::Terminal, ConnectionStatus::Error);

        let view = project(&store.snapshot(), &ViewOptions::default());
        assert_eq!(view.connections[0].label, "connected");
        assert_eq!(view.connections[1].label, "connection error");
    }

    #[test]
    fn test_job_views() {
        let store = StateStore::new();
        let mut pending_job = pending("draft", ActionKind::JobExecute, 0);
        pending_job.attempt_budget = 120;
        store.insert_pending(pending_job);
        store.record_job_progress(
            "portrait",
            JobProgress {
                job_id: Some("p-1".to_string()),
                status: JobStatus {
                    progress: 40,
                    completed: true,
                    outputs: vec![JobOutput {
                        url: "/view?filename=a.png".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            },
        );

        let view = project(&store.snapshot(), &options());
        assert_eq!(view.jobs.len(), 2);
        assert_eq!(view.jobs[0].target_id, "draft");
        assert_eq!(view.jobs[0].state, JobState::Submitting);
        assert_eq!(view.jobs[1].state, JobState::Completed);
        assert_eq!(view.jobs[1].progress, 100);
        assert_eq!(view.jobs[1].outputs, vec!["/view?filename=a.png".to_string()]);
    }

    #[test]
    fn test_telemetry_panel() {
        let store = StateStore::new();
        store.replace_telemetry(SystemStats {
            cpu: CpuStats {
                usage: 33.6,
                cores: 16,
                temperature: Some(81.2),
                ..Default::default()
            },
            memory: MemoryStats {
                total: 16 * 1024 * 1024 * 1024,
                used: 6 * 1024 * 1024 * 1024,
                available: 10 * 1024 * 1024 * 1024,
                used_percent: 37.5,
            },
            gpu: GpuStats::default(),
            network: NetworkStats {
                speed_sent: 1536,
                speed_recv: 0,
                bytes_sent: 1024 * 1024,
                bytes_recv: 0,
            },
            disks: vec![DiskStats {
                mount_point: "/data".to_string(),
                used: 80,
                total: 100,
                used_percent: 80.0,
                ..Default::default()
            }],
            time: 0,
        });

        let panel = project(&store.snapshot(), &options()).telemetry.unwrap();
        assert_eq!(panel.cpu_usage, 34);
        assert_eq!(panel.cpu_model, "-");
        assert_eq!(panel.cpu_cores, "16 cores");
        assert_eq!(
            panel.cpu_temperature,
            Some(Temperature {
                celsius: 81,
                level: Level::Danger
            })
        );
        assert_eq!(panel.memory, "6 GB / 16 GB");
        assert_eq!(panel.gpu, None);
        assert_eq!(panel.upload, "1.5 KB/s");
        assert_eq!(panel.download, "0 B/s");
        assert_eq!(panel.total_sent, "1 MB");
        assert_eq!(panel.disks[0].level, Level::Warning);
        assert_eq!(panel.disks[0].usage, "80 B / 100 B");
    }

    #[test]
    fn test_levels() {
        assert_eq!(Level::for_temperature(59.9), Level::Normal);
        assert_eq!(Level::for_temperature(60.0), Level::Warning);
        assert_eq!(Level::for_disk(74.9), Level::Normal);
        assert_eq!(Level::for_disk(90.0), Level::Danger);
    }

    #[test]
    fn test_transcript_styles_only_remote_output() {
        let store = StateStore::new();
        store.append_transcript(TranscriptLine::new(LineKind::Echo, "$ ls \x1b[31m"));
        store.append_transcript(TranscriptLine::new(LineKind::Output, "\x1b[34mdir\x1b[0m file"));

        let view = project(&store.snapshot(), &options());
        assert_eq!(view.transcript[0].spans[0].text, "$ ls \x1b[31m");
        assert_eq!(view.transcript[1].spans[0].color, Some(AnsiColor::Blue));
        assert_eq!(view.transcript[1].spans[1].text, " file");
    }
}
