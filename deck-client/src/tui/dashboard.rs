use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Row, Table, TableState},
};
use termion::{async_stdin, event::Key, input::TermRead};
use tokio::sync::mpsc;

use crate::{
    config::Config,
    feeds::telemetry::open_telemetry,
    refresh::{RefreshLoop, RefreshSchedule, refresh_services},
    server::{ApiClient, Backend},
    session::{Connector, SessionHandle},
    store::{ActionKind, StateStore},
    tracker::{ActionTracker, TrackHandle, process::ServiceControl},
    tui::{
        LogTail, level_color, log_color, next_revision, open_screen,
        stats::{CpuHistory, draw_panel},
    },
    util::{renderer::UiEvent, websocket::WsConnector},
    view::{DashboardView, ServiceCard, ViewOptions, project},
};
use deck_shared::service::ReachabilityStatus;

const HELP: &str = "Tab services/stats · ↑/↓ select · Enter launch/stop · x cancel · r reload · q quit";
const LOG_LINES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Services,
    Stats,
}

struct Dashboard {
    control: ServiceControl,
    backend: Arc<dyn Backend>,
    store: StateStore,
    selected: usize,
    notice: Option<String>,
    events: mpsc::UnboundedSender<UiEvent>,
    pane: Pane,
    refresh: RefreshLoop,
    telemetry: Option<SessionHandle>,
    connector: Arc<dyn Connector>,
    config: Config,
}

impl Dashboard {
    fn new(
        config: &Config,
        backend: Arc<dyn Backend>,
        connector: Arc<dyn Connector>,
        store: StateStore,
        events: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        let tracker = ActionTracker::new(store.clone());
        let refresh = RefreshLoop::start(
            backend.clone(),
            tracker.clone(),
            RefreshSchedule::from_config(config),
        );
        Self {
            control: ServiceControl::new(backend.clone(), tracker, config.launch_poll.policy()),
            backend,
            store,
            selected: 0,
            notice: None,
            events,
            pane: Pane::Services,
            refresh,
            telemetry: None,
            connector,
            config: config.clone(),
        }
    }

    /// Background refresh runs while the services pane is shown; telemetry
    /// streams, and reconnects, only while the stats pane is.
    fn show(&mut self, pane: Pane) {
        self.pane = pane;
        self.refresh.set_active(pane == Pane::Services);

        let running = self.telemetry.as_ref().is_some_and(|t| t.is_running());
        match pane {
            Pane::Services => {
                if let Some(telemetry) = &self.telemetry {
                    telemetry.set_view_active(false);
                }
            }
            Pane::Stats if running => {
                if let Some(telemetry) = &self.telemetry {
                    telemetry.set_view_active(true);
                }
            }
            Pane::Stats => self.reopen_telemetry(),
        }
    }

    fn reopen_telemetry(&mut self) {
        if let Some(old) = self.telemetry.take() {
            old.close();
        }
        match open_telemetry(&self.config, self.connector.clone(), self.store.clone()) {
            Ok(session) => self.telemetry = Some(session),
            Err(e) => self.notice = Some(format!("{e:#}")),
        }
    }

    /// Reports the final outcome of `handle` in the footer.
    fn watch(&self, mut handle: TrackHandle) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let label = format!("{} {}", handle.kind().as_str(), handle.target_id());
            let outcome = handle.outcome().await;
            let _ = events.send(UiEvent::outcome(&label, &outcome));
        });
    }

    fn toggle(&mut self, card: &ServiceCard) {
        let Some(button) = &card.action else {
            self.notice = Some(format!("{} has no launch command", card.name));
            return;
        };
        if !button.enabled {
            return;
        }
        let result = match button.kind {
            ActionKind::Stop => self.control.stop(&card.id),
            _ => self.control.launch(&card.id),
        };
        match result {
            Ok(handle) => self.watch(handle),
            Err(e) => self.notice = Some(e.to_string()),
        }
    }

    async fn reload(&mut self) {
        match refresh_services(self.backend.as_ref(), &self.store).await {
            Ok(n) => self.notice = Some(format!("{n} services")),
            Err(e) => self.notice = Some(format!("{e:#}")),
        }
    }

    fn shutdown(&self) {
        self.refresh.stop();
        if let Some(telemetry) = &self.telemetry {
            telemetry.close();
        }
        self.control.tracker().cancel_all();
    }
}

pub async fn run_dashboard(config: &Config) -> Result<()> {
    let backend: Arc<dyn Backend> = Arc::new(ApiClient::new(&config.api_url)?);
    let store = StateStore::new();

    refresh_services(backend.as_ref(), &store).await?;

    let (events, rx) = mpsc::unbounded_channel();
    let mut dashboard = Dashboard::new(config, backend, Arc::new(WsConnector), store, events);
    let options = ViewOptions {
        server_ip: config.server_ip.clone(),
    };

    let result = ui_loop(&mut dashboard, rx, &options)
        .await
        .map_err(|e| anyhow!("{:?}", e));

    dashboard.shutdown();
    result
}

async fn ui_loop(
    dashboard: &mut Dashboard,
    mut events: mpsc::UnboundedReceiver<UiEvent>,
    options: &ViewOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut terminal = open_screen()?;
    let mut keys = async_stdin().keys();
    let mut revisions = dashboard.store.subscribe();
    let mut history = CpuHistory::new();
    let mut logs = LogTail::subscribe(LOG_LINES);

    loop {
        let view = project(&dashboard.store.snapshot(), options);
        let count = view.cards.len();
        dashboard.selected = dashboard.selected.min(count.saturating_sub(1));
        let services = dashboard.pane == Pane::Services;

        while let Some(Ok(key)) = keys.next() {
            match key {
                Key::Ctrl('c') | Key::Char('q') | Key::Esc => return Ok(()),
                Key::Char('\t') => dashboard.show(if services { Pane::Stats } else { Pane::Services }),
                Key::Char('r') => dashboard.reload().await,
                Key::Up if services => dashboard.selected = dashboard.selected.saturating_sub(1),
                Key::Down if services && dashboard.selected + 1 < count => dashboard.selected += 1,
                Key::Char('\n') if services => {
                    if let Some(card) = view.cards.get(dashboard.selected) {
                        dashboard.toggle(card);
                    }
                }
                Key::Char('x') if services => {
                    if let Some(card) = view.cards.get(dashboard.selected) {
                        dashboard.control.cancel(&card.id);
                    }
                }
                _ => {}
            }
        }

        while let Ok(event) = events.try_recv() {
            dashboard.notice = event.as_line();
        }

        next_revision(&mut revisions, Duration::from_millis(50)).await;
        logs.drain();

        let snapshot = dashboard.store.snapshot();
        let view = project(&snapshot, options);
        history.record(&snapshot, &view);
        let screen = DrawState {
            view: &view,
            pane: dashboard.pane,
            selected: dashboard.selected,
            notice: dashboard.notice.as_deref(),
            history: &history,
            logs: &logs,
        };
        terminal.draw(|f| draw(f, &screen))?;
    }
}

fn badge_color(status: ReachabilityStatus) -> Color {
    match status {
        ReachabilityStatus::Ok => Color::Green,
        ReachabilityStatus::Slow => Color::Yellow,
        ReachabilityStatus::Error => Color::Red,
        ReachabilityStatus::Unknown => Color::DarkGray,
    }
}

fn card_row(card: &ServiceCard) -> Row<'static> {
    let reach = match &card.reachability {
        Some(badge) => Span::styled(
            match &badge.latency {
                Some(latency) => format!("{} {latency}", badge.symbol),
                None => badge.symbol.to_string(),
            },
            Style::default().fg(badge_color(badge.status)),
        ),
        None => Span::raw(""),
    };

    let process = match card.pid {
        Some(pid) => format!("running ({pid})"),
        None if card.running => "running".to_string(),
        None if card.action.is_some() => "stopped".to_string(),
        None => String::new(),
    };

    let action = match &card.action {
        Some(button) => {
            let mut text = format!("[{}]", button.label);
            if let Some((used, budget)) = button.progress {
                text.push_str(&format!(" {used}/{budget}"));
            }
            let style = if button.enabled {
                Style::default()
            } else {
                Style::default().fg(Color::Yellow)
            };
            Span::styled(text, style)
        }
        None => Span::raw(""),
    };

    let name = if card.autostart {
        format!("{} {} ⏻", card.icon, card.name)
    } else {
        format!("{} {}", card.icon, card.name)
    };

    Row::new(vec![
        Line::from(name),
        Line::from(card.link_text.clone()),
        Line::from(reach),
        Line::from(process),
        Line::from(action),
    ])
}

struct DrawState<'a> {
    view: &'a DashboardView,
    pane: Pane,
    selected: usize,
    notice: Option<&'a str>,
    history: &'a CpuHistory,
    logs: &'a LogTail,
}

fn draw(f: &mut Frame, screen: &DrawState) {
    let view = screen.view;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(5),
            Constraint::Length(3),
            Constraint::Length(LOG_LINES as u16 + 2),
        ])
        .split(f.area());

    let mut header: Vec<Span> = Vec::new();
    for c in &view.connections {
        header.push(Span::styled(
            format!("{}: {}  ", c.channel.as_str(), c.label),
            Style::default().fg(Color::DarkGray),
        ));
    }
    if let Some(panel) = &view.telemetry {
        header.push(Span::raw(format!("cpu {}%  ", panel.cpu_usage)));
        header.push(Span::raw(format!("mem {}%  ", panel.memory_usage)));
        if let Some(t) = &panel.cpu_temperature {
            header.push(Span::styled(
                format!("{}°C", t.celsius),
                Style::default().fg(level_color(t.level)),
            ));
        }
    }
    f.render_widget(Paragraph::new(Line::from(header)), chunks[0]);

    match screen.pane {
        Pane::Services => {
            let rows: Vec<Row> = view.cards.iter().map(card_row).collect();
            let table = Table::new(
                rows,
                [
                    Constraint::Percentage(25),
                    Constraint::Percentage(30),
                    Constraint::Percentage(12),
                    Constraint::Percentage(15),
                    Constraint::Percentage(18),
                ],
            )
            .header(
                Row::new(vec!["Service", "Link", "Ping", "Process", "Action"])
                    .style(Style::default().fg(Color::LightBlue)),
            )
            .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .block(Block::default().title("Services").borders(Borders::ALL));

            let mut state = TableState::default().with_selected(Some(screen.selected));
            f.render_stateful_widget(table, chunks[1], &mut state);
        }
        Pane::Stats => draw_panel(f, view.telemetry.as_ref(), screen.history, chunks[1]),
    }

    f.render_widget(
        Paragraph::new(screen.notice.unwrap_or_default().to_string())
            .block(Block::default().title(HELP).borders(Borders::ALL)),
        chunks[2],
    );

    let lines: Vec<Line> = screen
        .logs
        .lines()
        .map(|l| Line::styled(l.to_string(), Style::default().fg(log_color(l))))
        .collect();
    f.render_widget(
        Paragraph::new(lines).block(Block::default().title("Log").borders(Borders::ALL)),
        chunks[3],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::FakeConnector;
    use crate::store::{Channel, ConnectionStatus};
    use crate::testing::FakeBackend;
    use crate::view::{ActionButton, ReachabilityBadge};

    fn card() -> ServiceCard {
        ServiceCard {
            id: "media".to_string(),
            name: "Media".to_string(),
            description: String::new(),
            icon: "🎬".to_string(),
            link: Some("http://nas:8096".to_string()),
            link_text: "http://nas:8096".to_string(),
            reachability: None,
            autostart: false,
            running: true,
            pid: Some(12),
            action: Some(ActionButton {
                kind: ActionKind::Stop,
                label: "Stopping…",
                enabled: false,
                progress: Some((3, 180)),
            }),
        }
    }

    #[test]
    fn test_badge_colors() {
        assert_eq!(badge_color(ReachabilityStatus::Slow), Color::Yellow);
        assert_eq!(badge_color(ReachabilityStatus::Unknown), Color::DarkGray);
    }

    fn dashboard(backend: &Arc<FakeBackend>, connector: &Arc<FakeConnector>) -> Dashboard {
        let (events, _rx) = mpsc::unbounded_channel();
        Dashboard::new(
            &Config::default(),
            backend.clone(),
            connector.clone(),
            StateStore::new(),
            events,
        )
    }

    #[tokio::test]
    async fn test_disabled_button_is_not_pressed() {
        let backend = Arc::new(FakeBackend::default());
        let connector = Arc::new(FakeConnector::default());
        let mut dashboard = dashboard(&backend, &connector);

        dashboard.toggle(&card());
        assert!(backend.stops().is_empty());
        assert!(dashboard.notice.is_none());

        let mut plain = card();
        plain.action = None;
        plain.reachability = Some(ReachabilityBadge {
            status: ReachabilityStatus::Ok,
            symbol: "✓",
            latency: None,
        });
        dashboard.toggle(&plain);
        assert_eq!(dashboard.notice.as_deref(), Some("Media has no launch command"));
        dashboard.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panes_switch_refresh_and_telemetry() {
        let backend = Arc::new(FakeBackend::default());
        let connector = Arc::new(FakeConnector::default());
        let mut dashboard = dashboard(&backend, &connector);
        assert!(dashboard.refresh.is_active());
        assert!(dashboard.telemetry.is_none());

        dashboard.show(Pane::Stats);
        assert!(!dashboard.refresh.is_active());
        let first = dashboard.telemetry.clone().unwrap();
        first.wait_for(ConnectionStatus::Open).await.unwrap();

        // Showing the pane again keeps the live session.
        dashboard.show(Pane::Stats);
        assert_eq!(connector.connects(), 1);

        // Away from the stats pane a dropped stream stays down.
        dashboard.show(Pane::Services);
        assert!(dashboard.refresh.is_active());
        drop(connector.remote());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.connects(), 1);
        assert!(!first.is_running());
        assert_eq!(
            dashboard.store.connection(Channel::Telemetry),
            ConnectionStatus::Idle
        );

        dashboard.show(Pane::Stats);
        let second = dashboard.telemetry.clone().unwrap();
        second.wait_for(ConnectionStatus::Open).await.unwrap();
        assert_eq!(connector.connects(), 2);

        dashboard.shutdown();
        assert_eq!(second.status(), ConnectionStatus::Idle);
    }
}
