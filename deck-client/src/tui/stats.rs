use std::{collections::VecDeque, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::Line,
    widgets::{Axis, Block, Borders, Chart, Dataset, Gauge, GraphType, Paragraph, Row, Table},
};
use termion::{async_stdin, event::Key, input::TermRead};

use crate::{
    config::Config,
    feeds::telemetry::open_telemetry,
    store::{Channel, StateStore, StoreSnapshot},
    tui::{LogTail, draw_log_line, level_color, next_revision, open_screen},
    util::websocket::WsConnector,
    view::{ConnectionIndicator, DashboardView, TelemetryPanel, ViewOptions, project},
};

const HISTORY_LEN: usize = 200;

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = StateStore::new();
    let session = open_telemetry(config, Arc::new(WsConnector), store.clone())?;

    let options = ViewOptions {
        server_ip: config.server_ip.clone(),
    };
    let result = ui_loop(&store, &options)
        .await
        .map_err(|e| anyhow!("{:?}", e));

    session.close();
    result
}

/// CPU usage samples for the history chart. Only a new telemetry frame adds
/// a point.
pub(super) struct CpuHistory {
    samples: VecDeque<f64>,
    last_sample: Option<i64>,
}

impl CpuHistory {
    pub(super) fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(HISTORY_LEN),
            last_sample: None,
        }
    }

    pub(super) fn record(&mut self, snapshot: &StoreSnapshot, view: &DashboardView) {
        let sample = snapshot.telemetry.as_ref().map(|s| s.time);
        let Some(panel) = &view.telemetry else {
            return;
        };
        if sample == self.last_sample {
            return;
        }
        self.last_sample = sample;
        self.samples.push_back(panel.cpu_usage as f64);
        if self.samples.len() > HISTORY_LEN {
            self.samples.pop_front();
        }
    }
}

async fn ui_loop(
    store: &StateStore,
    options: &ViewOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut terminal = open_screen()?;
    let mut keys = async_stdin().keys();
    let mut revisions = store.subscribe();
    let mut history = CpuHistory::new();
    let mut logs = LogTail::subscribe(1);

    loop {
        if let Some(Ok(key)) = keys.next() {
            match key {
                Key::Ctrl('c') | Key::Char('q') | Key::Esc => return Ok(()),
                _ => {}
            }
        }

        next_revision(&mut revisions, Duration::from_millis(50)).await;
        logs.drain();

        let snapshot = store.snapshot();
        let view = project(&snapshot, options);
        history.record(&snapshot, &view);

        let status = view
            .connections
            .iter()
            .find(|c| c.channel == Channel::Telemetry);

        terminal.draw(|f| draw(f, view.telemetry.as_ref(), status, &history, &logs))?;
    }
}

fn draw(
    f: &mut Frame,
    panel: Option<&TelemetryPanel>,
    status: Option<&ConnectionIndicator>,
    history: &CpuHistory,
    logs: &LogTail,
) {
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(f.area());
    draw_log_line(f, logs, outer[2]);

    let label = status.map_or("idle", |s| s.label);
    f.render_widget(
        Paragraph::new(Line::styled(
            format!("telemetry: {label}   (q to quit)"),
            Style::default().fg(Color::DarkGray),
        )),
        outer[0],
    );

    draw_panel(f, panel, history, outer[1]);
}

/// Gauges, network, CPU history and disks, or a placeholder until the first
/// frame arrives.
pub(super) fn draw_panel(
    f: &mut Frame,
    panel: Option<&TelemetryPanel>,
    history: &CpuHistory,
    area: Rect,
) {
    let Some(panel) = panel else {
        f.render_widget(
            Paragraph::new("waiting for the first snapshot…")
                .block(Block::default().title("System").borders(Borders::ALL)),
            area,
        );
        return;
    };

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5), // cpu
            Constraint::Length(5), // memory
            Constraint::Length(5), // gpu
            Constraint::Min(4),    // network
        ])
        .split(columns[0]);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(10), Constraint::Min(5)])
        .split(columns[1]);

    draw_cpu(f, panel, left[0]);
    draw_memory(f, panel, left[1]);
    draw_gpu(f, panel, left[2]);
    draw_network(f, panel, left[3]);
    draw_history(f, &history.samples, right[0]);
    draw_disks(f, panel, right[1]);
}

fn gauge(title: String, percent: u8, color: Color) -> Gauge<'static> {
    Gauge::default()
        .block(Block::default().title(title).borders(Borders::ALL))
        .gauge_style(Style::default().fg(color))
        .percent(percent.into())
}

fn draw_cpu(f: &mut Frame, panel: &TelemetryPanel, area: Rect) {
    let mut title = format!("CPU {} ({})", panel.cpu_model, panel.cpu_cores);
    let mut color = Color::Cyan;
    if let Some(t) = &panel.cpu_temperature {
        title.push_str(&format!(" {}°C", t.celsius));
        color = level_color(t.level);
    }
    f.render_widget(gauge(title, panel.cpu_usage, color), area);
}

fn draw_memory(f: &mut Frame, panel: &TelemetryPanel, area: Rect) {
    let title = format!("Memory {} ({})", panel.memory, panel.memory_available);
    f.render_widget(gauge(title, panel.memory_usage, Color::Cyan), area);
}

fn draw_gpu(f: &mut Frame, panel: &TelemetryPanel, area: Rect) {
    match &panel.gpu {
        Some(gpu) => {
            let mut title = format!("GPU {} {}", gpu.name, gpu.memory);
            let mut color = Color::Magenta;
            if let Some(t) = &gpu.temperature {
                title.push_str(&format!(" {}°C", t.celsius));
                color = level_color(t.level);
            }
            f.render_widget(gauge(title, gpu.usage, color), area);
        }
        None => f.render_widget(
            Paragraph::new("N/A").block(Block::default().title("GPU").borders(Borders::ALL)),
            area,
        ),
    }
}

fn draw_network(f: &mut Frame, panel: &TelemetryPanel, area: Rect) {
    let lines = vec![
        Line::from(format!("↑ {:<14} total {}", panel.upload, panel.total_sent)),
        Line::from(format!("↓ {:<14} total {}", panel.download, panel.total_received)),
    ];
    f.render_widget(
        Paragraph::new(lines).block(Block::default().title("Network").borders(Borders::ALL)),
        area,
    );
}

fn draw_history(f: &mut Frame, cpu_history: &VecDeque<f64>, area: Rect) {
    let points: Vec<(f64, f64)> = cpu_history
        .iter()
        .enumerate()
        .map(|(i, v)| (i as f64, *v))
        .collect();

    let chart = Chart::new(vec![
        Dataset::default()
            .name("CPU %")
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::LightCyan))
            .data(&points),
    ])
    .block(Block::default().title("CPU History").borders(Borders::ALL))
    .x_axis(Axis::default().bounds([0.0, points.len().max(1) as f64]))
    .y_axis(Axis::default().bounds([0.0, 100.0]));

    f.render_widget(chart, area);
}

fn draw_disks(f: &mut Frame, panel: &TelemetryPanel, area: Rect) {
    let rows: Vec<Row> = panel
        .disks
        .iter()
        .map(|d| {
            Row::new(vec![
                d.mount_point.clone(),
                format!("{}%", d.percent),
                d.usage.clone(),
            ])
            .style(Style::default().fg(level_color(d.level)))
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(40),
            Constraint::Percentage(15),
            Constraint::Percentage(45),
        ],
    )
    .header(
        Row::new(vec!["Mount", "Used", "Usage"]).style(Style::default().fg(Color::Magenta)),
    )
    .block(Block::default().title("Disks").borders(Borders::ALL));

    f.render_widget(table, area);
}
