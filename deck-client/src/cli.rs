use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::warn;

use crate::config::Config;
use crate::refresh::{refresh_processes, refresh_reachability, refresh_services};
use crate::server::{ApiClient, Backend};
use crate::store::StateStore;
use crate::tracker::{ActionTracker, Outcome, TrackHandle, job::JobRunner, process::ServiceControl};
use crate::tui;
use crate::util::logging::{LogTarget, init_logging};
use crate::util::renderer::{UiEvent, run_renderer};
use crate::view::{ServiceCard, ViewOptions, project};

#[derive(Parser)]
#[command(name = "deck")]
#[command(version, about = "deck - control a self-hosted services dashboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List services with reachability and process status
    Services,

    /// Check reachability of every service with a network endpoint
    Ping,

    /// Launch a service and wait until it is confirmed running
    Launch {
        /// Service ID
        id: String,
    },

    /// Stop a service and wait until it is confirmed stopped
    Stop {
        /// Service ID
        id: String,
    },

    /// Show the process status of a service
    Status {
        /// Service ID
        id: String,
    },

    /// Live host telemetry
    Stats,

    /// Interactive remote shell
    Shell,

    /// Submit a workflow and wait for its result
    Job {
        /// Path to the workflow JSON
        workflow: PathBuf,

        /// Name the job is tracked under (defaults to the file name)
        #[arg(long)]
        target: Option<String>,
    },

    /// Full-screen service dashboard
    Dashboard,

    /// Show CLI version information
    Version,
}

impl Commands {
    fn log_target(&self) -> LogTarget {
        match self {
            Commands::Stats | Commands::Shell | Commands::Dashboard => LogTarget::Channel,
            _ => LogTarget::Stderr,
        }
    }
}

pub async fn cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    init_logging(&config.log_level, cli.command.log_target());

    match cli.command {
        Commands::Services => {
            let store = load(&config, true).await?;
            let view = project(&store.snapshot(), &view_options(&config));
            if view.cards.is_empty() {
                println!("No services configured");
            }
            for card in &view.cards {
                println!("{}", card_line(card));
            }
        }

        Commands::Ping => {
            let store = load(&config, false).await?;
            let view = project(&store.snapshot(), &view_options(&config));
            for card in view.cards.iter().filter(|c| c.reachability.is_some()) {
                println!("{}", card_line(card));
            }
        }

        Commands::Launch { id } => {
            let (control, store) = service_control(&config).await?;
            let handle = control.launch(&id)?;
            wait_for_outcome(&format!("launch {id}"), handle, &store).await?;
        }

        Commands::Stop { id } => {
            let (control, store) = service_control(&config).await?;
            let handle = control.stop(&id)?;
            wait_for_outcome(&format!("stop {id}"), handle, &store).await?;
        }

        Commands::Status { id } => {
            let backend = ApiClient::new(&config.api_url)?;
            let status = backend.probe_process_status(&id).await?;
            match status.pid() {
                Some(pid) => println!("{id}: running (pid {pid})"),
                None if status.running => println!("{id}: running"),
                None => println!("{id}: stopped"),
            }
        }

        Commands::Stats => tui::stats::run_stats(&config).await?,

        Commands::Shell => tui::shell::run_shell(&config).await?,

        Commands::Job { workflow, target } => {
            let contents = std::fs::read_to_string(&workflow)
                .with_context(|| format!("Failed to read {}", workflow.display()))?;
            let workflow_json: Value =
                serde_json::from_str(&contents).context("Workflow is not valid JSON")?;
            let target = target.unwrap_or_else(|| {
                workflow
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "job".to_string())
            });

            let backend: Arc<dyn Backend> = Arc::new(ApiClient::new(&config.api_url)?);
            let store = StateStore::new();
            let runner = JobRunner::new(
                backend,
                ActionTracker::new(store.clone()),
                config.job_poll.policy(),
            );
            let handle = runner.execute(&target, workflow_json);
            wait_for_outcome(&format!("job {target}"), handle, &store).await?;

            if let Some(progress) = store.job(&target) {
                for output in &progress.status.outputs {
                    println!("{}", output.url);
                }
            }
        }

        Commands::Dashboard => tui::dashboard::run_dashboard(&config).await?,

        Commands::Version => {
            println!("deck {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn view_options(config: &Config) -> ViewOptions {
    ViewOptions {
        server_ip: config.server_ip.clone(),
    }
}

/// Fetches the service list and reachability, plus process status when
/// `processes` is set.
async fn load(config: &Config, processes: bool) -> anyhow::Result<StateStore> {
    let backend: Arc<dyn Backend> = Arc::new(ApiClient::new(&config.api_url)?);
    let store = StateStore::new();

    refresh_services(backend.as_ref(), &store).await?;
    if let Err(e) = refresh_reachability(backend.as_ref(), &store).await {
        warn!("{:#}", e);
    }
    if processes {
        let tracker = ActionTracker::new(store.clone());
        refresh_processes(backend.as_ref(), &tracker, &store).await;
    }
    Ok(store)
}

async fn service_control(config: &Config) -> anyhow::Result<(ServiceControl, StateStore)> {
    let backend: Arc<dyn Backend> = Arc::new(ApiClient::new(&config.api_url)?);
    let store = StateStore::new();
    refresh_services(backend.as_ref(), &store).await?;

    let control = ServiceControl::new(
        backend,
        ActionTracker::new(store.clone()),
        config.launch_poll.policy(),
    );
    Ok((control, store))
}

fn card_line(card: &ServiceCard) -> String {
    let badge = card
        .reachability
        .as_ref()
        .map(|b| match &b.latency {
            Some(latency) => format!("{} {latency}", b.symbol),
            None => b.symbol.to_string(),
        })
        .unwrap_or_default();
    let process = match (card.pid, &card.action) {
        (Some(pid), _) => format!("running (pid {pid})"),
        (None, Some(_)) if card.running => "running".to_string(),
        (None, Some(_)) => "stopped".to_string(),
        (None, None) => String::new(),
    };
    format!(
        "{:<20} {:<28} {:<8} {}",
        card.id, card.link_text, badge, process
    )
}

/// Shows a spinner with the attempt count until `handle` finishes. Ctrl-C
/// cancels the tracked action.
async fn wait_for_outcome(
    label: &str,
    mut handle: TrackHandle,
    store: &StateStore,
) -> anyhow::Result<()> {
    let (tx, rx) = broadcast::channel(64);
    let renderer: JoinHandle<()> = tokio::spawn(run_renderer(rx));
    let _ = tx.send(UiEvent::LoadingStart);
    let _ = tx.send(UiEvent::Line(format!("{label}…")));

    let mut revisions = store.subscribe();
    let outcome: Outcome = loop {
        tokio::select! {
            outcome = handle.outcome() => break outcome,
            _ = tokio::signal::ctrl_c() => handle.cancel(),
            Ok(()) = revisions.changed() => {
                if let Some(p) = store.pending(handle.target_id(), handle.kind().class()) {
                    let _ = tx.send(UiEvent::Line(format!(
                        "{label}: check {}/{}",
                        p.attempts_used, p.attempt_budget
                    )));
                }
            }
        }
    };

    let _ = tx.send(UiEvent::outcome(label, &outcome));
    drop(tx);
    let _ = renderer.await;

    if !outcome.is_success() {
        bail!("{label} did not complete");
    }
    Ok(())
}
