//! Bulk refresh of the service list, reachability and process status.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::Config,
    server::Backend,
    store::{ActionClass, StateStore},
    tracker::ActionTracker,
};

pub async fn refresh_services(backend: &dyn Backend, store: &StateStore) -> Result<usize> {
    let services = backend.list_services().await?;
    let count = services.len();
    store.replace_services(services);
    Ok(count)
}

pub async fn refresh_reachability(backend: &dyn Backend, store: &StateStore) -> Result<usize> {
    let results = backend.ping_all().await?;
    let count = results.len();
    store.apply_reachability(results);
    Ok(count)
}

/// Reads the process status of every launchable service. Services with a
/// launch/stop in flight are skipped; the tracker owns their slot.
pub async fn refresh_processes(
    backend: &dyn Backend,
    tracker: &ActionTracker,
    store: &StateStore,
) -> usize {
    let ids: Vec<(String, u64)> = store
        .services()
        .into_iter()
        .filter(|s| s.is_launchable())
        .map(|s| s.id)
        .filter(|id| !tracker.is_pending(id, ActionClass::Process))
        .map(|id| {
            let generation = store.process_generation(&id);
            (id, generation)
        })
        .collect();

    let probes = ids.iter().map(|(id, _)| backend.probe_process_status(id));
    let results = join_all(probes).await;

    let mut updated = 0;
    for ((id, generation), result) in ids.iter().zip(results) {
        match result {
            Ok(status) => {
                if store.refresh_process_status(id, *generation, status) {
                    updated += 1;
                }
            }
            Err(e) => debug!("Process status of {} unavailable: {}", id, e),
        }
    }
    updated
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    pub ping_every: Duration,
    pub ping_first: Duration,
    pub processes_every: Duration,
    pub processes_first: Duration,
}

impl RefreshSchedule {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ping_every: Duration::from_secs(config.ping_refresh_secs),
            ping_first: Duration::from_millis(1000),
            processes_every: Duration::from_secs(config.process_refresh_secs),
            processes_first: Duration::from_millis(1500),
        }
    }
}

/// Periodic refresh while the home view is shown.
pub struct RefreshLoop {
    active: watch::Sender<bool>,
    token: CancellationToken,
}

impl RefreshLoop {
    pub fn start(
        backend: Arc<dyn Backend>,
        tracker: ActionTracker,
        schedule: RefreshSchedule,
    ) -> Self {
        let (active, active_rx) = watch::channel(true);
        let token = CancellationToken::new();

        tokio::spawn(ping_loop(
            backend.clone(),
            tracker.store().clone(),
            schedule,
            active_rx.clone(),
            token.clone(),
        ));
        tokio::spawn(process_loop(backend, tracker, schedule, active_rx, token.clone()));

        Self { active, token }
    }

    pub fn set_active(&self, active: bool) {
        self.active.send_replace(active);
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for RefreshLoop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn ping_loop(
    backend: Arc<dyn Backend>,
    store: StateStore,
    schedule: RefreshSchedule,
    active: watch::Receiver<bool>,
    token: CancellationToken,
) {
    let mut delay = schedule.ping_first;
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = schedule.ping_every;
        if !*active.borrow() {
            continue;
        }
        if let Err(e) = refresh_reachability(backend.as_ref(), &store).await {
            warn!("Reachability refresh failed: {:#}", e);
        }
    }
}

async fn process_loop(
    backend: Arc<dyn Backend>,
    tracker: ActionTracker,
    schedule: RefreshSchedule,
    active: watch::Receiver<bool>,
    token: CancellationToken,
) {
    let mut delay = schedule.processes_first;
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = schedule.processes_every;
        if !*active.borrow() {
            continue;
        }
        refresh_processes(backend.as_ref(), &tracker, tracker.store()).await;
    }
}
