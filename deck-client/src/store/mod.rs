//! Single in-memory source of truth for the dashboard.
//!
//! Every slice has exactly one writer:
//! - services, reachability: bulk refresh
//! - process status: the action tracker while a process action is pending
//!   for that id, bulk refresh otherwise
//! - pending actions, job progress: the action tracker
//! - telemetry, connection status, transcript: the owning stream session
//!
//! Keyed slices sit in `DashMap`s so writers for different keys never
//! contend; every successful write bumps the revision exactly once.

mod model;

pub use model::*;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::{DashMap, mapref::entry::Entry};
use deck_shared::{
    metrics::SystemStats,
    service::{PingResult, ProcessStatus, Service},
};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Consistent copy of the whole store, handed to the reconciler.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub revision: u64,
    pub services: Vec<Service>,
    pub reachability: HashMap<String, PingResult>,
    pub processes: HashMap<String, ProcessStatus>,
    pub pending: HashMap<PendingKey, PendingAction>,
    pub jobs: HashMap<String, JobProgress>,
    pub telemetry: Option<SystemStats>,
    pub connections: HashMap<Channel, ConnectionStatus>,
    pub transcript: Vec<TranscriptLine>,
}

impl StoreSnapshot {
    pub fn connection(&self, channel: Channel) -> ConnectionStatus {
        self.connections.get(&channel).copied().unwrap_or_default()
    }

    pub fn pending_for(&self, target_id: &str, class: ActionClass) -> Option<&PendingAction> {
        self.pending.get(&PendingKey::new(target_id, class))
    }
}

struct Inner {
    services: RwLock<Vec<Service>>,
    reachability: DashMap<String, PingResult>,
    processes: DashMap<String, ProcessStatus>,
    /// Moves whenever a process action registers or finishes for an id.
    process_generations: DashMap<String, u64>,
    pending: DashMap<PendingKey, PendingAction>,
    jobs: DashMap<String, JobProgress>,
    telemetry: RwLock<Option<SystemStats>>,
    connections: DashMap<Channel, ConnectionStatus>,
    transcript: RwLock<Vec<TranscriptLine>>,
    revision: watch::Sender<u64>,
}

#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl StateStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                services: RwLock::new(Vec::new()),
                reachability: DashMap::new(),
                processes: DashMap::new(),
                process_generations: DashMap::new(),
                pending: DashMap::new(),
                jobs: DashMap::new(),
                telemetry: RwLock::new(None),
                connections: DashMap::new(),
                transcript: RwLock::new(Vec::new()),
                revision,
            }),
        }
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|r| *r += 1);
    }

    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    /// Receiver that observes every revision change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    // ---------------------------------------------------------------
    // services + reachability (bulk refresh)
    // ---------------------------------------------------------------

    pub fn services(&self) -> Vec<Service> {
        read(&self.inner.services).clone()
    }

    pub fn service(&self, id: &str) -> Option<Service> {
        read(&self.inner.services).iter().find(|s| s.id == id).cloned()
    }

    pub fn replace_services(&self, services: Vec<Service>) {
        *write(&self.inner.services) = services;
        self.bump();
    }

    pub fn reachability(&self, id: &str) -> Option<PingResult> {
        self.inner.reachability.get(id).map(|r| r.clone())
    }

    /// Last write wins per id; ids missing from `results` keep their old value.
    pub fn apply_reachability(&self, results: Vec<PingResult>) {
        if results.is_empty() {
            return;
        }
        for r in results {
            self.inner.reachability.insert(r.id.clone(), r);
        }
        self.bump();
    }

    // ---------------------------------------------------------------
    // process status
    // ---------------------------------------------------------------

    pub fn process_status(&self, id: &str) -> Option<ProcessStatus> {
        self.inner.processes.get(id).map(|s| *s)
    }

    /// Write path of the action tracker.
    pub(crate) fn record_process_status(&self, id: &str, status: ProcessStatus) {
        self.inner.processes.insert(id.to_string(), status);
        self.bump();
    }

    /// Taken by the bulk refresh before it probes `id`; hand it back to
    /// [`StateStore::refresh_process_status`] with the result.
    pub fn process_generation(&self, id: &str) -> u64 {
        self.inner
            .process_generations
            .get(id)
            .map(|g| *g)
            .unwrap_or_default()
    }

    fn advance_generation(&self, id: &str) {
        *self
            .inner
            .process_generations
            .entry(id.to_string())
            .or_default() += 1;
    }

    /// Write path of the bulk refresh. Refused while a launch/stop is being
    /// tracked for `id`, and when one registered or finished since
    /// `generation` was taken: the tracker owns the slot until it finishes
    /// and its last status is newer than anything the refresh probed before.
    pub fn refresh_process_status(&self, id: &str, generation: u64, status: ProcessStatus) -> bool {
        let key = PendingKey::new(id, ActionClass::Process);
        // The entry locks the pending shard; registering and finishing take
        // the same lock before advancing the generation.
        let entry = self.inner.pending.entry(key);
        if let Entry::Occupied(_) = entry {
            debug!("Skipping refresh of {} while an action is pending", id);
            return false;
        }
        if self.process_generation(id) != generation {
            debug!("Dropping stale refresh of {}", id);
            return false;
        }
        self.inner.processes.insert(id.to_string(), status);
        drop(entry);
        self.bump();
        true
    }

    // ---------------------------------------------------------------
    // pending actions + jobs (action tracker)
    // ---------------------------------------------------------------

    pub fn pending(&self, target_id: &str, class: ActionClass) -> Option<PendingAction> {
        self.inner
            .pending
            .get(&PendingKey::new(target_id, class))
            .map(|p| p.clone())
    }

    pub fn pending_actions(&self) -> Vec<PendingAction> {
        self.inner.pending.iter().map(|p| p.clone()).collect()
    }

    pub(crate) fn insert_pending(&self, action: PendingAction) {
        let key = action.key();
        let process = (key.class == ActionClass::Process).then(|| key.target_id.clone());
        let entry = self.inner.pending.entry(key);
        if let Some(id) = &process {
            self.advance_generation(id);
        }
        entry.insert(action);
        self.bump();
    }

    pub(crate) fn update_pending_attempts(&self, key: &PendingKey, instance: u64, attempts: u32) {
        let updated = match self.inner.pending.get_mut(key) {
            Some(mut p) if p.instance == instance => {
                p.attempts_used = attempts;
                true
            }
            _ => false,
        };
        if updated {
            self.bump();
        }
    }

    /// Removes the pending record only if it still belongs to `instance`.
    pub(crate) fn remove_pending(&self, key: &PendingKey, instance: u64) -> bool {
        let removed = match self.inner.pending.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().instance == instance => {
                if key.class == ActionClass::Process {
                    self.advance_generation(&key.target_id);
                }
                entry.remove();
                true
            }
            _ => false,
        };
        if removed {
            self.bump();
        }
        removed
    }

    pub fn job(&self, target_id: &str) -> Option<JobProgress> {
        self.inner.jobs.get(target_id).map(|j| j.clone())
    }

    pub(crate) fn record_job_progress(&self, target_id: &str, progress: JobProgress) {
        self.inner.jobs.insert(target_id.to_string(), progress);
        self.bump();
    }

    // ---------------------------------------------------------------
    // stream sessions
    // ---------------------------------------------------------------

    pub fn telemetry(&self) -> Option<SystemStats> {
        read(&self.inner.telemetry).clone()
    }

    /// Snapshots are total, so the slice is replaced rather than merged.
    pub(crate) fn replace_telemetry(&self, stats: SystemStats) {
        *write(&self.inner.telemetry) = Some(stats);
        self.bump();
    }

    pub fn connection(&self, channel: Channel) -> ConnectionStatus {
        self.inner
            .connections
            .get(&channel)
            .map(|s| *s)
            .unwrap_or_default()
    }

    pub(crate) fn set_connection(&self, channel: Channel, status: ConnectionStatus) {
        let previous = self.inner.connections.insert(channel, status);
        if previous != Some(status) {
            debug!("{} connection: {:?}", channel.as_str(), status);
            self.bump();
        }
    }

    pub fn transcript(&self) -> Vec<TranscriptLine> {
        read(&self.inner.transcript).clone()
    }

    pub fn transcript_len(&self) -> usize {
        read(&self.inner.transcript).len()
    }

    pub(crate) fn append_transcript(&self, line: TranscriptLine) {
        write(&self.inner.transcript).push(line);
        self.bump();
    }

    pub(crate) fn clear_transcript(&self) {
        let mut lines = write(&self.inner.transcript);
        if lines.is_empty() {
            return;
        }
        lines.clear();
        drop(lines);
        self.bump();
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let revision = self.revision();
        let snapshot = StoreSnapshot {
            revision,
            services: self.services(),
            reachability: collect(&self.inner.reachability),
            processes: collect(&self.inner.processes),
            pending: collect(&self.inner.pending),
            jobs: collect(&self.inner.jobs),
            telemetry: self.telemetry(),
            connections: collect(&self.inner.connections),
            transcript: self.transcript(),
        };
        if self.revision() != revision {
            warn!("Store changed while taking a snapshot; a newer revision will follow");
        }
        snapshot
    }
}

fn collect<K, V>(map: &DashMap<K, V>) -> HashMap<K, V>
where
    K: Eq + std::hash::Hash + Clone,
    V: Clone,
{
    map.iter()
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect()
}
