//! Turns a fire-and-forget remote command into a confirmed, bounded and
//! cancellable outcome by polling a status probe.
//!
//! One tracker is live per `(target, kind class)`. Asking again for the same
//! kind joins the live tracker's outcome; asking for a different kind of the
//! same class supersedes it.

pub mod job;
pub mod process;

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    store::{ActionClass, ActionKind, PendingAction, PendingKey, StateStore},
    util::gate::WriteGate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub budget: u32,
    pub interval: Duration,
    /// Delay before the next probe when the previous probe errored.
    pub retry_after_error: Duration,
}

impl PollPolicy {
    /// Launch/stop confirmation.
    pub fn process() -> Self {
        Self {
            budget: 180,
            interval: Duration::from_millis(1000),
            retry_after_error: Duration::from_millis(1000),
        }
    }

    /// Job execution status.
    pub fn job() -> Self {
        Self {
            budget: 120,
            interval: Duration::from_millis(1000),
            retry_after_error: Duration::from_millis(2000),
        }
    }
}

/// What a probed status means for the tracked action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pending,
    Done,
    /// The remote side reported that the action failed.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackError {
    #[error("{0}")]
    IssueFailed(String),
    #[error("status could not be read after {attempts} attempts")]
    ProbeExhausted { attempts: u32 },
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// The budget ran out without confirmation; the remote operation may
    /// still be in progress.
    TimedOut { attempts: u32 },
    Failed(TrackError),
    Cancelled,
}

impl Outcome {
    pub fn severity(&self) -> Severity {
        match self {
            Outcome::Succeeded => Severity::Success,
            Outcome::TimedOut { .. } | Outcome::Cancelled => Severity::Warning,
            Outcome::Failed(_) => Severity::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::TimedOut { attempts } => {
                write!(f, "not confirmed after {attempts} checks")
            }
            Outcome::Failed(e) => write!(f, "failed: {e}"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A remote command plus the probe that confirms it.
#[async_trait]
pub trait TrackedAction: Send + Sync + 'static {
    type Status: Clone + Send + Sync + 'static;

    fn target_id(&self) -> &str;

    fn kind(&self) -> ActionKind;

    /// Sends the command. An error ends tracking without any polling.
    async fn issue(&mut self) -> anyhow::Result<()>;

    /// Reads the current remote status. Errors are inconclusive.
    async fn probe(&self) -> anyhow::Result<Self::Status>;

    fn evaluate(&self, status: &Self::Status) -> Verdict;

    /// Writes an observed status into the store.
    fn record(&self, store: &StateStore, status: &Self::Status);
}

struct LiveAction {
    kind: ActionKind,
    instance: u64,
    gate: WriteGate,
    outcome: watch::Receiver<Option<Outcome>>,
}

/// Caller side of a tracked action.
#[derive(Clone)]
pub struct TrackHandle {
    key: PendingKey,
    kind: ActionKind,
    instance: u64,
    joined: bool,
    gate: WriteGate,
    store: StateStore,
    outcome: watch::Receiver<Option<Outcome>>,
}

impl fmt::Debug for TrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackHandle")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("instance", &self.instance)
            .field("joined", &self.joined)
            .finish_non_exhaustive()
    }
}

impl TrackHandle {
    pub fn target_id(&self) -> &str {
        &self.key.target_id
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// True when this handle joined an already running tracker.
    pub fn joined_existing(&self) -> bool {
        self.joined
    }

    pub fn cancel(&self) {
        let (store, key, instance) = (&self.store, &self.key, self.instance);
        if self.gate.close(|| {
            store.remove_pending(key, instance);
        }) {
            info!("{} {}: cancelled", self.kind.as_str(), key.target_id);
        }
    }

    pub fn try_outcome(&self) -> Option<Outcome> {
        self.outcome.borrow().clone()
    }

    pub async fn outcome(&mut self) -> Outcome {
        loop {
            if let Some(outcome) = self.outcome.borrow_and_update().clone() {
                return outcome;
            }
            if self.outcome.changed().await.is_err() {
                return self.outcome.borrow().clone().unwrap_or(Outcome::Cancelled);
            }
        }
    }
}

#[derive(Clone)]
pub struct ActionTracker {
    store: StateStore,
    live: Arc<DashMap<PendingKey, LiveAction>>,
    next_instance: Arc<AtomicU64>,
}

impl ActionTracker {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            live: Arc::new(DashMap::new()),
            next_instance: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn is_pending(&self, target_id: &str, class: ActionClass) -> bool {
        self.live
            .get(&PendingKey::new(target_id, class))
            .is_some_and(|live| !live.gate.is_closed())
    }

    pub fn track<A: TrackedAction>(&self, action: A, policy: PollPolicy) -> TrackHandle {
        let kind = action.kind();
        let key = PendingKey::new(action.target_id(), kind.class());

        // The entry guard makes check-and-register atomic per key.
        let entry = self.live.entry(key.clone());
        if let Entry::Occupied(live) = &entry {
            let live = live.get();
            if live.kind == kind && !live.gate.is_closed() {
                debug!("{} {}: joining live tracker", kind.as_str(), key.target_id);
                return TrackHandle {
                    key,
                    kind,
                    instance: live.instance,
                    joined: true,
                    gate: live.gate.clone(),
                    store: self.store.clone(),
                    outcome: live.outcome.clone(),
                };
            }
        }

        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let gate = WriteGate::new();
        let (tx, rx) = watch::channel(None);
        let live = LiveAction {
            kind,
            instance,
            gate: gate.clone(),
            outcome: rx.clone(),
        };

        match entry {
            Entry::Occupied(mut occupied) => {
                let old = occupied.insert(live);
                let store = &self.store;
                if old.gate.close(|| {
                    store.remove_pending(&key, old.instance);
                }) {
                    info!(
                        "{} {}: superseded by {}",
                        old.kind.as_str(),
                        key.target_id,
                        kind.as_str()
                    );
                }
                self.register(&key, kind, instance, policy);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(live);
                self.register(&key, kind, instance, policy);
            }
        }

        let run = Run {
            store: self.store.clone(),
            live: self.live.clone(),
            key: key.clone(),
            instance,
            gate: gate.clone(),
            tx,
        };
        tokio::spawn(run.drive(action, policy));

        TrackHandle {
            key,
            kind,
            instance,
            joined: false,
            gate,
            store: self.store.clone(),
            outcome: rx,
        }
    }

    fn register(&self, key: &PendingKey, kind: ActionKind, instance: u64, policy: PollPolicy) {
        self.store.insert_pending(PendingAction {
            target_id: key.target_id.clone(),
            kind,
            started_at: Utc::now(),
            attempts_used: 0,
            attempt_budget: policy.budget,
            poll_interval: policy.interval,
            instance,
        });
    }

    pub fn cancel(&self, target_id: &str, class: ActionClass) -> bool {
        let key = PendingKey::new(target_id, class);
        let Some((_, live)) = self.live.remove(&key) else {
            return false;
        };
        let store = &self.store;
        let closed = live.gate.close(|| {
            store.remove_pending(&key, live.instance);
        });
        if closed {
            info!("{} {}: cancelled", live.kind.as_str(), target_id);
        }
        closed
    }

    /// Stops every live tracker, e.g. when the owning view goes away.
    pub fn cancel_all(&self) {
        let keys: Vec<PendingKey> = self.live.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.cancel(&key.target_id, key.class);
        }
    }
}

struct Run {
    store: StateStore,
    live: Arc<DashMap<PendingKey, LiveAction>>,
    key: PendingKey,
    instance: u64,
    gate: WriteGate,
    tx: watch::Sender<Option<Outcome>>,
}

impl Run {
    async fn drive<A: TrackedAction>(self, mut action: A, policy: PollPolicy) {
        let outcome = self.poll(&mut action, policy).await;
        self.finish(action.kind(), outcome);
    }

    async fn poll<A: TrackedAction>(&self, action: &mut A, policy: PollPolicy) -> Outcome {
        let kind = action.kind().as_str();
        let target = self.key.target_id.as_str();

        // An issue already on the wire is allowed to finish.
        if let Err(e) = action.issue().await {
            if self.gate.is_closed() {
                return Outcome::Cancelled;
            }
            return Outcome::Failed(TrackError::IssueFailed(e.to_string()));
        }
        debug!("{kind} {target}: issued, polling every {:?}", policy.interval);

        let mut attempts = 0u32;
        let mut delay = policy.interval;

        loop {
            tokio::select! {
                biased;
                _ = self.gate.closed() => return Outcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            attempts += 1;
            if self
                .gate
                .write(|| {
                    self.store
                        .update_pending_attempts(&self.key, self.instance, attempts)
                })
                .is_none()
            {
                return Outcome::Cancelled;
            }

            let probe_failed = match action.probe().await {
                Ok(status) => {
                    if self.gate.write(|| action.record(&self.store, &status)).is_none() {
                        // Cancelled while the probe was in flight: result discarded.
                        return Outcome::Cancelled;
                    }
                    match action.evaluate(&status) {
                        Verdict::Done => {
                            debug!("{kind} {target}: confirmed on attempt {attempts}");
                            return Outcome::Succeeded;
                        }
                        Verdict::Rejected(reason) => {
                            return Outcome::Failed(TrackError::Rejected(reason));
                        }
                        Verdict::Pending => delay = policy.interval,
                    }
                    false
                }
                Err(e) => {
                    if self.gate.is_closed() {
                        return Outcome::Cancelled;
                    }
                    warn!("{kind} {target}: status probe {attempts} failed: {e}");
                    delay = policy.retry_after_error;
                    true
                }
            };

            if attempts >= policy.budget {
                return if probe_failed {
                    Outcome::Failed(TrackError::ProbeExhausted { attempts })
                } else {
                    Outcome::TimedOut { attempts }
                };
            }
        }
    }

    fn finish(self, kind: ActionKind, outcome: Outcome) {
        self.live
            .remove_if(&self.key, |_, live| live.instance == self.instance);

        let outcome = match outcome {
            Outcome::Cancelled => Outcome::Cancelled,
            other => {
                let cleared = self
                    .gate
                    .write(|| self.store.remove_pending(&self.key, self.instance));
                if cleared.is_some() {
                    other
                } else {
                    Outcome::Cancelled
                }
            }
        };

        match outcome.severity() {
            Severity::Success => info!("{} {}: {}", kind.as_str(), self.key.target_id, outcome),
            _ => warn!("{} {}: {}", kind.as_str(), self.key.target_id, outcome),
        }

        let _ = self.tx.send(Some(outcome));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::anyhow;
    use deck_shared::service::ProcessStatus;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use crate::testing::assert_elapsed;
    use std::sync::atomic::AtomicU32;
    use tokio::time::Instant;

    /// Scripted launch/stop action. Once the script runs out the last
    /// response repeats.
    pub(crate) struct ScriptedAction {
        pub target: String,
        pub kind: ActionKind,
        pub issue_result: Result<(), String>,
        pub script: Mutex<VecDeque<Result<ProcessStatus, String>>>,
        pub last: Mutex<Option<Result<ProcessStatus, String>>>,
        pub probe_delay: Duration,
        pub issued: Arc<AtomicU32>,
        pub probed: Arc<AtomicU32>,
    }

    impl ScriptedAction {
        pub(crate) fn launch(target: &str, script: Vec<Result<ProcessStatus, String>>) -> Self {
            Self {
                target: target.to_string(),
                kind: ActionKind::Launch,
                issue_result: Ok(()),
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                probe_delay: Duration::ZERO,
                issued: Arc::new(AtomicU32::new(0)),
                probed: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl TrackedAction for ScriptedAction {
        type Status = ProcessStatus;

        fn target_id(&self) -> &str {
            &self.target
        }

        fn kind(&self) -> ActionKind {
            self.kind
        }

        async fn issue(&mut self) -> anyhow::Result<()> {
            self.issued.fetch_add(1, Ordering::SeqCst);
            self.issue_result.clone().map_err(|e| anyhow!(e))
        }

        async fn probe(&self) -> anyhow::Result<ProcessStatus> {
            self.probed.fetch_add(1, Ordering::SeqCst);
            if !self.probe_delay.is_zero() {
                tokio::time::sleep(self.probe_delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            let response = match next {
                Some(r) => {
                    *self.last.lock().unwrap() = Some(r.clone());
                    r
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or(Ok(ProcessStatus::stopped())),
            };
            response.map_err(|e| anyhow!(e))
        }

        fn evaluate(&self, status: &ProcessStatus) -> Verdict {
            let done = match self.kind {
                ActionKind::Stop => !status.running,
                _ => status.running,
            };
            if done { Verdict::Done } else { Verdict::Pending }
        }

        fn record(&self, store: &StateStore, status: &ProcessStatus) {
            store.record_process_status(&self.target, *status);
        }
    }

    fn stopped() -> Result<ProcessStatus, String> {
        Ok(ProcessStatus::stopped())
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_confirmed_on_fourth_probe() {
        let store = StateStore::new();
        let tracker = ActionTracker::new(store.clone());
        let action = ScriptedAction::launch(
            "svc1",
            vec![stopped(), stopped(), stopped(), Ok(ProcessStatus::running(4242))],
        );
        let probed = action.probed.clone();

        let start = Instant::now();
        let mut handle = tracker.track(action, PollPolicy::process());
        assert!(store.pending("svc1", ActionClass::Process).is_some());

        assert_eq!(handle.outcome().await, Outcome::Succeeded);
        assert_eq!(probed.load(Ordering::SeqCst), 4);
        assert_elapsed(start, Duration::from_secs(4));
        assert_eq!(store.process_status("svc1"), Some(ProcessStatus::running(4242)));
        assert!(store.pending("svc1", ActionClass::Process).is_none());
        assert!(!tracker.is_pending("svc1", ActionClass::Process));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_never_confirmed() {
        let store = StateStore::new();
        let tracker = ActionTracker::new(store.clone());
        let action = ScriptedAction::launch("svc1", vec![stopped()]);
        let probed = action.probed.clone();

        let start = Instant::now();
        let mut handle = tracker.track(action, PollPolicy::process());

        assert_eq!(handle.outcome().await, Outcome::TimedOut { attempts: 180 });
        assert_eq!(probed.load(Ordering::SeqCst), 180);
        assert_elapsed(start, Duration::from_secs(180));
        assert_eq!(store.process_status("svc1"), Some(ProcessStatus::stopped()));
        assert_eq!(handle.try_outcome().unwrap().severity(), Severity::Warning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_failure_skips_polling() {
        let store = StateStore::new();
        let tracker = ActionTracker::new(store.clone());
        let mut action = ScriptedAction::launch("svc1", vec![]);
        action.issue_result = Err("port in use".to_string());
        let probed = action.probed.clone();

        let mut handle = tracker.track(action, PollPolicy::process());

        assert_eq!(
            handle.outcome().await,
            Outcome::Failed(TrackError::IssueFailed("port in use".to_string()))
        );
        assert_eq!(probed.load(Ordering::SeqCst), 0);
        assert_eq!(store.process_status("svc1"), None);
        assert!(store.pending("svc1", ActionClass::Process).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_track_joins_live_tracker() {
        let store = StateStore::new();
        let tracker = ActionTracker::new(store.clone());
        let first = ScriptedAction::launch("svc1", vec![stopped(), Ok(ProcessStatus::running(1))]);
        let issued = first.issued.clone();
        let probed = first.probed.clone();

        let mut a = tracker.track(first, PollPolicy::process());
        let second = ScriptedAction::launch("svc1", vec![Ok(ProcessStatus::running(2))]);
        let second_issued = second.issued.clone();
        let mut b = tracker.track(second, PollPolicy::process());

        assert!(!a.joined_existing());
        assert!(b.joined_existing());
        assert_eq!(a.outcome().await, Outcome::Succeeded);
        assert_eq!(b.outcome().await, Outcome::Succeeded);
        assert_eq!(issued.load(Ordering::SeqCst), 1);
        assert_eq!(second_issued.load(Ordering::SeqCst), 0);
        assert_eq!(probed.load(Ordering::SeqCst), 2);
        assert_eq!(store.process_status("svc1"), Some(ProcessStatus::running(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_store_writes_after_cancel() {
        let store = StateStore::new();
        let tracker = ActionTracker::new(store.clone());
        let mut action = ScriptedAction::launch("svc1", vec![Ok(ProcessStatus::running(9))]);
        // First probe starts at 1000ms and resolves at 1500ms.
        action.probe_delay = Duration::from_millis(500);
        let probed = action.probed.clone();

        let mut handle = tracker.track(action, PollPolicy::process());
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(probed.load(Ordering::SeqCst), 1);

        handle.cancel();
        let revision = store.revision();
        assert!(store.pending("svc1", ActionClass::Process).is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.outcome().await, Outcome::Cancelled);
        assert_eq!(store.revision(), revision);
        assert_eq!(store.process_status("svc1"), None);
        assert_eq!(probed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_supersedes_pending_launch() {
        let store = StateStore::new();
        let tracker = ActionTracker::new(store.clone());
        let launch = ScriptedAction::launch("svc1", vec![stopped()]);
        let launch_probed = launch.probed.clone();
        let mut launch_handle = tracker.track(launch, PollPolicy::process());

        tokio::time::sleep(Duration::from_millis(2500)).await;

        let mut stop = ScriptedAction::launch("svc1", vec![stopped()]);
        stop.kind = ActionKind::Stop;
        let mut stop_handle = tracker.track(stop, PollPolicy::process());

        assert_eq!(launch_handle.outcome().await, Outcome::Cancelled);
        assert_eq!(stop_handle.outcome().await, Outcome::Succeeded);
        assert_eq!(launch_probed.load(Ordering::SeqCst), 2);
        assert!(store.pending("svc1", ActionClass::Process).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_are_inconclusive() {
        let store = StateStore::new();
        let tracker = ActionTracker::new(store.clone());
        let action = ScriptedAction::launch(
            "svc1",
            vec![
                Err("connection refused".to_string()),
                Err("connection refused".to_string()),
                Ok(ProcessStatus::running(3)),
            ],
        );
        let policy = PollPolicy {
            budget: 10,
            interval: Duration::from_millis(1000),
            retry_after_error: Duration::from_millis(2000),
        };

        let start = Instant::now();
        let mut handle = tracker.track(action, policy);

        assert_eq!(handle.outcome().await, Outcome::Succeeded);
        // 1s first tick, then two 2s error backoffs.
        assert_elapsed(start, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted_on_probe_errors() {
        let store = StateStore::new();
        let tracker = ActionTracker::new(store.clone());
        let action = ScriptedAction::launch("svc1", vec![Err("unreachable".to_string())]);
        let policy = PollPolicy {
            budget: 3,
            ..PollPolicy::job()
        };

        let start = Instant::now();
        let mut handle = tracker.track(action, policy);

        assert_eq!(
            handle.outcome().await,
            Outcome::Failed(TrackError::ProbeExhausted { attempts: 3 })
        );
        // Bounded: 1s + 2s + 2s.
        assert_elapsed(start, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_on_teardown() {
        let store = StateStore::new();
        let tracker = ActionTracker::new(store.clone());
        let mut a = tracker.track(ScriptedAction::launch("a", vec![stopped()]), PollPolicy::process());
        let mut b = tracker.track(ScriptedAction::launch("b", vec![stopped()]), PollPolicy::process());

        tracker.cancel_all();

        assert_eq!(a.outcome().await, Outcome::Cancelled);
        assert_eq!(b.outcome().await, Outcome::Cancelled);
        assert!(store.pending_actions().is_empty());
        assert!(!tracker.cancel("a", ActionClass::Process));
    }
}
