use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use deck_shared::service::ProcessStatus;
use tracing::info;

use super::{ActionTracker, PollPolicy, TrackHandle, TrackedAction, Verdict};
use crate::{
    server::Backend,
    store::{ActionClass, ActionKind, StateStore},
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("{0} has no launch command or path configured")]
    NotLaunchable(String),
}

/// Launch or stop of a single service, confirmed through its process status.
pub struct ProcessAction {
    backend: Arc<dyn Backend>,
    service_id: String,
    kind: ActionKind,
}

impl ProcessAction {
    pub fn launch(backend: Arc<dyn Backend>, service_id: impl Into<String>) -> Self {
        Self {
            backend,
            service_id: service_id.into(),
            kind: ActionKind::Launch,
        }
    }

    pub fn stop(backend: Arc<dyn Backend>, service_id: impl Into<String>) -> Self {
        Self {
            backend,
            service_id: service_id.into(),
            kind: ActionKind::Stop,
        }
    }
}

#[async_trait]
impl TrackedAction for ProcessAction {
    type Status = ProcessStatus;

    fn target_id(&self) -> &str {
        &self.service_id
    }

    fn kind(&self) -> ActionKind {
        self.kind
    }

    async fn issue(&mut self) -> Result<()> {
        match self.kind {
            ActionKind::Stop => self.backend.issue_stop(&self.service_id).await,
            _ => self.backend.issue_launch(&self.service_id).await,
        }
    }

    async fn probe(&self) -> Result<ProcessStatus> {
        self.backend.probe_process_status(&self.service_id).await
    }

    fn evaluate(&self, status: &ProcessStatus) -> Verdict {
        let confirmed = match self.kind {
            ActionKind::Stop => !status.running,
            _ => status.running,
        };
        if confirmed {
            Verdict::Done
        } else {
            Verdict::Pending
        }
    }

    fn record(&self, store: &StateStore, status: &ProcessStatus) {
        store.record_process_status(&self.service_id, *status);
    }
}

/// Launch/stop entry point used by the CLI and dashboard.
#[derive(Clone)]
pub struct ServiceControl {
    backend: Arc<dyn Backend>,
    tracker: ActionTracker,
    policy: PollPolicy,
}

impl ServiceControl {
    pub fn new(backend: Arc<dyn Backend>, tracker: ActionTracker, policy: PollPolicy) -> Self {
        Self {
            backend,
            tracker,
            policy,
        }
    }

    /// Services without a launch command or path cannot be controlled.
    fn guard(&self, service_id: &str) -> Result<(), ControlError> {
        let service = self
            .tracker
            .store()
            .service(service_id)
            .ok_or_else(|| ControlError::UnknownService(service_id.to_string()))?;
        if !service.is_launchable() {
            return Err(ControlError::NotLaunchable(service.name));
        }
        Ok(())
    }

    pub fn launch(&self, service_id: &str) -> Result<TrackHandle, ControlError> {
        self.guard(service_id)?;
        info!("Launching {}", service_id);
        Ok(self.tracker.track(
            ProcessAction::launch(self.backend.clone(), service_id),
            self.policy,
        ))
    }

    pub fn stop(&self, service_id: &str) -> Result<TrackHandle, ControlError> {
        self.guard(service_id)?;
        info!("Stopping {}", service_id);
        Ok(self.tracker.track(
            ProcessAction::stop(self.backend.clone(), service_id),
            self.policy,
        ))
    }

    pub fn cancel(&self, service_id: &str) -> bool {
        self.tracker.cancel(service_id, ActionClass::Process)
    }

    pub fn tracker(&self) -> &ActionTracker {
        &self.tracker
    }
}
