use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use deck_shared::job::JobStatus;
use serde_json::Value;
use tracing::info;

use super::{ActionTracker, PollPolicy, TrackHandle, TrackedAction, Verdict};
use crate::{
    server::Backend,
    store::{ActionClass, ActionKind, JobProgress, StateStore},
};

/// Submission of a workflow job, confirmed through the job status endpoint.
pub struct JobAction {
    backend: Arc<dyn Backend>,
    target_id: String,
    workflow: Value,
    job_id: Option<String>,
}

impl JobAction {
    pub fn new(backend: Arc<dyn Backend>, target_id: impl Into<String>, workflow: Value) -> Self {
        Self {
            backend,
            target_id: target_id.into(),
            workflow,
            job_id: None,
        }
    }
}

#[async_trait]
impl TrackedAction for JobAction {
    type Status = JobStatus;

    fn target_id(&self) -> &str {
        &self.target_id
    }

    fn kind(&self) -> ActionKind {
        ActionKind::JobExecute
    }

    async fn issue(&mut self) -> Result<()> {
        let submitted = self.backend.issue_job(&self.workflow).await?;
        info!("{}: submitted as job {}", self.target_id, submitted.job_id);
        self.job_id = Some(submitted.job_id);
        Ok(())
    }

    async fn probe(&self) -> Result<JobStatus> {
        let job_id = self
            .job_id
            .as_deref()
            .ok_or_else(|| anyhow!("job was never submitted"))?;
        self.backend.probe_job_status(job_id).await
    }

    fn evaluate(&self, status: &JobStatus) -> Verdict {
        if status.completed {
            Verdict::Done
        } else if status.failed {
            let reason = status
                .error
                .clone()
                .or_else(|| status.message.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            Verdict::Rejected(reason)
        } else {
            Verdict::Pending
        }
    }

    fn record(&self, store: &StateStore, status: &JobStatus) {
        store.record_job_progress(
            &self.target_id,
            JobProgress {
                job_id: self.job_id.clone(),
                status: status.clone(),
            },
        );
    }
}

#[derive(Clone)]
pub struct JobRunner {
    backend: Arc<dyn Backend>,
    tracker: ActionTracker,
    policy: PollPolicy,
}

impl JobRunner {
    pub fn new(backend: Arc<dyn Backend>, tracker: ActionTracker, policy: PollPolicy) -> Self {
        Self {
            backend,
            tracker,
            policy,
        }
    }

    /// Submits `workflow` and tracks it under `target_id`. A second submit
    /// for the same target while one is running joins the running job.
    pub fn execute(&self, target_id: &str, workflow: Value) -> TrackHandle {
        self.tracker.track(
            JobAction::new(self.backend.clone(), target_id, workflow),
            self.policy,
        )
    }

    pub fn cancel(&self, target_id: &str) -> bool {
        self.tracker.cancel(target_id, ActionClass::Job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use crate::testing::assert_elapsed;
    use crate::tracker::{Outcome, TrackError};
    use serde_json::json;
    use tokio::time::Instant;
    use std::time::Duration;

    fn status(progress: u8) -> JobStatus {
        JobStatus {
            progress,
            ..Default::default()
        }
    }

    fn runner(backend: &Arc<FakeBackend>) -> (StateStore, JobRunner) {
        let store = StateStore::new();
        let tracker = ActionTracker::new(store.clone());
        (store.clone(), JobRunner::new(backend.clone(), tracker, PollPolicy::job()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_progress_recorded_until_complete() {
        let backend = Arc::new(FakeBackend::default());
        backend.script_job(vec![
            Ok(status(10)),
            Err("bad gateway".to_string()),
            Ok(status(60)),
            Ok(JobStatus {
                progress: 100,
                completed: true,
                ..Default::default()
            }),
        ]);
        let (store, runner) = runner(&backend);

        let start = Instant::now();
        let mut handle = runner.execute("portrait", json!({"1": {"class_type": "KSampler"}}));
        assert_eq!(handle.outcome().await, Outcome::Succeeded);

        // 1s, 1s, then 2s after the failed probe, then 1s.
        assert_elapsed(start, Duration::from_secs(5));
        let progress = store.job("portrait").unwrap();
        assert_eq!(progress.job_id.as_deref(), Some("job-1"));
        assert!(progress.status.completed);
        assert_eq!(backend.submitted_jobs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_rejected() {
        let backend = Arc::new(FakeBackend::default());
        backend.script_job(vec![Ok(JobStatus {
            failed: true,
            error: Some("out of memory".to_string()),
            ..Default::default()
        })]);
        let (store, runner) = runner(&backend);

        let mut handle = runner.execute("portrait", json!({}));
        let outcome = handle.outcome().await;
        assert_eq!(
            outcome,
            Outcome::Failed(TrackError::Rejected("out of memory".to_string()))
        );
        assert!(store.job("portrait").unwrap().status.failed);
        assert!(store.pending("portrait", ActionClass::Job).is_none());
    }

    #[test]
    fn test_completed_wins_over_failed() {
        let action = JobAction::new(Arc::new(FakeBackend::default()), "portrait", json!({}));
        let both = JobStatus {
            completed: true,
            failed: true,
            error: Some("late warning".to_string()),
            ..Default::default()
        };
        assert_eq!(action.evaluate(&both), Verdict::Done);
        assert_eq!(action.evaluate(&status(40)), Verdict::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submit_joins_running_job() {
        let backend = Arc::new(FakeBackend::default());
        backend.script_job(vec![Ok(status(5)), Ok(status(100))]);
        let (_store, runner) = runner(&backend);

        let _first = runner.execute("portrait", json!({}));
        let second = runner.execute("portrait", json!({}));
        assert!(second.joined_existing());

        assert!(runner.cancel("portrait"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.submitted_jobs(), 1);
    }
}
