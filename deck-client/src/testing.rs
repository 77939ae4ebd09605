//! In-memory backend for unit tests.

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use deck_shared::{
    job::{JobStatus, JobSubmitted},
    service::{PingResult, ProcessStatus, Service},
};
use serde_json::Value;

use crate::server::Backend;

/// Replays scripted responses; the last one repeats once a script runs out.
#[derive(Default)]
pub struct FakeBackend {
    pub services: Mutex<Vec<Service>>,
    pub pings: Mutex<Vec<PingResult>>,
    pub statuses: Mutex<Vec<(String, ProcessStatus)>>,
    pub issue_error: Mutex<Option<String>>,
    /// Holds back the answer of the next process probe.
    pub next_probe_delay: Mutex<Option<Duration>>,
    process_script: Mutex<Script<ProcessStatus>>,
    job_script: Mutex<Script<JobStatus>>,
    launches: Mutex<Vec<String>>,
    stops: Mutex<Vec<String>>,
    jobs: Mutex<u32>,
}

struct Script<T> {
    queue: VecDeque<Result<T, String>>,
    last: Option<Result<T, String>>,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            last: None,
        }
    }
}

impl<T: Clone> Script<T> {
    fn next(&mut self) -> Result<T> {
        if let Some(r) = self.queue.pop_front() {
            self.last = Some(r);
        }
        match &self.last {
            Some(Ok(v)) => Ok(v.clone()),
            Some(Err(e)) => Err(anyhow!(e.clone())),
            None => Err(anyhow!("no scripted response")),
        }
    }
}

impl FakeBackend {
    pub fn script_process(&self, responses: Vec<Result<ProcessStatus, String>>) {
        self.process_script.lock().unwrap().queue = responses.into();
    }

    pub fn script_job(&self, responses: Vec<Result<JobStatus, String>>) {
        self.job_script.lock().unwrap().queue = responses.into();
    }

    pub fn launches(&self) -> Vec<String> {
        self.launches.lock().unwrap().clone()
    }

    pub fn stops(&self) -> Vec<String> {
        self.stops.lock().unwrap().clone()
    }

    pub fn submitted_jobs(&self) -> u32 {
        *self.jobs.lock().unwrap()
    }

    fn issue_result(&self) -> Result<()> {
        match self.issue_error.lock().unwrap().clone() {
            Some(e) => Err(anyhow!(e)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn list_services(&self) -> Result<Vec<Service>> {
        Ok(self.services.lock().unwrap().clone())
    }

    async fn ping_all(&self) -> Result<Vec<PingResult>> {
        Ok(self.pings.lock().unwrap().clone())
    }

    async fn issue_launch(&self, service_id: &str) -> Result<()> {
        self.launches.lock().unwrap().push(service_id.to_string());
        self.issue_result()
    }

    async fn issue_stop(&self, service_id: &str) -> Result<()> {
        self.stops.lock().unwrap().push(service_id.to_string());
        self.issue_result()
    }

    async fn probe_process_status(&self, service_id: &str) -> Result<ProcessStatus> {
        let fixed = self
            .statuses
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == service_id)
            .map(|(_, s)| *s);
        let result = match fixed {
            Some(status) => Ok(status),
            None => self.process_script.lock().unwrap().next(),
        };
        let delay = self.next_probe_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn issue_job(&self, _workflow: &Value) -> Result<JobSubmitted> {
        self.issue_result()?;
        let mut jobs = self.jobs.lock().unwrap();
        *jobs += 1;
        Ok(JobSubmitted {
            job_id: format!("job-{}", *jobs),
        })
    }

    async fn probe_job_status(&self, _job_id: &str) -> Result<JobStatus> {
        self.job_script.lock().unwrap().next()
    }
}

/// Virtual-time elapsed check; timer deadlines round up to the next
/// millisecond tick.
#[track_caller]
pub fn assert_elapsed(start: tokio::time::Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= expected && elapsed <= expected + Duration::from_millis(10),
        "elapsed {elapsed:?}, expected {expected:?}"
    );
}
