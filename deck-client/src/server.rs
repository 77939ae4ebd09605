use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use deck_shared::{
    ApiError,
    job::{JobRequest, JobStatus, JobSubmitted},
    service::{PingResult, ProcessStatus, Service},
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use crate::retry_async;

/// The dashboard backend's REST surface.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_services(&self) -> Result<Vec<Service>>;

    async fn ping_all(&self) -> Result<Vec<PingResult>>;

    async fn issue_launch(&self, service_id: &str) -> Result<()>;

    async fn issue_stop(&self, service_id: &str) -> Result<()>;

    async fn probe_process_status(&self, service_id: &str) -> Result<ProcessStatus>;

    async fn issue_job(&self, workflow: &Value) -> Result<JobSubmitted>;

    async fn probe_job_status(&self, job_id: &str) -> Result<JobStatus>;
}

pub struct ApiClient {
    base: String,
    client: Client,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Result<Self> {
        Ok(Self {
            base: api_url.trim_end_matches('/').to_string(),
            client: get_client(Duration::from_secs(10))?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let res = self.client.get(self.url(path)).send().await?;
        decode(check(res).await?).await
    }

    async fn post_empty(&self, path: &str) -> Result<()> {
        let res = self.client.post(self.url(path)).send().await?;
        check(res).await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn list_services(&self) -> Result<Vec<Service>> {
        retry_async!(3, 500, self.get_json::<Vec<Service>>("/api/services"))
            .context("Failed to list services")
    }

    async fn ping_all(&self) -> Result<Vec<PingResult>> {
        retry_async!(3, 500, self.get_json::<Vec<PingResult>>("/api/ping-all"))
            .context("Failed to check service reachability")
    }

    async fn issue_launch(&self, service_id: &str) -> Result<()> {
        self.post_empty(&format!("/api/services/{service_id}/launch"))
            .await
    }

    async fn issue_stop(&self, service_id: &str) -> Result<()> {
        self.post_empty(&format!("/api/services/{service_id}/stop"))
            .await
    }

    async fn probe_process_status(&self, service_id: &str) -> Result<ProcessStatus> {
        self.get_json(&format!("/api/services/{service_id}/process-status"))
            .await
    }

    async fn issue_job(&self, workflow: &Value) -> Result<JobSubmitted> {
        let body = JobRequest {
            workflow: workflow.clone(),
        };
        let res = self
            .client
            .post(self.url("/api/comfyui/workflow/execute"))
            .json(&body)
            .send()
            .await?;
        decode(check(res).await?).await
    }

    async fn probe_job_status(&self, job_id: &str) -> Result<JobStatus> {
        self.get_json(&format!("/api/comfyui/workflow/status/{job_id}"))
            .await
    }
}

/// Turns a non-2xx response into an error carrying the backend's message.
async fn check(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let text = res.text().await.unwrap_or_default();
    debug!("HTTP {}: {}", status, text);
    match serde_json::from_str::<ApiError>(&text) {
        Ok(body) if !body.error.is_empty() => Err(anyhow!(body.error)),
        _ => Err(anyhow!("HTTP {}", status.as_u16())),
    }
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T> {
    let text = res.text().await?;
    serde_json::from_str::<T>(&text).map_err(|err| {
        error!("Failed to decode response: {}\nRaw response: {}", err, text);
        anyhow!("Invalid response: {}", err)
    })
}

fn get_client(timeout: Duration) -> Result<Client> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(client)
}
