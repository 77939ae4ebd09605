use serde::{Deserialize, Serialize};

/// Request body for `/api/comfyui/workflow/execute`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobRequest {
    pub workflow: serde_json::Value,
}

/// Acknowledgement of a submitted job.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct JobSubmitted {
    #[serde(rename = "promptId", alias = "jobId")]
    pub job_id: String,
}

/// Latest status of a submitted job, as returned by the status endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct JobStatus {
    /// 0..=100
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, alias = "images")]
    pub outputs: Vec<JobOutput>,
}

impl JobStatus {
    pub fn progress(&self) -> u8 {
        self.progress.min(100)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobOutput {
    pub url: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub node_id: String,
}
