pub mod job;
pub mod metrics;
pub mod service;

use serde::{Deserialize, Serialize};

/// Error body returned by the backend on non-2xx responses.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ApiError {
    #[serde(default)]
    pub error: String,
}
