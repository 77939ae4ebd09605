use serde::{Deserialize, Serialize};

/// A dashboard service card as stored by the backend.
///
/// Empty strings and a zero port are the backend's way of saying "not set";
/// use the accessor methods rather than the raw fields.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub enabled: bool,
    /// Executable path, kept for older service definitions.
    #[serde(default)]
    pub launch_path: String,
    #[serde(default)]
    pub launch_command: String,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Service {
    /// Port of the network endpoint, `None` for local-only launch targets.
    pub fn endpoint_port(&self) -> Option<u16> {
        (self.port > 0).then_some(self.port)
    }

    /// Command used to launch the service, falling back to the launch path.
    pub fn launch_target(&self) -> Option<&str> {
        [self.launch_command.as_str(), self.launch_path.as_str()]
            .into_iter()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    pub fn is_launchable(&self) -> bool {
        self.launch_target().is_some()
    }

    /// Enabled and reachable over the network.
    pub fn has_link(&self) -> bool {
        self.enabled && self.endpoint_port().is_some()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReachabilityStatus {
    Ok,
    Slow,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Result of one reachability check, as returned by `/api/ping-all`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PingResult {
    pub id: String,
    #[serde(default)]
    pub status: ReachabilityStatus,
    /// Milliseconds.
    #[serde(default)]
    pub latency: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PingResult {
    /// Latency is only meaningful for `ok` and `slow` results.
    pub fn latency_ms(&self) -> Option<u64> {
        match self.status {
            ReachabilityStatus::Ok | ReachabilityStatus::Slow if self.latency > 0 => {
                Some(self.latency)
            }
            _ => None,
        }
    }
}

/// Process status of a launchable service.
///
/// The backend reports `pid: 0` when nothing is running.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStatus {
    pub running: bool,
    #[serde(default)]
    pub pid: i32,
}

impl ProcessStatus {
    pub fn running(pid: i32) -> Self {
        Self { running: true, pid }
    }

    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn pid(&self) -> Option<u32> {
        if self.running && self.pid > 0 {
            Some(self.pid as u32)
        } else {
            None
        }
    }
}
