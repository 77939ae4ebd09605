use serde::{Deserialize, Serialize};

/// One host telemetry snapshot pushed over `/ws/monitor`.
///
/// Snapshots are total: each one replaces the previous one wholesale.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SystemStats {
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    #[serde(default)]
    pub gpu: GpuStats,
    #[serde(default)]
    pub network: NetworkStats,
    #[serde(default)]
    pub disks: Vec<DiskStats>,
    /// Unix seconds at collection time.
    #[serde(default)]
    pub time: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub usage: f64,
    #[serde(default)]
    pub core_usage: Vec<f64>,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub cores: u32,
    #[serde(default)]
    pub temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
    #[serde(default)]
    pub available: u64,
    pub used_percent: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GpuStats {
    pub available: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub usage: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    /// MB
    #[serde(default)]
    pub memory_used: Option<u64>,
    /// MB
    #[serde(default)]
    pub memory_total: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    /// Bytes per second.
    pub speed_sent: u64,
    /// Bytes per second.
    pub speed_recv: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiskStats {
    #[serde(default)]
    pub device: String,
    pub mount_point: String,
    pub used: u64,
    pub total: u64,
    #[serde(default)]
    pub free: u64,
    pub used_percent: f64,
    #[serde(default)]
    pub fs_type: String,
}
