use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{info, warn};

use crate::tracker::PollPolicy;

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_server_ip() -> String {
    "localhost".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_telemetry_reconnect_ms() -> u64 {
    3000
}

fn default_ping_refresh_secs() -> u64 {
    30
}

fn default_process_refresh_secs() -> u64 {
    5
}

/// Poll loop parameters as persisted in the config file.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub budget: u32,
    pub interval_ms: u64,
    /// Delay before the next probe after a probe failed to reach the backend.
    #[serde(default)]
    pub retry_after_error_ms: Option<u64>,
}

impl PollConfig {
    fn launch() -> Self {
        let p = PollPolicy::process();
        Self {
            budget: p.budget,
            interval_ms: p.interval.as_millis() as u64,
            retry_after_error_ms: None,
        }
    }

    fn job() -> Self {
        let p = PollPolicy::job();
        Self {
            budget: p.budget,
            interval_ms: p.interval.as_millis() as u64,
            retry_after_error_ms: Some(p.retry_after_error.as_millis() as u64),
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.budget == 0 {
            bail!("{name}.budget must be at least 1");
        }
        if self.interval_ms == 0 {
            bail!("{name}.interval_ms must be at least 1");
        }
        if self.retry_after_error_ms == Some(0) {
            bail!("{name}.retry_after_error_ms must be at least 1");
        }
        Ok(())
    }

    pub fn policy(&self) -> PollPolicy {
        let interval = Duration::from_millis(self.interval_ms);
        PollPolicy {
            budget: self.budget,
            interval,
            retry_after_error: self
                .retry_after_error_ms
                .map(Duration::from_millis)
                .unwrap_or(interval),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Host used when building links to service ports.
    #[serde(default = "default_server_ip")]
    pub server_ip: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "PollConfig::launch")]
    pub launch_poll: PollConfig,
    #[serde(default = "PollConfig::job")]
    pub job_poll: PollConfig,
    #[serde(default = "default_telemetry_reconnect_ms")]
    pub telemetry_reconnect_ms: u64,
    #[serde(default = "default_ping_refresh_secs")]
    pub ping_refresh_secs: u64,
    #[serde(default = "default_process_refresh_secs")]
    pub process_refresh_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            server_ip: default_server_ip(),
            log_level: default_log_level(),
            launch_poll: PollConfig::launch(),
            job_poll: PollConfig::job(),
            telemetry_reconnect_ms: default_telemetry_reconnect_ms(),
            ping_refresh_secs: default_ping_refresh_secs(),
            process_refresh_secs: default_process_refresh_secs(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .validate()
                .with_context(|| format!("Invalid config file {}", config_path.display()))?;
            Ok(config)
        } else {
            warn!("Config file not found, using defaults");
            let config = Self::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    /// Zero intervals would turn the poll and refresh loops into busy loops.
    pub fn validate(&self) -> Result<()> {
        self.launch_poll.validate("launch_poll")?;
        self.job_poll.validate("job_poll")?;
        for (name, value) in [
            ("telemetry_reconnect_ms", self.telemetry_reconnect_ms),
            ("ping_refresh_secs", self.ping_refresh_secs),
            ("process_refresh_secs", self.process_refresh_secs),
        ] {
            if value == 0 {
                bail!("{name} must be at least 1");
            }
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        let config_dir = config_path
            .parent()
            .context("Failed to get config directory")?;

        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        info!("Config saved to: {:?}", config_path);
        Ok(())
    }

    pub fn config_file_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("deck").join("config.json"))
    }

    pub fn get_server_url(&self) -> String {
        self.api_url.trim_end_matches('/').to_string()
    }

    /// Websocket URL for a backend stream path such as `/ws/monitor`.
    pub fn get_ws_url(&self, path: &str) -> Result<String> {
        let base = self.get_server_url();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(anyhow!("API URL must start with http:// or https://: {base}"));
        };
        Ok(format!("{ws_base}{path}"))
    }

    pub fn telemetry_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.telemetry_reconnect_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.launch_poll.budget, 180);
        assert_eq!(config.job_poll.budget, 120);
        assert_eq!(config.telemetry_reconnect_ms, 3000);
    }

    #[test]
    fn test_policies_from_config() {
        let config = Config::default();
        let launch = config.launch_poll.policy();
        assert_eq!(launch.interval, Duration::from_millis(1000));
        assert_eq!(launch.retry_after_error, Duration::from_millis(1000));

        let job = config.job_poll.policy();
        assert_eq!(job.interval, Duration::from_millis(1000));
        assert_eq!(job.retry_after_error, Duration::from_millis(2000));
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let config: Config = serde_json::from_str(r#"{"api_url":"https://home.lan"}"#).unwrap();
        assert_eq!(config.api_url, "https://home.lan");
        assert_eq!(config.server_ip, "localhost");
        assert_eq!(config.process_refresh_secs, 5);
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        assert!(Config::default().validate().is_ok());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"ping_refresh_secs": 0}"#).unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("ping_refresh_secs must be at least 1"));

        std::fs::write(&path, r#"{"launch_poll": {"budget": 180, "interval_ms": 0}}"#).unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("launch_poll.interval_ms"));

        let mut config = Config::default();
        config.job_poll.retry_after_error_ms = Some(0);
        assert!(config.validate().is_err());
        config.job_poll.retry_after_error_ms = None;
        config.process_refresh_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ws_url_derivation() {
        let mut config = Config::default();
        config.api_url = "https://home.lan:8443/".to_string();
        assert_eq!(
            config.get_ws_url("/ws/monitor").unwrap(),
            "wss://home.lan:8443/ws/monitor"
        );

        config.api_url = "http://10.0.0.2:8080".to_string();
        assert_eq!(
            config.get_ws_url("/ws/terminal").unwrap(),
            "ws://10.0.0.2:8080/ws/terminal"
        );

        config.api_url = "10.0.0.2".to_string();
        assert!(config.get_ws_url("/ws/terminal").is_err());
    }

    #[test]
    fn test_load_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck").join("config.json");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.server_ip, "localhost");

        let mut changed = config.clone();
        changed.server_ip = "192.168.1.10".to_string();
        changed.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.server_ip, "192.168.1.10");
    }
}
