use std::sync::Arc;

use anyhow::Result;
use deck_shared::metrics::SystemStats;
use tracing::warn;

use crate::{
    config::Config,
    session::{ChannelPolicy, Connector, SessionHandle, SessionHandler, StreamSession},
    store::StateStore,
};

pub const MONITOR_PATH: &str = "/ws/monitor";

/// Applies each snapshot wholesale to the telemetry slice.
pub struct TelemetryHandler;

impl SessionHandler for TelemetryHandler {
    fn on_message(&self, store: &StateStore, text: &str) {
        match serde_json::from_str::<SystemStats>(text) {
            Ok(stats) => store.replace_telemetry(stats),
            Err(e) => warn!("Dropping malformed telemetry frame: {}", e),
        }
    }
}

pub fn open_telemetry(
    config: &Config,
    connector: Arc<dyn Connector>,
    store: StateStore,
) -> Result<SessionHandle> {
    let url = config.get_ws_url(MONITOR_PATH)?;
    Ok(StreamSession::open(
        url,
        ChannelPolicy::telemetry(config.telemetry_reconnect_delay()),
        connector,
        Arc::new(TelemetryHandler),
        store,
    ))
}
