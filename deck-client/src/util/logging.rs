use std::io;
use std::sync::{Once, OnceLock};

use chrono::{DateTime, Local, Utc};
use tokio::sync::broadcast;

use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, prelude::*};

static LOG_TX: OnceLock<broadcast::Sender<String>> = OnceLock::new();

/// Where formatted log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// Full-screen views own the terminal, so lines are handed to them
    /// through [`get_log_rx`] instead.
    Channel,
}

#[derive(Clone)]
struct ChannelWriter(broadcast::Sender<String>);

impl io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        let line = line.trim_end();
        if !line.is_empty() {
            let _ = self.0.send(line.to_string());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for ChannelWriter {
    type Writer = ChannelWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_tracing_with_log_layer(default_level: &str) -> broadcast::Sender<String> {
    let (tx, _rx) = broadcast::channel(1024);
    LOG_TX.set(tx.clone()).ok();

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(
            tracing_fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .without_time()
                .with_writer(ChannelWriter(tx.clone())),
        )
        .init();

    tx
}

static INIT: Once = Once::new();

pub fn init_logging(log_level: &str, target: LogTarget) {
    INIT.call_once(|| match target {
        LogTarget::Stderr => {
            tracing_subscriber::registry()
                .with(env_filter(log_level))
                .with(tracing_fmt::layer().with_writer(io::stderr))
                .init();
        }
        LogTarget::Channel => {
            let _ = init_tracing_with_log_layer(log_level);
        }
    });
}

pub fn get_log_rx() -> Option<broadcast::Receiver<String>> {
    LOG_TX.get().map(|tx| tx.subscribe())
}

pub fn timestamp_hms() -> String {
    human_time(Utc::now())
}

/// Wall-clock `HH:MM:SS` in the local timezone.
fn human_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_timestamp_hms_format() {
        let ts = timestamp_hms();
        // Should match HH:MM:SS format
        assert_eq!(ts.len(), 8);
        assert_eq!(&ts[2..3], ":");
        assert_eq!(&ts[5..6], ":");
    }

    #[test]
    fn test_channel_writer_trims_and_skips_empty() {
        let (tx, mut rx) = broadcast::channel(8);
        let mut writer = ChannelWriter(tx);

        writer.write_all(b"probe failed\n").unwrap();
        writer.write_all(b"\n").unwrap();

        assert_eq!(rx.try_recv().unwrap(), "probe failed");
        assert!(rx.try_recv().is_err());
    }
}
