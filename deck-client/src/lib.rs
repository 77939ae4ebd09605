pub mod config;
pub mod feeds;
pub mod refresh;
pub mod server;
pub mod session;
pub mod store;
pub mod tracker;
pub mod util;
pub mod view;

pub mod tui;
// === CLI entrypoint ===
pub mod cli;

#[cfg(test)]
mod testing;

/// Entrypoint used by `main.rs` and tests to run the full CLI.
pub async fn run_cli() -> anyhow::Result<()> {
    cli::cli().await
}
