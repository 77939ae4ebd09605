//! The two stream channels the dashboard keeps open.

pub mod telemetry;
pub mod terminal;
