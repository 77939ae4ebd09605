pub mod gate;
pub mod logging;
pub mod renderer;
pub mod retry;
pub mod websocket;
