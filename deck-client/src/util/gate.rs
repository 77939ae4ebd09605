use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// Serialises a one-shot close against store writes: once `close` returns,
/// every later `write` is refused.
#[derive(Clone)]
pub struct WriteGate {
    open: Arc<Mutex<bool>>,
    token: CancellationToken,
}

impl WriteGate {
    pub fn new() -> Self {
        Self {
            open: Arc::new(Mutex::new(true)),
            token: CancellationToken::new(),
        }
    }

    /// Closes the gate, running `on_close` under the same lock. Returns false
    /// if it was already closed.
    pub fn close(&self, on_close: impl FnOnce()) -> bool {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        if !*open {
            return false;
        }
        *open = false;
        on_close();
        self.token.cancel();
        true
    }

    pub fn write<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        if *open { Some(f()) } else { None }
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}

impl Default for WriteGate {
    fn default() -> Self {
        Self::new()
    }
}
