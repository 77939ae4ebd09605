//! Persistent bidirectional stream with a per-channel reconnect policy.
//!
//! A session runs one driver task that owns the live connection. Every store
//! write the driver makes goes through a [`WriteGate`], so an explicit
//! `close` is final: nothing from the old connection lands afterwards and no
//! reconnect is scheduled.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    store::{Channel, ConnectionStatus, StateStore},
    util::gate::WriteGate,
};

/// Event delivered by a connection, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(String),
    /// Connection-level error. The connection closes right after.
    Error(String),
}

/// A live connection. The inbound channel closing means the remote side
/// closed.
pub struct Connection {
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<String>,
    pump: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(inbound: mpsc::Receiver<Inbound>, outbound: mpsc::Sender<String>) -> Self {
        Self {
            inbound,
            outbound,
            pump: None,
        }
    }

    /// Ties a background transport task to this connection's lifetime.
    pub fn with_pump(mut self, pump: JoinHandle<()>) -> Self {
        self.pump = Some(pump);
        self
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Connection>;
}

/// Channel-specific reaction to session events. Called from the driver task
/// with the store the session writes to.
pub trait SessionHandler: Send + Sync + 'static {
    fn on_open(&self, _store: &StateStore) {}

    fn on_message(&self, store: &StateStore, text: &str);

    fn on_error(&self, _store: &StateStore, _message: &str) {}

    fn on_close(&self, _store: &StateStore) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPolicy {
    pub channel: Channel,
    /// Delay before reopening after a close. `None` never reconnects.
    pub reconnect: Option<Duration>,
}

impl ChannelPolicy {
    pub fn telemetry(delay: Duration) -> Self {
        Self {
            channel: Channel::Telemetry,
            reconnect: Some(delay),
        }
    }

    /// A shell carries state, so it is only ever reopened by the user.
    pub fn terminal() -> Self {
        Self {
            channel: Channel::Terminal,
            reconnect: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("not connected")]
    NotOpen,
    #[error("session closed")]
    Closed,
    #[error("connection failed: {0}")]
    Connect(String),
}

type Outbound = Arc<Mutex<Option<mpsc::Sender<String>>>>;

#[derive(Clone)]
pub struct SessionHandle {
    channel: Channel,
    gate: WriteGate,
    store: StateStore,
    status: Arc<watch::Sender<ConnectionStatus>>,
    view_active: Arc<watch::Sender<bool>>,
    outbound: Outbound,
    driver: Arc<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Fire-and-forget send of one payload.
    pub fn send(&self, payload: impl Into<String>) -> Result<(), SessionError> {
        if self.gate.is_closed() {
            return Err(SessionError::Closed);
        }
        if self.status() != ConnectionStatus::Open {
            return Err(SessionError::NotOpen);
        }
        let tx = self
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(SessionError::NotOpen)?;
        tx.try_send(payload.into()).map_err(|_| SessionError::NotOpen)
    }

    /// Explicit teardown. Cancels any pending reconnect; idempotent.
    pub fn close(&self) {
        let (store, channel) = (&self.store, self.channel);
        let closed = self.gate.close(|| {
            store.set_connection(channel, ConnectionStatus::Idle);
            self.status.send_replace(ConnectionStatus::Idle);
        });
        if closed {
            info!("{} session closed", channel.as_str());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    /// False once the session has given up for good: closed explicitly,
    /// closed by the remote without a reconnect, or its view went away.
    pub fn is_running(&self) -> bool {
        !self.driver.is_finished()
    }

    /// Whether the owning view is shown. Only consulted when deciding to
    /// reconnect.
    pub fn set_view_active(&self, active: bool) {
        self.view_active.send_replace(active);
    }

    /// Resolves once the session reaches `status`. Fails if the session is
    /// closed first.
    pub async fn wait_for(&self, status: ConnectionStatus) -> Result<(), SessionError> {
        let mut rx = self.status.subscribe();
        tokio::select! {
            reached = rx.wait_for(|s| *s == status) => {
                reached.map(|_| ()).map_err(|_| SessionError::Closed)
            }
            _ = self.gate.closed(), if status != ConnectionStatus::Idle => {
                Err(SessionError::Closed)
            }
        }
    }
}

pub struct StreamSession;

impl StreamSession {
    pub fn open(
        url: impl Into<String>,
        policy: ChannelPolicy,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn SessionHandler>,
        store: StateStore,
    ) -> SessionHandle {
        let gate = WriteGate::new();
        let status = Arc::new(watch::Sender::new(ConnectionStatus::Idle));
        let view_active = Arc::new(watch::Sender::new(true));
        let outbound: Outbound = Arc::new(Mutex::new(None));

        let driver = Driver {
            url: url.into(),
            policy,
            connector,
            handler,
            store: store.clone(),
            gate: gate.clone(),
            status: status.clone(),
            view_active: view_active.subscribe(),
            outbound: outbound.clone(),
        };
        let driver = Arc::new(tokio::spawn(driver.run()));

        SessionHandle {
            channel: policy.channel,
            gate,
            store,
            status,
            view_active,
            outbound,
            driver,
        }
    }
}

struct Driver {
    url: String,
    policy: ChannelPolicy,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn SessionHandler>,
    store: StateStore,
    gate: WriteGate,
    status: Arc<watch::Sender<ConnectionStatus>>,
    view_active: watch::Receiver<bool>,
    outbound: Outbound,
}

impl Driver {
    fn channel(&self) -> &'static str {
        self.policy.channel.as_str()
    }

    /// Publishes a status change. `false` once the session was closed.
    fn transition(&self, status: ConnectionStatus) -> bool {
        self.gate
            .write(|| {
                self.store.set_connection(self.policy.channel, status);
                self.status.send_replace(status);
            })
            .is_some()
    }

    fn set_outbound(&self, tx: Option<mpsc::Sender<String>>) {
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = tx;
    }

    async fn run(mut self) {
        loop {
            if !self.transition(ConnectionStatus::Connecting) {
                return;
            }
            debug!("{}: connecting to {}", self.channel(), self.url);

            let connected = tokio::select! {
                biased;
                _ = self.gate.closed() => return,
                c = self.connector.connect(&self.url) => c,
            };

            match connected {
                Ok(conn) => {
                    if !self.serve(conn).await {
                        return;
                    }
                }
                Err(e) => {
                    warn!("{}: {}", self.channel(), SessionError::Connect(e.to_string()));
                    let reported = self.gate.write(|| {
                        self.handler.on_error(&self.store, &e.to_string());
                        self.store
                            .set_connection(self.policy.channel, ConnectionStatus::Error);
                        self.status.send_replace(ConnectionStatus::Error);
                    });
                    if reported.is_none() {
                        return;
                    }
                }
            }

            if self
                .gate
                .write(|| {
                    self.store
                        .set_connection(self.policy.channel, ConnectionStatus::Closed);
                    self.status.send_replace(ConnectionStatus::Closed);
                    self.handler.on_close(&self.store);
                })
                .is_none()
            {
                return;
            }

            let Some(delay) = self.policy.reconnect else {
                info!("{}: closed", self.channel());
                return;
            };
            if !self.wait_reconnect(delay).await {
                return;
            }
        }
    }

    /// Pumps one connection until it ends. `false` if the session was
    /// closed meanwhile.
    async fn serve(&mut self, mut conn: Connection) -> bool {
        if self
            .gate
            .write(|| {
                self.set_outbound(Some(conn.outbound.clone()));
                self.store
                    .set_connection(self.policy.channel, ConnectionStatus::Open);
                self.status.send_replace(ConnectionStatus::Open);
                self.handler.on_open(&self.store);
            })
            .is_none()
        {
            return false;
        }
        info!("{}: connected", self.channel());

        loop {
            let event = tokio::select! {
                biased;
                _ = self.gate.closed() => None,
                e = conn.inbound.recv() => Some(e),
            };
            let Some(event) = event else {
                self.set_outbound(None);
                return false;
            };

            let applied = match event {
                Some(Inbound::Message(text)) => self
                    .gate
                    .write(|| self.handler.on_message(&self.store, &text)),
                Some(Inbound::Error(message)) => {
                    warn!("{}: {}", self.channel(), message);
                    self.gate.write(|| {
                        self.store
                            .set_connection(self.policy.channel, ConnectionStatus::Error);
                        self.status.send_replace(ConnectionStatus::Error);
                        self.handler.on_error(&self.store, &message);
                    })
                }
                None => break,
            };
            if applied.is_none() {
                self.set_outbound(None);
                return false;
            }
        }

        self.set_outbound(None);
        info!("{}: remote closed", self.channel());
        true
    }

    /// Sleeps out the reconnect delay. `false` if the session should stay
    /// down: closed explicitly, or the owning view went away.
    async fn wait_reconnect(&mut self, delay: Duration) -> bool {
        if !*self.view_active.borrow_and_update() {
            debug!("{}: view inactive, not reconnecting", self.channel());
            self.transition(ConnectionStatus::Idle);
            return false;
        }
        debug!("{}: reconnecting in {:?}", self.channel(), delay);

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = self.gate.closed() => return false,
                changed = self.view_active.changed() => {
                    if changed.is_err() || !*self.view_active.borrow_and_update() {
                        debug!("{}: view deactivated, reconnect dropped", self.channel());
                        self.transition(ConnectionStatus::Idle);
                        return false;
                    }
                }
                _ = &mut sleep => return true,
            }
        }
    }
}
