use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, warn};

use crate::session::{Connection, Connector, Inbound};

// ---------------------------------------------------------------
// Low-level worker task
// ---------------------------------------------------------------

async fn ws_pump_tungstenite<S>(
    mut ws: tokio_tungstenite::WebSocketStream<S>,
    tx_to_app: mpsc::Sender<Inbound>,
    mut rx_from_app: mpsc::Receiver<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            msg = ws.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(t))) => {
                        let _ = tx_to_app.send(Inbound::Message(t.as_str().to_string())).await;
                    }
                    Some(Ok(tungstenite::Message::Binary(b))) => {
                        let text = String::from_utf8_lossy(&b).into_owned();
                        let _ = tx_to_app.send(Inbound::Message(text)).await;
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        debug!("websocket closed by remote: {:?}", frame);
                        break;
                    }
                    Some(Err(e)) => {
                        let _ = tx_to_app.send(Inbound::Error(e.to_string())).await;
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            out = rx_from_app.recv() => {
                let Some(out) = out else {
                    let _ = ws.close(None).await;
                    break;
                };
                if let Err(e) = ws.send(tungstenite::Message::text(out)).await {
                    warn!("websocket send failed: {}", e);
                    let _ = tx_to_app.send(Inbound::Error(e.to_string())).await;
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------
// Client-side connector (tokio-tungstenite)
// ---------------------------------------------------------------

/// Opens stream sessions over websockets.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        let (ws, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;

        let (tx_to_app, inbound) = mpsc::channel(256);
        let (outbound, rx_from_app) = mpsc::channel(32);

        let pump = tokio::spawn(ws_pump_tungstenite(ws, tx_to_app, rx_from_app));

        Ok(Connection::new(inbound, outbound).with_pump(pump))
    }
}
