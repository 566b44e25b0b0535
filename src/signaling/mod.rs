//! Signaling transport adapter.
//!
//! Owns the single websocket connection to the rendezvous service. Outbound
//! frames go through a writer task; inbound frames are deserialized by a
//! reader task and forwarded into the engine's input queue, so all protocol
//! handling happens on the engine's single processing context.

pub mod messages;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::config::PeerConfig;
use crate::error::PeerError;
use messages::{ClientMessage, ServerMessage};

/// Upper bound on draining queued outbound frames during shutdown.
const SHUTDOWN_FLUSH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Inbound traffic handed to the engine.
#[derive(Debug)]
pub(crate) enum SignalingEvent {
    Message(ServerMessage),
    /// The socket dropped without us asking for it.
    Closed { reason: String },
}

/// What the engine needs from a signaling transport. The production
/// implementation is [`WsSignaling`]; engine tests substitute a recorder.
#[async_trait]
pub(crate) trait SignalingPort: Send {
    /// Connects if there is no live connection, replacing a stale one.
    async fn ensure_connected(&mut self) -> Result<(), PeerError>;
    fn is_connected(&self) -> bool;
    fn send(&mut self, msg: ClientMessage) -> Result<(), PeerError>;
    /// Voluntary teardown; does not surface a `Disconnected` event.
    async fn disconnect(&mut self);
    /// Id assigned by the rendezvous service, once known.
    fn client_id(&self) -> Option<String>;
}

/// Reconnect-on-demand wrapper around [`SignalingClient`].
pub(crate) struct WsSignaling {
    config: PeerConfig,
    events_tx: mpsc::UnboundedSender<SignalingEvent>,
    active: Option<SignalingClient>,
}

impl WsSignaling {
    pub(crate) fn new(config: PeerConfig, events_tx: mpsc::UnboundedSender<SignalingEvent>) -> Self {
        Self {
            config,
            events_tx,
            active: None,
        }
    }
}

#[async_trait]
impl SignalingPort for WsSignaling {
    async fn ensure_connected(&mut self) -> Result<(), PeerError> {
        if let Some(client) = &self.active {
            if client.is_connected() {
                return Ok(());
            }
            if !self.config.socket.reconnection {
                return Err(PeerError::ConnectFailed(
                    "signaling connection lost and reconnection is disabled".into(),
                ));
            }
            tracing::debug!(target: "shoal::signaling", "replacing stale signaling connection");
            if let Some(old) = self.active.take() {
                old.shutdown().await;
            }
        }
        let client = SignalingClient::connect(&self.config, self.events_tx.clone()).await?;
        self.active = Some(client);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.active.as_ref().is_some_and(|c| c.is_connected())
    }

    fn send(&mut self, msg: ClientMessage) -> Result<(), PeerError> {
        match &self.active {
            Some(client) => client.send(msg),
            None => Err(PeerError::Closed),
        }
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.active.take() {
            client.shutdown().await;
        }
    }

    fn client_id(&self) -> Option<String> {
        self.active.as_ref().and_then(|c| c.client_id())
    }
}

/// One live websocket connection to the rendezvous service.
pub(crate) struct SignalingClient {
    out_tx: Option<mpsc::UnboundedSender<ClientMessage>>,
    client_id: Arc<RwLock<Option<String>>>,
    connected: Arc<AtomicBool>,
    voluntary: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl SignalingClient {
    pub(crate) async fn connect(
        config: &PeerConfig,
        events_tx: mpsc::UnboundedSender<SignalingEvent>,
    ) -> Result<Self, PeerError> {
        let url = Url::parse(&config.signaling_url).map_err(|err| {
            PeerError::ConnectFailed(format!(
                "invalid signaling url {}: {err}",
                config.signaling_url
            ))
        })?;

        let connect = connect_async(url.as_str());
        let (ws_stream, _) = tokio::time::timeout(config.socket.connection_timeout, connect)
            .await
            .map_err(|_| PeerError::ConnectFailed("signaling connect timed out".into()))?
            .map_err(|err| PeerError::ConnectFailed(format!("websocket connect failed: {err}")))?;
        tracing::debug!(target: "shoal::signaling", url = %url, "signaling websocket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let client_id = Arc::new(RwLock::new(None));
        let connected = Arc::new(AtomicBool::new(true));
        let voluntary = Arc::new(AtomicBool::new(false));

        let connected_for_writer = Arc::clone(&connected);
        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(target: "shoal::signaling", error = %err, "dropping unserializable frame");
                        continue;
                    }
                };
                if ws_write.send(Message::Text(text)).await.is_err() {
                    connected_for_writer.store(false, Ordering::SeqCst);
                    break;
                }
            }
            let _ = ws_write.send(Message::Close(None)).await;
        });

        let client_id_for_reader = Arc::clone(&client_id);
        let connected_for_reader = Arc::clone(&connected);
        let voluntary_for_reader = Arc::clone(&voluntary);
        let reader = tokio::spawn(async move {
            let mut close_reason = String::from("connection closed");
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::Welcome { id }) => {
                            tracing::debug!(target: "shoal::signaling", %id, "signaling session assigned");
                            *client_id_for_reader.write() = Some(id);
                        }
                        Ok(message) => {
                            if events_tx.send(SignalingEvent::Message(message)).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            tracing::debug!(target: "shoal::signaling", error = %err, "unparseable signaling frame");
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        if let Some(frame) = frame {
                            close_reason = frame.reason.to_string();
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        close_reason = err.to_string();
                        break;
                    }
                }
            }
            connected_for_reader.store(false, Ordering::SeqCst);
            if !voluntary_for_reader.load(Ordering::SeqCst) {
                tracing::debug!(target: "shoal::signaling", reason = %close_reason, "signaling websocket dropped");
                let _ = events_tx.send(SignalingEvent::Closed {
                    reason: close_reason,
                });
            }
        });

        Ok(Self {
            out_tx: Some(out_tx),
            client_id,
            connected,
            voluntary,
            writer: Some(writer),
            reader: Some(reader),
        })
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn client_id(&self) -> Option<String> {
        self.client_id.read().clone()
    }

    pub(crate) fn send(&self, msg: ClientMessage) -> Result<(), PeerError> {
        let tx = self.out_tx.as_ref().ok_or(PeerError::Closed)?;
        tx.send(msg).map_err(|_| PeerError::Closed)
    }

    /// Flushes queued frames, sends a close frame, and stops the tasks.
    /// Marked voluntary so the reader does not report a disconnect. The
    /// flush is bounded; a peer that stopped reading must not stall stop().
    pub(crate) async fn shutdown(mut self) {
        self.voluntary.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.out_tx.take();
        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, &mut writer)
                .await
                .is_err()
            {
                tracing::debug!(target: "shoal::signaling", "flush timed out, dropping queued frames");
                writer.abort();
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
