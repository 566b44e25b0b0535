//! Public session handle.
//!
//! [`MeshClient`] owns the engine task and exposes the command surface:
//! start as host or client, list hosts, stop, hooks and the event stream.
//! Every command is forwarded to the engine's input queue so callers never
//! race each other inside the negotiation state machine.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::config::PeerConfig;
use crate::engine::{Engine, EngineInput, SessionState};
use crate::error::PeerError;
use crate::event::PeerEvent;
use crate::link::PeerConnector;
use crate::registry::{CloseHook, CreateHook};
use crate::rtc::WebRtcConnector;
use crate::signaling::WsSignaling;
use crate::signaling::messages::HostEntry;

/// Which side of the rendezvous this session plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PeerRole {
    #[default]
    None,
    Host,
    Client,
}

/// Handle to one mesh session. Cloning is not supported; wrap in an `Arc`
/// to share across tasks.
pub struct MeshClient {
    input_tx: mpsc::UnboundedSender<EngineInput>,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    state_rx: watch::Receiver<SessionState>,
}

impl MeshClient {
    /// Creates a session backed by the real media transport engine.
    pub fn new(config: PeerConfig) -> Self {
        let connector = Arc::new(WebRtcConnector::new(&config));
        Self::with_connector(config, connector)
    }

    /// Creates a session over a caller-supplied transport engine. This is
    /// the seam the test suite uses to run sessions without real media
    /// connections.
    pub fn with_connector(config: PeerConfig, connector: Arc<dyn PeerConnector>) -> Self {
        tracing::debug!(
            target: "shoal::session",
            signaling_url = %config.signaling_url,
            ice_servers = ?config
                .ice_servers
                .iter()
                .flat_map(|s| s.urls.iter())
                .collect::<Vec<_>>(),
            start_timeout = ?config.start_timeout,
            vanilla_ice_timeout = ?config.vanilla_ice_timeout,
            "creating mesh session"
        );
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::default());

        let signaling = Box::new(WsSignaling::new(config.clone(), sig_tx));
        let engine = Engine::new(
            config,
            connector,
            signaling,
            events_tx,
            input_tx.clone(),
            state_tx,
        );
        tokio::spawn(engine.run(input_rx, sig_rx));

        Self {
            input_tx,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
            state_rx,
        }
    }

    /// Registers this participant as a host under `name` and waits for the
    /// rendezvous service to accept or reject the registration.
    pub async fn start_host(&self, name: impl Into<String>) -> Result<(), PeerError> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(EngineInput::StartHost {
                name: name.into(),
                reply,
            })
            .map_err(|_| PeerError::Closed)?;
        rx.await.map_err(|_| PeerError::Closed)?
    }

    /// Joins the mesh anchored at `host_id`. Resolves once the join request
    /// is on the wire; session readiness is reported via
    /// [`PeerEvent::Started`].
    pub async fn start_client(&self, host_id: impl Into<String>) -> Result<(), PeerError> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(EngineInput::StartClient {
                host_id: host_id.into(),
                reply,
            })
            .map_err(|_| PeerError::Closed)?;
        rx.await.map_err(|_| PeerError::Closed)?
    }

    /// Fetches the currently registered hosts from the rendezvous service.
    pub async fn list_hosts(&self) -> Result<Vec<HostEntry>, PeerError> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(EngineInput::ListHosts { reply })
            .map_err(|_| PeerError::Closed)?;
        rx.await.map_err(|_| PeerError::Closed)?
    }

    /// Says bye to every connected participant, closes all connections and
    /// disconnects from the rendezvous service. Safe to call repeatedly.
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.input_tx.send(EngineInput::Stop { reply }).is_err() {
            return;
        }
        let _ = rx.await;
    }

    /// Takes the session's event stream. Yields `None` on the second call;
    /// there is exactly one consumer.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().take()
    }

    pub fn is_running(&self) -> bool {
        self.state_rx.borrow().running
    }

    pub fn role(&self) -> PeerRole {
        self.state_rx.borrow().role
    }

    /// The rendezvous host id this session is joined to, for client
    /// sessions that have started.
    pub fn host_id(&self) -> Option<String> {
        self.state_rx.borrow().host_id.clone()
    }

    /// Registers a hook invoked whenever a connection to a remote
    /// participant is created.
    pub fn add_create_hook(&self, hook: CreateHook) {
        let _ = self.input_tx.send(EngineInput::AddCreateHook(hook));
    }

    /// Registers a hook invoked whenever a connection to a remote
    /// participant is being closed.
    pub fn add_close_hook(&self, hook: CloseHook) {
        let _ = self.input_tx.send(EngineInput::AddCloseHook(hook));
    }
}
