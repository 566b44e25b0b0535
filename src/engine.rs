//! Negotiation engine: the message-driven protocol core.
//!
//! Runs as a single actor task. Commands from the session controller,
//! inbound signaling frames, ICE state notifications and vanilla-ICE
//! finalize ticks all arrive through queues and are processed one at a
//! time, so no two negotiation steps for the same session ever overlap.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::event::PeerEvent;
use crate::link::{IceConnectionState, IceStateObserver, LinkError, PeerConnector, PeerLink};
use crate::readiness::ReadinessLatch;
use crate::registry::{CloseHook, CreateHook, PeerRegistry};
use crate::session::PeerRole;
use crate::signaling::messages::{ClientMessage, HostEntry, ServerMessage, SignalKind, SignalMessage};
use crate::signaling::{SignalingEvent, SignalingPort};

/// Externally observable session state. Mutated only by the engine;
/// the session controller reads it through a watch receiver.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionState {
    pub(crate) running: bool,
    pub(crate) role: PeerRole,
    pub(crate) host_id: Option<String>,
}

/// Everything the engine's queue can carry.
pub(crate) enum EngineInput {
    StartHost {
        name: String,
        reply: oneshot::Sender<Result<(), PeerError>>,
    },
    StartClient {
        host_id: String,
        reply: oneshot::Sender<Result<(), PeerError>>,
    },
    ListHosts {
        reply: oneshot::Sender<Result<Vec<HostEntry>, PeerError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    AddCreateHook(CreateHook),
    AddCloseHook(CloseHook),
    /// ICE connection state change for one remote participant, marshaled
    /// off the transport engine's callback.
    IceState {
        id: String,
        state: IceConnectionState,
    },
    /// Vanilla-ICE wait for `to` finished, by completion or timeout.
    FinalizeSdp {
        to: String,
        timed_out: bool,
    },
    /// The start-timeout supervisor gave up waiting.
    StartTimedOut,
}

pub(crate) struct Engine {
    config: PeerConfig,
    registry: PeerRegistry,
    latch: ReadinessLatch,
    signaling: Box<dyn SignalingPort>,
    events: mpsc::UnboundedSender<PeerEvent>,
    input_tx: mpsc::UnboundedSender<EngineInput>,
    state_tx: watch::Sender<SessionState>,
    pending_create_host: Option<oneshot::Sender<Result<(), PeerError>>>,
    pending_list_hosts: Option<oneshot::Sender<Result<Vec<HostEntry>, PeerError>>>,
    supervisor: Option<JoinHandle<()>>,
}

impl Engine {
    pub(crate) fn new(
        config: PeerConfig,
        connector: Arc<dyn PeerConnector>,
        signaling: Box<dyn SignalingPort>,
        events: mpsc::UnboundedSender<PeerEvent>,
        input_tx: mpsc::UnboundedSender<EngineInput>,
        state_tx: watch::Sender<SessionState>,
    ) -> Self {
        Self {
            config,
            registry: PeerRegistry::new(connector, events.clone()),
            latch: ReadinessLatch::new(),
            signaling,
            events,
            input_tx,
            state_tx,
            pending_create_host: None,
            pending_list_hosts: None,
            supervisor: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut input_rx: mpsc::UnboundedReceiver<EngineInput>,
        mut sig_rx: mpsc::UnboundedReceiver<SignalingEvent>,
    ) {
        loop {
            tokio::select! {
                input = input_rx.recv() => match input {
                    Some(input) => self.handle_input(input).await,
                    // Session controller dropped; quiet teardown.
                    None => break,
                },
                Some(event) = sig_rx.recv() => self.handle_signaling(event).await,
            }
        }
        self.do_stop().await;
    }

    pub(crate) async fn handle_input(&mut self, input: EngineInput) {
        match input {
            EngineInput::StartHost { name, reply } => self.start_host(name, reply).await,
            EngineInput::StartClient { host_id, reply } => self.start_client(host_id, reply).await,
            EngineInput::ListHosts { reply } => self.list_hosts(reply).await,
            EngineInput::Stop { reply } => {
                self.do_stop().await;
                let _ = reply.send(());
            }
            EngineInput::AddCreateHook(hook) => self.registry.add_create_hook(hook),
            EngineInput::AddCloseHook(hook) => self.registry.add_close_hook(hook),
            EngineInput::IceState { id, state } => self.handle_ice_state(id, state).await,
            EngineInput::FinalizeSdp { to, timed_out } => self.finalize_sdp(&to, timed_out).await,
            EngineInput::StartTimedOut => self.handle_start_timeout().await,
        }
    }

    pub(crate) async fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Message(message) => match message {
                // Consumed inside the transport adapter; tolerated here.
                ServerMessage::Welcome { .. } => {}
                ServerMessage::CreateHostResult { status, message } => {
                    self.handle_create_host_result(status, message);
                }
                ServerMessage::ListHostsResult { status: _, hosts } => {
                    match self.pending_list_hosts.take() {
                        Some(reply) => {
                            let _ = reply.send(Ok(hosts));
                        }
                        None => {
                            tracing::debug!(target: "shoal::engine", "unexpected list hosts result");
                        }
                    }
                }
                ServerMessage::Message { payload } => self.handle_signal(payload).await,
                ServerMessage::UserDisconnected { id } => {
                    tracing::debug!(target: "shoal::engine", peer_id = %id, "user disconnected");
                    self.registry.close(&id).await;
                }
            },
            SignalingEvent::Closed { reason } => {
                let _ = self.events.send(PeerEvent::Disconnected { reason });
            }
        }
    }

    // ── start / stop ──────────────────────────────────────────────

    async fn start_host(&mut self, name: String, reply: oneshot::Sender<Result<(), PeerError>>) {
        tracing::debug!(target: "shoal::engine", %name, "start host");
        self.state_tx.send_modify(|s| s.role = PeerRole::Host);
        self.spawn_start_supervisor();

        if let Err(err) = self.ensure_signaling().await {
            let _ = reply.send(Err(err));
            return;
        }
        if self.pending_create_host.is_some() {
            let _ = reply.send(Err(PeerError::RequestInFlight));
            return;
        }
        if let Err(err) = self.signaling.send(ClientMessage::CreateHost { name }) {
            let _ = reply.send(Err(err));
            return;
        }
        self.pending_create_host = Some(reply);
    }

    async fn start_client(&mut self, host_id: String, reply: oneshot::Sender<Result<(), PeerError>>) {
        tracing::debug!(target: "shoal::engine", %host_id, "start client");
        self.state_tx.send_modify(|s| {
            s.role = PeerRole::Client;
            s.host_id = Some(host_id.clone());
        });
        self.spawn_start_supervisor();

        if let Err(err) = self.ensure_signaling().await {
            let _ = reply.send(Err(err));
            return;
        }
        let result = self.send_signal(&host_id, SignalMessage::join()).await;
        let _ = reply.send(result);
    }

    async fn list_hosts(&mut self, reply: oneshot::Sender<Result<Vec<HostEntry>, PeerError>>) {
        if let Err(err) = self.ensure_signaling().await {
            let _ = reply.send(Err(err));
            return;
        }
        if self.pending_list_hosts.is_some() {
            let _ = reply.send(Err(PeerError::RequestInFlight));
            return;
        }
        if let Err(err) = self.signaling.send(ClientMessage::ListHosts) {
            let _ = reply.send(Err(err));
            return;
        }
        self.pending_list_hosts = Some(reply);
    }

    fn handle_create_host_result(&mut self, status: u16, message: String) {
        let Some(reply) = self.pending_create_host.take() else {
            tracing::debug!(target: "shoal::engine", "unexpected create host result");
            return;
        };
        if status == 409 {
            tracing::debug!(target: "shoal::engine", %message, "host name already exists");
            let _ = reply.send(Err(PeerError::NameAlreadyExists(message)));
        } else {
            // A host has no rendezvous peer to wait on; it is ready as soon
            // as the service acknowledged the registration.
            self.fire_started();
            let _ = reply.send(Ok(()));
        }
    }

    async fn do_stop(&mut self) {
        if let Some(task) = self.supervisor.take() {
            task.abort();
        }
        self.state_tx.send_modify(|s| {
            s.running = false;
            s.role = PeerRole::None;
            s.host_id = None;
        });
        // Dropping the slots fails any caller still awaiting them.
        self.pending_create_host = None;
        self.pending_list_hosts = None;

        let connections = self.registry.len();
        if connections > 0 {
            tracing::debug!(target: "shoal::engine", connections, "stopping session");
        }
        for id in self.registry.ids() {
            if self.signaling.is_connected() {
                if let Err(err) = self.send_signal(&id, SignalMessage::bye()).await {
                    tracing::debug!(target: "shoal::engine", peer_id = %id, error = %err, "bye not sent");
                }
            }
        }
        self.registry.close_all().await;
        self.latch.reset();
        self.signaling.disconnect().await;
    }

    fn spawn_start_supervisor(&mut self) {
        if let Some(old) = self.supervisor.take() {
            old.abort();
        }
        let mut state_rx = self.state_tx.subscribe();
        let input_tx = self.input_tx.clone();
        let start_timeout = self.config.start_timeout;
        self.supervisor = Some(tokio::spawn(async move {
            let became_running = tokio::time::timeout(start_timeout, async {
                loop {
                    if state_rx.borrow().running {
                        return;
                    }
                    if state_rx.changed().await.is_err() {
                        return;
                    }
                }
            })
            .await
            .is_ok();
            if !became_running {
                let _ = input_tx.send(EngineInput::StartTimedOut);
            }
        }));
    }

    async fn handle_start_timeout(&mut self) {
        if self.state_tx.borrow().running {
            return;
        }
        tracing::debug!(target: "shoal::engine", "start processing timed out");
        self.do_stop().await;
        let _ = self.events.send(PeerEvent::StartFailed);
    }

    fn fire_started(&mut self) {
        if self.state_tx.borrow().running {
            return;
        }
        if let Some(task) = self.supervisor.take() {
            task.abort();
        }
        self.state_tx.send_modify(|s| s.running = true);
        let local_id = self.signaling.client_id().unwrap_or_default();
        tracing::debug!(target: "shoal::engine", %local_id, "p2p started");
        let _ = self.events.send(PeerEvent::Started { local_id });
    }

    // ── protocol handlers ─────────────────────────────────────────

    async fn handle_signal(&mut self, message: SignalMessage) {
        tracing::debug!(
            target: "shoal::engine",
            kind = ?message.kind,
            from = message.from.as_deref().unwrap_or(""),
            "receive message"
        );
        match message.kind {
            SignalKind::Join => {
                let Some(from) = message.from else { return };
                self.receive_join(&from).await;
            }
            SignalKind::CallMe => {
                let Some(me) = message.me else { return };
                self.send_offer(&me).await;
            }
            SignalKind::Offer => {
                let (Some(from), Some(desc)) =
                    (message.from.clone(), message.session_description())
                else {
                    return;
                };
                self.receive_offer(&from, desc).await;
            }
            SignalKind::Answer => {
                let (Some(from), Some(desc)) =
                    (message.from.clone(), message.session_description())
                else {
                    return;
                };
                self.receive_answer(&from, desc).await;
            }
            SignalKind::Done => {
                let Some(from) = message.from else { return };
                self.receive_done(&from);
            }
            SignalKind::Bye => {
                let Some(from) = message.from else { return };
                self.registry.close(&from).await;
            }
        }
    }

    /// A new participant asked to join. Offer to it, then introduce it to
    /// every other member so each one offers to the joiner independently.
    async fn receive_join(&mut self, from: &str) {
        self.send_offer(from).await;
        let others: Vec<String> = self
            .registry
            .ids()
            .into_iter()
            .filter(|id| id != from)
            .collect();
        for to in others {
            if let Err(err) = self.send_signal(&to, SignalMessage::call_me(from)).await {
                tracing::debug!(target: "shoal::engine", peer_id = %to, error = %err, "call me not sent");
            }
        }
    }

    async fn send_offer(&mut self, to: &str) {
        if self.registry.contains(to) {
            // Duplicate introduction; a single offer per remote id.
            tracing::debug!(target: "shoal::engine", peer_id = %to, "offer skipped, connection exists");
            return;
        }
        let link = match self.create_connection(to, true).await {
            Ok(link) => link,
            Err(err) => {
                tracing::warn!(target: "shoal::engine", peer_id = %to, error = %err, "connection setup failed");
                return;
            }
        };
        if let Err(err) = self.negotiate_local(to, link, true).await {
            tracing::debug!(target: "shoal::engine", peer_id = %to, error = %err, "send offer failed");
        }
    }

    async fn receive_offer(&mut self, from: &str, desc: crate::link::SessionDescription) {
        let link = match self.create_connection(from, false).await {
            Ok(link) => link,
            Err(err) => {
                tracing::warn!(target: "shoal::engine", peer_id = %from, error = %err, "connection setup failed");
                return;
            }
        };
        if let Err(err) = link.set_remote_description(desc).await {
            tracing::debug!(target: "shoal::engine", peer_id = %from, error = %err, "receive offer failed");
            return;
        }
        if let Err(err) = self.negotiate_local(from, link, false).await {
            tracing::debug!(target: "shoal::engine", peer_id = %from, error = %err, "send answer failed");
        }
    }

    async fn receive_answer(&mut self, from: &str, desc: crate::link::SessionDescription) {
        let Some(link) = self.registry.link(from) else {
            // The peer may already be gone; nothing to do.
            tracing::debug!(target: "shoal::engine", peer_id = %from, "answer for unknown peer");
            return;
        };
        if let Err(err) = link.set_remote_description(desc).await {
            tracing::debug!(target: "shoal::engine", peer_id = %from, error = %err, "receive answer failed");
            return;
        }
        if let Err(err) = self.send_signal(from, SignalMessage::done()).await {
            tracing::debug!(target: "shoal::engine", peer_id = %from, error = %err, "done not sent");
        }
    }

    fn receive_done(&mut self, from: &str) {
        let is_rendezvous = {
            let state = self.state_tx.borrow();
            state.role == PeerRole::Client && state.host_id.as_deref() == Some(from)
        };
        if is_rendezvous && self.latch.finish_handshake() {
            self.fire_started();
        }
    }

    async fn handle_ice_state(&mut self, id: String, state: IceConnectionState) {
        tracing::debug!(target: "shoal::engine", peer_id = %id, state = ?state, "ice connection state");
        match state {
            IceConnectionState::Connected | IceConnectionState::Completed => {
                let is_rendezvous = {
                    let session = self.state_tx.borrow();
                    session.role == PeerRole::Client
                        && session.host_id.as_deref() == Some(id.as_str())
                };
                if is_rendezvous && self.latch.finish_ice_gathering() {
                    self.fire_started();
                }
            }
            IceConnectionState::Failed | IceConnectionState::Closed => {
                // Unsolicited failure is treated like a remote bye.
                self.registry.close(&id).await;
            }
            IceConnectionState::New
            | IceConnectionState::Checking
            | IceConnectionState::Disconnected => {}
        }
    }

    // ── negotiation plumbing ──────────────────────────────────────

    async fn create_connection(
        &mut self,
        id: &str,
        is_offerer: bool,
    ) -> Result<Arc<dyn PeerLink>, LinkError> {
        let input_tx = self.input_tx.clone();
        let id_for_observer = id.to_string();
        let observer: IceStateObserver = Arc::new(move |state| {
            let _ = input_tx.send(EngineInput::IceState {
                id: id_for_observer.clone(),
                state,
            });
        });
        self.registry.create_if_absent(id, is_offerer, observer).await
    }

    /// Creates the local description and arms the vanilla-ICE finalize wait.
    async fn negotiate_local(
        &mut self,
        to: &str,
        link: Arc<dyn PeerLink>,
        offer: bool,
    ) -> Result<(), LinkError> {
        let desc = if offer {
            link.create_offer().await?
        } else {
            link.create_answer().await?
        };
        link.set_local_description(desc).await?;

        let input_tx = self.input_tx.clone();
        let to_for_task = to.to_string();
        let wait = self.config.vanilla_ice_timeout;
        let task = tokio::spawn(async move {
            let timed_out = tokio::time::timeout(wait, link.wait_gathering_complete())
                .await
                .is_err();
            let _ = input_tx.send(EngineInput::FinalizeSdp {
                to: to_for_task,
                timed_out,
            });
        });
        self.registry.set_finalize(to, task);
        Ok(())
    }

    /// Delivers the local SDP exactly once per offer/answer: either the
    /// transport finished gathering or the vanilla-ICE timeout elapsed.
    async fn finalize_sdp(&mut self, to: &str, timed_out: bool) {
        let outcome = if timed_out { "timeout" } else { "complete" };
        tracing::debug!(target: "shoal::engine", peer_id = %to, outcome, "vanilla ice gathering");

        let Some(link) = self.registry.link(to) else {
            // Connection closed while we were waiting.
            return;
        };
        let Some(desc) = link.local_description().await else {
            tracing::debug!(target: "shoal::engine", peer_id = %to, "no local description to send");
            return;
        };
        if let Err(err) = self.send_signal(to, SignalMessage::sdp(&desc)).await {
            tracing::debug!(target: "shoal::engine", peer_id = %to, error = %err, "sdp not sent");
        }
    }

    async fn ensure_signaling(&mut self) -> Result<(), PeerError> {
        match self.signaling.ensure_connected().await {
            Ok(()) => Ok(()),
            Err(err) => {
                let reason = err.to_string();
                tracing::debug!(target: "shoal::engine", %reason, "signaling connect failed");
                let _ = self.events.send(PeerEvent::ConnectFailed {
                    reason: reason.clone(),
                });
                Err(PeerError::ConnectFailed(reason))
            }
        }
    }

    async fn send_signal(&mut self, to: &str, mut message: SignalMessage) -> Result<(), PeerError> {
        if !self.signaling.is_connected() {
            self.ensure_signaling().await?;
        }
        message.to = Some(to.to_string());
        tracing::debug!(target: "shoal::engine", to = %to, kind = ?message.kind, "send message");
        self.signaling.send(ClientMessage::Message { payload: message })
    }
}
