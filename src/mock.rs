//! In-memory transport engine used by the test suite and by embedders that
//! want to exercise session logic without real media connections.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::link::{
    IceConnectionState, IceStateObserver, LinkError, PeerConnector, PeerLink, SdpKind,
    SessionDescription,
};

/// Connector producing [`MockLink`]s. Links are retained so tests can reach
/// them by remote id and drive ICE state transitions.
pub struct MockConnector {
    links: Mutex<HashMap<String, Arc<MockLink>>>,
    auto_gathering: bool,
}

impl MockConnector {
    /// Links report ICE gathering as complete immediately.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(HashMap::new()),
            auto_gathering: true,
        })
    }

    /// Links gather until [`MockLink::complete_gathering`] is called,
    /// for exercising the vanilla-ICE timeout path.
    pub fn with_manual_gathering() -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(HashMap::new()),
            auto_gathering: false,
        })
    }

    pub fn link(&self, remote_id: &str) -> Option<Arc<MockLink>> {
        self.links.lock().get(remote_id).cloned()
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().len()
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn open(
        &self,
        remote_id: &str,
        observer: IceStateObserver,
    ) -> Result<Arc<dyn PeerLink>, LinkError> {
        let link = Arc::new(MockLink::new(remote_id, observer, self.auto_gathering));
        self.links
            .lock()
            .insert(remote_id.to_string(), link.clone());
        Ok(link)
    }
}

#[derive(Debug, Default)]
struct MockLinkState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    offers_created: usize,
    answers_created: usize,
    closed: bool,
}

pub struct MockLink {
    remote_id: String,
    observer: IceStateObserver,
    state: Mutex<MockLinkState>,
    gathering_tx: watch::Sender<bool>,
}

impl MockLink {
    fn new(remote_id: &str, observer: IceStateObserver, auto_gathering: bool) -> Self {
        let (gathering_tx, _) = watch::channel(auto_gathering);
        Self {
            remote_id: remote_id.to_string(),
            observer,
            state: Mutex::new(MockLinkState::default()),
            gathering_tx,
        }
    }

    /// Reports an ICE connection state change, as the engine under test
    /// would receive it from a real transport.
    pub fn drive_ice(&self, state: IceConnectionState) {
        (self.observer)(state);
    }

    /// Marks ICE gathering as complete (manual-gathering mode).
    pub fn complete_gathering(&self) {
        let _ = self.gathering_tx.send(true);
    }

    pub fn local_description_sync(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn offers_created(&self) -> usize {
        self.state.lock().offers_created
    }

    pub fn answers_created(&self) -> usize {
        self.state.lock().answers_created
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl PeerLink for MockLink {
    async fn create_offer(&self) -> Result<SessionDescription, LinkError> {
        let mut state = self.state.lock();
        state.offers_created += 1;
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: format!("v=0 mock-offer for={}", self.remote_id),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, LinkError> {
        let mut state = self.state.lock();
        state.answers_created += 1;
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: format!("v=0 mock-answer for={}", self.remote_id),
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), LinkError> {
        self.state.lock().local = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), LinkError> {
        self.state.lock().remote = Some(desc);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    async fn wait_gathering_complete(&self) {
        let mut rx = self.gathering_tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn close(&self) {
        self.state.lock().closed = true;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
