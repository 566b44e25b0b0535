//! Media transport engine backed by webrtc-rs.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::config::PeerConfig;
use crate::link::{
    IceConnectionState, IceStateObserver, LinkError, PeerConnector, PeerLink, SdpKind,
    SessionDescription,
};

/// Opens one `RTCPeerConnection` per remote participant, configured with the
/// session's STUN/TURN servers.
pub struct WebRtcConnector {
    rtc_config: RTCConfiguration,
}

impl WebRtcConnector {
    pub fn new(config: &PeerConfig) -> Self {
        let ice_servers = config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
            })
            .collect();
        Self {
            rtc_config: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn open(
        &self,
        remote_id: &str,
        observer: IceStateObserver,
    ) -> Result<Arc<dyn PeerLink>, LinkError> {
        let api = APIBuilder::new().build();
        let peer_connection = api
            .new_peer_connection(self.rtc_config.clone())
            .await
            .map_err(|err| LinkError(format!("peer connection setup failed: {err}")))?;
        let peer_connection = Arc::new(peer_connection);
        tracing::debug!(target: "shoal::rtc", peer_id = %remote_id, "peer connection created");

        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                observer(map_ice_state(state));
                Box::pin(async {})
            },
        ));

        Ok(Arc::new(WebRtcLink { peer_connection }))
    }
}

/// One remote participant's `RTCPeerConnection`.
pub struct WebRtcLink {
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcLink {
    /// The underlying connection, for create hooks that attach data
    /// channels or media tracks.
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        self.peer_connection.clone()
    }
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn create_offer(&self) -> Result<SessionDescription, LinkError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|err| LinkError(format!("create offer failed: {err}")))?;
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: offer.sdp,
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, LinkError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|err| LinkError(format!("create answer failed: {err}")))?;
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: answer.sdp,
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), LinkError> {
        let desc = to_rtc(&desc)?;
        self.peer_connection
            .set_local_description(desc)
            .await
            .map_err(|err| LinkError(format!("set local description failed: {err}")))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), LinkError> {
        let desc = to_rtc(&desc)?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|err| LinkError(format!("set remote description failed: {err}")))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.peer_connection.local_description().await?;
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Answer | RTCSdpType::Pranswer => SdpKind::Answer,
            _ => return None,
        };
        Some(SessionDescription {
            kind,
            sdp: desc.sdp,
        })
    }

    async fn wait_gathering_complete(&self) {
        let mut gather = self.peer_connection.gathering_complete_promise().await;
        let _ = gather.recv().await;
    }

    async fn close(&self) {
        if let Err(err) = self.peer_connection.close().await {
            tracing::debug!(target: "shoal::rtc", error = %err, "peer connection close failed");
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, LinkError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    }
    .map_err(|err| LinkError(format!("malformed session description: {err}")))
}

fn map_ice_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        RTCIceConnectionState::New | RTCIceConnectionState::Unspecified => IceConnectionState::New,
    }
}
