//! Capability seam between the negotiation engine and the media transport
//! engine. The engine only ever talks to these traits; the `rtc` module
//! implements them on top of webrtc-rs and the `mock` module provides an
//! in-memory stand-in for tests.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Failure inside the transport engine (SDP creation/application, connection
/// setup). Handlers treat these as per-connection, non-fatal conditions.
#[derive(Debug, Error)]
#[error("peer link error: {0}")]
pub struct LinkError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description as carried on the wire: just the kind and the SDP
/// text, whatever candidates it holds at the time it is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

/// ICE connection states as reported by the transport engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Callback invoked by a link whenever its ICE connection state changes.
/// Implementations must be cheap; the engine marshals the notification onto
/// its own processing context.
pub type IceStateObserver = Arc<dyn Fn(IceConnectionState) + Send + Sync>;

/// Factory for per-remote-participant links.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Opens a new link towards `remote_id` and wires `observer` to its
    /// ICE state changes.
    async fn open(
        &self,
        remote_id: &str,
        observer: IceStateObserver,
    ) -> Result<Arc<dyn PeerLink>, LinkError>;
}

/// One remote participant's transport-engine connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, LinkError>;
    async fn create_answer(&self) -> Result<SessionDescription, LinkError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), LinkError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), LinkError>;
    /// The local description as currently known, including any candidates
    /// gathered so far. `None` before `set_local_description`.
    async fn local_description(&self) -> Option<SessionDescription>;
    /// Resolves once ICE candidate gathering has completed. The engine
    /// bounds this with the vanilla-ICE timeout.
    async fn wait_gathering_complete(&self);
    async fn close(&self);
    /// Escape hatch for collaborators (hooks) that need the concrete
    /// engine handle, e.g. to attach a data channel.
    fn as_any(&self) -> &dyn Any;
}
