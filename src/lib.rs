//! Full-mesh WebRTC session negotiation.
//!
//! A [`MeshClient`] connects to a rendezvous (signaling) service over a
//! websocket and negotiates direct peer connections with every other
//! participant of a named session: one side registers as the host, others
//! join it as clients, and each pair exchanges offer/answer SDP until the
//! mesh is complete. What flows over the resulting connections is up to the
//! embedder, which can attach data channels or media tracks from a create
//! hook.
//!
//! ```no_run
//! use shoal::{MeshClient, PeerConfig};
//!
//! # async fn run() -> Result<(), shoal::PeerError> {
//! let client = MeshClient::new(PeerConfig::new("ws://127.0.0.1:9000"));
//! let mut events = client.events().unwrap();
//! client.start_host("alice's room").await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
mod engine;
pub mod error;
pub mod event;
pub mod link;
pub mod mock;
mod readiness;
mod registry;
mod rtc;
mod session;
pub mod signaling;

pub use config::{IceServerConfig, PeerConfig, SocketOptions};
pub use error::PeerError;
pub use event::PeerEvent;
pub use link::{
    IceConnectionState, IceStateObserver, LinkError, PeerConnector, PeerLink, SdpKind,
    SessionDescription,
};
pub use registry::{CloseHook, CreateHook};
pub use rtc::{WebRtcConnector, WebRtcLink};
pub use session::{MeshClient, PeerRole};
pub use signaling::messages::HostEntry;
