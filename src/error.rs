use thiserror::Error;

/// Errors surfaced from direct calls on a [`crate::MeshClient`].
///
/// Everything else the session can go through (start timeout, signaling
/// drop, remote churn) is delivered through the event channel instead of
/// being returned from a call. See [`crate::PeerEvent`].
#[derive(Debug, Error)]
pub enum PeerError {
    /// The rendezvous service already has a host registered under this name.
    #[error("host name already exists: {0}")]
    NameAlreadyExists(String),

    /// The signaling transport could not be connected.
    #[error("failed to connect to signaling server: {0}")]
    ConnectFailed(String),

    /// A create-host or list-hosts round trip is already outstanding.
    #[error("a signaling request is already in flight")]
    RequestInFlight,

    /// The session has been stopped or its engine is gone.
    #[error("session is shut down")]
    Closed,
}
