/// Session-scoped notifications delivered through the channel returned by
/// [`crate::MeshClient::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The local participant is ready. Fires at most once per start attempt.
    /// `local_id` is the identifier the rendezvous service assigned to this
    /// client.
    Started { local_id: String },
    /// The start timeout elapsed before the session became ready. The
    /// session has already been force-stopped when this is observed.
    StartFailed,
    /// The signaling transport could not connect. Also returned as
    /// [`crate::PeerError::ConnectFailed`] from the triggering call.
    ConnectFailed { reason: String },
    /// The signaling transport dropped after having been connected. A
    /// voluntary disconnect (our own stop) is filtered out.
    Disconnected { reason: String },
    /// A connection to a remote participant is being created.
    UserConnecting { id: String },
    /// A connection to a remote participant is being torn down.
    UserDisconnecting { id: String },
}
